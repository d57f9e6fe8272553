use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a canonical profile, generated once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(pub Uuid);

impl CanonicalId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Consumer loan products. Used both as the product a customer record was
/// originated for and as the type of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Loyalty,
    Preapproved,
    EAggregator,
    TopUp,
    EmployeeLoan,
}

impl ProductType {
    pub const ALL: [ProductType; 5] = [
        ProductType::Loyalty,
        ProductType::Preapproved,
        ProductType::EAggregator,
        ProductType::TopUp,
        ProductType::EmployeeLoan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Loyalty => "loyalty",
            ProductType::Preapproved => "preapproved",
            ProductType::EAggregator => "e_aggregator",
            ProductType::TopUp => "top_up",
            ProductType::EmployeeLoan => "employee_loan",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|product| product.as_str() == value.trim())
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated customer record as delivered by an origination channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub source_system: String,
    pub source_customer_id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub pan: Option<String>,
    #[serde(default)]
    pub aadhaar: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub dnd_flag: Option<bool>,
    pub loan_product_type: ProductType,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
    /// Extra facts (bureau score, income band, ...) only consulted by rules.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl CustomerRecord {
    pub fn provenance(&self) -> ProvenanceEntry {
        ProvenanceEntry {
            source_system: self.source_system.clone(),
            source_record_id: self.source_customer_id.clone(),
            received_at: self.received_at,
        }
    }
}

/// One contributing source record of a canonical profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub source_system: String,
    pub source_record_id: String,
    pub received_at: DateTime<Utc>,
}

impl ProvenanceEntry {
    pub fn is_same_source(&self, source_system: &str, source_record_id: &str) -> bool {
        self.source_system == source_system && self.source_record_id == source_record_id
    }
}

/// The live-book entity: one merged representation of a real-world customer.
///
/// PAN, mobile and email are held in their normalized form so that the
/// store's key indexes and the values callers read agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProfile {
    pub canonical_id: CanonicalId,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub pan: Option<String>,
    pub address: Option<String>,
    pub segment: Option<String>,
    pub dnd_flag: bool,
    pub product_types: BTreeSet<ProductType>,
    pub version: i64,
    pub provenance: Vec<ProvenanceEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalProfile {
    pub fn has_source(&self, source_system: &str, source_record_id: &str) -> bool {
        self.provenance
            .iter()
            .any(|entry| entry.is_same_source(source_system, source_record_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    #[default]
    Active,
    Availed,
    Expired,
    Withdrawn,
}

/// A loan offer as delivered by an origination channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRecord {
    pub offer_id: String,
    pub source_system: String,
    /// Owning profile, when the channel already resolved the customer.
    #[serde(default)]
    pub profile_id: Option<CanonicalId>,
    /// Customer keys the offer was issued against.
    #[serde(default)]
    pub owner_pan: Option<String>,
    #[serde(default)]
    pub owner_mobile: Option<String>,
    pub offer_type: ProductType,
    #[serde(default)]
    pub loan_id: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub valid_from: Option<NaiveDate>,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    #[serde(default)]
    pub status: OfferStatus,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

/// An offer held in the live book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveOffer {
    pub record: OfferRecord,
    pub owner_id: Option<CanonicalId>,
    pub scope_group: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl LiveOffer {
    pub fn offer_id(&self) -> &str {
        &self.record.offer_id
    }
}

/// How a deduplication decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    NoMatch,
    ExactKey,
    RuleAuthorizedFuzzy,
    SourceReference,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::NoMatch => "NoMatch",
            Strategy::ExactKey => "ExactKey",
            Strategy::RuleAuthorizedFuzzy => "RuleAuthorizedFuzzy",
            Strategy::SourceReference => "SourceReference",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a single resolution. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeduplicationResult<Id = CanonicalId> {
    pub is_duplicate: bool,
    pub matched_id: Option<Id>,
    pub strategy_applied: Strategy,
    pub confidence: f64,
    /// Label of the dedup scope the comparison ran in.
    pub scope: String,
}

impl<Id> DeduplicationResult<Id> {
    pub fn unique(scope: impl Into<String>) -> Self {
        Self {
            is_duplicate: false,
            matched_id: None,
            strategy_applied: Strategy::NoMatch,
            confidence: 0.0,
            scope: scope.into(),
        }
    }

    pub fn duplicate(
        matched_id: Id,
        strategy_applied: Strategy,
        confidence: f64,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            is_duplicate: true,
            matched_id: Some(matched_id),
            strategy_applied,
            confidence,
            scope: scope.into(),
        }
    }
}

/// What `resolve_customer` hands back to the ingestion orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerResolution {
    pub canonical_id: CanonicalId,
    pub is_new: bool,
    pub strategy_applied: Strategy,
    pub confidence: f64,
    pub profile: CanonicalProfile,
}
