//! Fixtures shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::events::{ChannelEventPublisher, LiveBookEvent};
use crate::lock::{InMemoryKeyLockService, KeyLockService};
use crate::match_keys::MatchKey;
use crate::rules::{CatalogError, InMemoryRuleCatalog, Rule, RuleCatalog};
use crate::scope::{DedupScope, ScopeGroups};
use crate::store::{InMemoryLiveBookStore, LiveBookStore, OfferKeys, StoreError, StoreResult};
use crate::types::{
    CanonicalId, CanonicalProfile, CustomerRecord, LiveOffer, OfferRecord, OfferStatus,
    ProductType,
};
use crate::Resolver;

pub fn customer(source_id: &str, pan: Option<&str>, mobile: Option<&str>) -> CustomerRecord {
    CustomerRecord {
        source_system: "loyalty".to_string(),
        source_customer_id: source_id.to_string(),
        first_name: Some("Asha".to_string()),
        middle_name: None,
        last_name: Some("Rao".to_string()),
        date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 12),
        gender: Some("F".to_string()),
        mobile: mobile.map(str::to_string),
        email: None,
        pan: pan.map(str::to_string),
        aadhaar: None,
        address: None,
        segment: None,
        dnd_flag: None,
        loan_product_type: ProductType::Loyalty,
        received_at: Utc::now(),
        attributes: HashMap::new(),
    }
}

pub fn offer(offer_id: &str, offer_type: ProductType, loan_id: Option<&str>) -> OfferRecord {
    OfferRecord {
        offer_id: offer_id.to_string(),
        source_system: "lms".to_string(),
        profile_id: None,
        owner_pan: Some("ABCDE1234F".to_string()),
        owner_mobile: None,
        offer_type,
        loan_id: loan_id.map(str::to_string),
        amount: 100_000.0,
        campaign_id: None,
        valid_from: None,
        valid_until: None,
        status: OfferStatus::Active,
        received_at: Utc::now(),
        attributes: HashMap::new(),
    }
}

pub fn rule(
    rule_id: &str,
    priority: i32,
    scope: Option<&str>,
    conditions: &[(&str, Value)],
    actions: &[(&str, Value)],
) -> Rule {
    Rule {
        rule_id: rule_id.to_string(),
        version: 1,
        priority,
        conditions: conditions
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        actions: actions
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<BTreeMap<_, _>>(),
        scope: scope.map(str::to_string),
        active: true,
    }
}

/// A dedup rule that also authorizes fuzzy matching.
pub fn fuzzy_rule(rule_id: &str, scope: Option<&str>, conditions: &[(&str, Value)]) -> Rule {
    rule(
        rule_id,
        10,
        scope,
        conditions,
        &[
            ("deduplicate", json!(true)),
            ("allow_fuzzy_match", json!(true)),
        ],
    )
}

pub struct UnavailableCatalog;

#[async_trait]
impl RuleCatalog for UnavailableCatalog {
    async fn active_rules(&self) -> Result<Arc<[Rule]>, CatalogError> {
        Err(CatalogError::Unavailable("connection refused".to_string()))
    }
}

/// Live book wrapper for provoking failure paths.
pub struct FaultyStore {
    pub inner: InMemoryLiveBookStore,
    hide_profiles: AtomicBool,
    reject_pans: AtomicBool,
    conflicts_to_inject: AtomicU32,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryLiveBookStore::new(),
            hide_profiles: AtomicBool::new(false),
            reject_pans: AtomicBool::new(false),
            conflicts_to_inject: AtomicU32::new(0),
        }
    }

    /// `get_profile` answers `None` while key lookups still find profiles.
    pub fn hide_profiles(&self) {
        self.hide_profiles.store(true, Ordering::SeqCst);
    }

    /// Every save of a profile with a PAN fails as if another profile
    /// owned it.
    pub fn reject_pans(&self) {
        self.reject_pans.store(true, Ordering::SeqCst);
    }

    /// The next `count` updates of an existing profile fail with a version
    /// conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.conflicts_to_inject.store(count, Ordering::SeqCst);
    }

    fn take_conflict(&self) -> bool {
        self.conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LiveBookStore for FaultyStore {
    async fn find_by_match_key(&self, key: &MatchKey) -> StoreResult<Vec<CanonicalProfile>> {
        self.inner.find_by_match_key(key).await
    }

    async fn find_by_source_reference(
        &self,
        source_system: &str,
        source_record_id: &str,
    ) -> StoreResult<Option<CanonicalProfile>> {
        self.inner
            .find_by_source_reference(source_system, source_record_id)
            .await
    }

    async fn get_profile(&self, canonical_id: &CanonicalId) -> StoreResult<Option<CanonicalProfile>> {
        if self.hide_profiles.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get_profile(canonical_id).await
    }

    async fn save(
        &self,
        profile: CanonicalProfile,
        expected_version: Option<i64>,
    ) -> StoreResult<CanonicalProfile> {
        if self.reject_pans.load(Ordering::SeqCst) {
            if let Some(key) = profile.pan.as_deref().and_then(MatchKey::pan) {
                return Err(StoreError::DuplicateKey {
                    key,
                    owner: CanonicalId::generate(),
                });
            }
        }
        if expected_version.is_some() && self.take_conflict() {
            return Err(StoreError::VersionConflict {
                entity_id: profile.canonical_id.to_string(),
                expected: expected_version,
                actual: expected_version.map(|v| v + 1),
            });
        }
        self.inner.save(profile, expected_version).await
    }

    async fn find_offer_candidates(
        &self,
        scope: &DedupScope,
        keys: &OfferKeys,
    ) -> StoreResult<Vec<LiveOffer>> {
        self.inner.find_offer_candidates(scope, keys).await
    }

    async fn get_offer(&self, offer_id: &str) -> StoreResult<Option<LiveOffer>> {
        self.inner.get_offer(offer_id).await
    }

    async fn save_offer(
        &self,
        offer: LiveOffer,
        expected_version: Option<i64>,
    ) -> StoreResult<LiveOffer> {
        self.inner.save_offer(offer, expected_version).await
    }
}

/// A resolver wired to in-memory collaborators, with handles on each.
pub struct Harness<S: LiveBookStore + 'static = InMemoryLiveBookStore> {
    pub resolver: Arc<Resolver>,
    pub store: Arc<S>,
    pub catalog: Arc<InMemoryRuleCatalog>,
    pub events: mpsc::Receiver<LiveBookEvent>,
}

impl Harness<InMemoryLiveBookStore> {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self::with_store(InMemoryLiveBookStore::new(), rules)
    }
}

impl<S: LiveBookStore + 'static> Harness<S> {
    pub fn with_store(store: S, rules: Vec<Rule>) -> Self {
        Self::build(
            store,
            rules,
            Arc::new(InMemoryKeyLockService::default()),
            ScopeGroups::default(),
        )
    }

    pub fn build(
        store: S,
        rules: Vec<Rule>,
        locks: Arc<dyn KeyLockService>,
        scope_groups: ScopeGroups,
    ) -> Self {
        let store = Arc::new(store);
        let catalog = Arc::new(InMemoryRuleCatalog::new(rules));
        let (publisher, events) = ChannelEventPublisher::bounded(256);
        let resolver = Resolver::new(
            store.clone(),
            catalog.clone(),
            locks,
            Arc::new(publisher),
            scope_groups,
            &Config::default(),
        );
        Self {
            resolver: Arc::new(resolver),
            store,
            catalog,
            events,
        }
    }

    /// Events published so far.
    pub fn drain_events(&mut self) -> Vec<LiveBookEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
