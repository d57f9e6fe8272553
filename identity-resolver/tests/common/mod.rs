#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use identity_resolver::config::Config;
use identity_resolver::{
    CatalogError, ChannelEventPublisher, CustomerRecord, InMemoryKeyLockService,
    InMemoryLiveBookStore, InMemoryRuleCatalog, LiveBookEvent, OfferRecord, OfferStatus,
    ProductType, Resolver, Rule, RuleCatalog, ScopeGroups,
};

pub const PAN: &str = "ABCDE1234F";
pub const MOBILE: &str = "9876543210";

pub struct UnreachableCatalog;

#[async_trait]
impl RuleCatalog for UnreachableCatalog {
    async fn active_rules(&self) -> Result<Arc<[Rule]>, CatalogError> {
        Err(CatalogError::Unavailable("rule service unreachable".to_string()))
    }
}

pub struct TestHarness {
    pub resolver: Arc<Resolver>,
    pub store: Arc<InMemoryLiveBookStore>,
    pub events: mpsc::Receiver<LiveBookEvent>,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    pub fn drain_events(&mut self) -> Vec<LiveBookEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

#[derive(Default)]
pub struct TestHarnessBuilder {
    rules: Vec<Rule>,
    scope_groups: Option<&'static str>,
    unreachable_catalog: bool,
}

impl TestHarnessBuilder {
    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_scope_groups(mut self, definition: &'static str) -> Self {
        self.scope_groups = Some(definition);
        self
    }

    pub fn with_unreachable_catalog(mut self) -> Self {
        self.unreachable_catalog = true;
        self
    }

    pub fn build(self) -> TestHarness {
        let store = Arc::new(InMemoryLiveBookStore::new());
        let catalog: Arc<dyn RuleCatalog> = if self.unreachable_catalog {
            Arc::new(UnreachableCatalog)
        } else {
            Arc::new(InMemoryRuleCatalog::new(self.rules))
        };
        let scope_groups = match self.scope_groups {
            Some(definition) => ScopeGroups::parse(definition).unwrap(),
            None => ScopeGroups::default(),
        };
        let (publisher, events) = ChannelEventPublisher::bounded(1024);
        let resolver = Resolver::new(
            store.clone(),
            catalog,
            Arc::new(InMemoryKeyLockService::default()),
            Arc::new(publisher),
            scope_groups,
            &Config::default(),
        );
        TestHarness {
            resolver: Arc::new(resolver),
            store,
            events,
        }
    }
}

pub struct CustomerBuilder {
    record: CustomerRecord,
}

pub fn customer(source_system: &str, source_customer_id: &str) -> CustomerBuilder {
    CustomerBuilder {
        record: CustomerRecord {
            source_system: source_system.to_string(),
            source_customer_id: source_customer_id.to_string(),
            first_name: Some("Asha".to_string()),
            middle_name: None,
            last_name: Some("Rao".to_string()),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 12),
            gender: Some("F".to_string()),
            mobile: None,
            email: None,
            pan: None,
            aadhaar: None,
            address: None,
            segment: None,
            dnd_flag: None,
            loan_product_type: ProductType::Loyalty,
            received_at: Utc::now(),
            attributes: HashMap::new(),
        },
    }
}

impl CustomerBuilder {
    pub fn pan(mut self, pan: &str) -> Self {
        self.record.pan = Some(pan.to_string());
        self
    }

    pub fn mobile(mut self, mobile: Option<&str>) -> Self {
        self.record.mobile = mobile.map(str::to_string);
        self
    }

    pub fn email(mut self, email: &str) -> Self {
        self.record.email = Some(email.to_string());
        self
    }

    pub fn address(mut self, address: &str) -> Self {
        self.record.address = Some(address.to_string());
        self
    }

    pub fn product(mut self, product: ProductType) -> Self {
        self.record.loan_product_type = product;
        self
    }

    pub fn attribute(mut self, name: &str, value: Value) -> Self {
        self.record.attributes.insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> CustomerRecord {
        self.record
    }
}

pub fn top_up_offer(offer_id: &str, loan_id: &str) -> OfferRecord {
    offer(offer_id, ProductType::TopUp, Some(loan_id))
}

pub fn offer(offer_id: &str, offer_type: ProductType, loan_id: Option<&str>) -> OfferRecord {
    OfferRecord {
        offer_id: offer_id.to_string(),
        source_system: "lms".to_string(),
        profile_id: None,
        owner_pan: Some(PAN.to_string()),
        owner_mobile: None,
        offer_type,
        loan_id: loan_id.map(str::to_string),
        amount: 250_000.0,
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
