//! Fact sets handed to the rule engine.
//!
//! Free-form record attributes go in first so that the record's own fields
//! always win on a name clash.

use serde_json::{json, Value};

use crate::rules::Facts;
use crate::types::{CustomerRecord, OfferRecord};

fn insert_opt(facts: &mut Facts, name: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        facts.insert(name.to_string(), Value::String(value.to_string()));
    }
}

fn present(value: Option<&str>) -> Value {
    Value::Bool(value.is_some_and(|v| !v.trim().is_empty()))
}

pub fn customer_facts(record: &CustomerRecord) -> Facts {
    let mut facts: Facts = record.attributes.clone();
    facts.insert("entity".to_string(), json!("customer"));
    facts.insert("source_system".to_string(), json!(record.source_system));
    facts.insert(
        "loan_product_type".to_string(),
        json!(record.loan_product_type.as_str()),
    );
    facts.insert("has_pan".to_string(), present(record.pan.as_deref()));
    facts.insert("has_mobile".to_string(), present(record.mobile.as_deref()));
    facts.insert("has_email".to_string(), present(record.email.as_deref()));
    insert_opt(&mut facts, "segment", record.segment.as_deref());
    insert_opt(&mut facts, "gender", record.gender.as_deref());
    if let Some(dnd) = record.dnd_flag {
        facts.insert("dnd_flag".to_string(), Value::Bool(dnd));
    }
    facts
}

pub fn offer_facts(offer: &OfferRecord) -> Facts {
    let mut facts: Facts = offer.attributes.clone();
    facts.insert("entity".to_string(), json!("offer"));
    facts.insert("source_system".to_string(), json!(offer.source_system));
    facts.insert("offer_type".to_string(), json!(offer.offer_type.as_str()));
    facts.insert("amount".to_string(), json!(offer.amount));
    facts.insert("status".to_string(), json!(offer.status));
    insert_opt(&mut facts, "loan_id", offer.loan_id.as_deref());
    insert_opt(&mut facts, "campaign_id", offer.campaign_id.as_deref());
    facts
}
