//! Deduplication and business rules.

mod catalog;
mod condition;
mod engine;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use catalog::{CatalogError, InMemoryRuleCatalog, RuleCatalog};
pub use condition::{condition_holds, Comparator, Condition};
pub use engine::{evaluate_rules, RuleEngine};

/// Fact set a rule is evaluated against: the incoming record flattened to
/// attribute names, plus derived facts.
pub type Facts = HashMap<String, Value>;

/// Action key declaring that the rule drives deduplication.
pub const ACTION_DEDUPLICATE: &str = "deduplicate";
/// Action key authorizing partial (email / name+DOB) matches.
pub const ACTION_ALLOW_FUZZY_MATCH: &str = "allow_fuzzy_match";
/// Action key overriding the minimum fuzzy score.
pub const ACTION_FUZZY_THRESHOLD: &str = "fuzzy_threshold";

fn default_version() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub priority: i32,
    /// Attribute name to expected value. Strings with a leading comparator
    /// (`>=700`) are numeric comparisons, everything else is equality.
    #[serde(default)]
    pub conditions: BTreeMap<String, Value>,
    #[serde(default)]
    pub actions: BTreeMap<String, Value>,
    /// Scope tag, e.g. `top_up` or `all_cl`. Absent means unscoped.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

/// A rule whose conditions all held for a fact set.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredRule {
    pub rule_id: String,
    pub version: u32,
    pub priority: i32,
    pub scope: Option<String>,
    pub actions: BTreeMap<String, Value>,
}

impl FiredRule {
    fn from_rule(rule: &Rule) -> Self {
        Self {
            rule_id: rule.rule_id.clone(),
            version: rule.version,
            priority: rule.priority,
            scope: rule.scope.clone(),
            actions: rule.actions.clone(),
        }
    }

    fn flag(&self, key: &str) -> bool {
        match self.actions.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn declares_dedup(&self) -> bool {
        self.flag(ACTION_DEDUPLICATE)
    }

    pub fn allows_fuzzy_match(&self) -> bool {
        self.flag(ACTION_ALLOW_FUZZY_MATCH)
    }

    pub fn fuzzy_threshold(&self) -> Option<f64> {
        self.actions
            .get(ACTION_FUZZY_THRESHOLD)
            .and_then(Value::as_f64)
    }
}
