use std::sync::Arc;
use std::time::Duration;

use super::{condition_holds, CatalogError, Facts, FiredRule, Rule, RuleCatalog};
use crate::metrics_consts::{RULES_FIRED_COUNTER, RULE_RETRIEVAL_FAILURES_COUNTER};

/// Evaluates fact sets against the catalog's active rules.
#[derive(Clone)]
pub struct RuleEngine {
    catalog: Arc<dyn RuleCatalog>,
    fetch_timeout: Duration,
}

impl RuleEngine {
    pub fn new(catalog: Arc<dyn RuleCatalog>, fetch_timeout: Duration) -> Self {
        Self {
            catalog,
            fetch_timeout,
        }
    }

    /// Fetches the active rules and returns every rule that fires, highest
    /// priority first, ties broken by ascending rule id.
    ///
    /// A catalog failure is returned as an error, never as an empty rule
    /// set.
    pub async fn evaluate(&self, facts: &Facts) -> Result<Vec<FiredRule>, CatalogError> {
        let rules = match tokio::time::timeout(self.fetch_timeout, self.catalog.active_rules())
            .await
        {
            Ok(Ok(rules)) => rules,
            Ok(Err(e)) => {
                metrics::counter!(RULE_RETRIEVAL_FAILURES_COUNTER, "cause" => "unavailable")
                    .increment(1);
                return Err(e);
            }
            Err(_) => {
                metrics::counter!(RULE_RETRIEVAL_FAILURES_COUNTER, "cause" => "timeout")
                    .increment(1);
                return Err(CatalogError::Timeout(self.fetch_timeout));
            }
        };

        let fired = evaluate_rules(&rules, facts);
        metrics::counter!(RULES_FIRED_COUNTER).increment(fired.len() as u64);
        Ok(fired)
    }
}

/// Pure evaluation of a rule snapshot. Rules are independent: every rule is
/// checked regardless of which others fired.
pub fn evaluate_rules(rules: &[Rule], facts: &Facts) -> Vec<FiredRule> {
    let mut fired: Vec<FiredRule> = rules
        .iter()
        .filter(|rule| rule.active)
        .filter(|rule| {
            rule.conditions
                .iter()
                .all(|(attribute, expected)| condition_holds(attribute, expected, facts))
        })
        .map(FiredRule::from_rule)
        .collect();

    fired.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });
    fired
}
