use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::Rule;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("rule catalog unavailable: {0}")]
    Unavailable(String),
    #[error("rule catalog did not answer within {0:?}")]
    Timeout(Duration),
    #[error("rule catalog content is malformed: {0}")]
    Malformed(String),
    #[error("failed to read rule catalog from {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Source of the active rule set.
///
/// Rules are owned by an external administration path; the resolver only
/// reads them. Every call returns one consistent snapshot.
#[async_trait]
pub trait RuleCatalog: Send + Sync {
    async fn active_rules(&self) -> Result<Arc<[Rule]>, CatalogError>;
}

/// Catalog holding a snapshot in memory. Readers never block each other;
/// [`InMemoryRuleCatalog::replace`] swaps the whole snapshot at once.
pub struct InMemoryRuleCatalog {
    snapshot: RwLock<Arc<[Rule]>>,
}

impl InMemoryRuleCatalog {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            snapshot: RwLock::new(Self::latest_active(rules)),
        }
    }

    /// Loads a JSON array of rules.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let rules: Vec<Rule> =
            serde_json::from_str(&raw).map_err(|e| CatalogError::Malformed(e.to_string()))?;
        tracing::info!(path = %path.display(), rules = rules.len(), "loaded rule catalog");
        Ok(Self::new(rules))
    }

    /// Administrative replacement of the rule set.
    pub fn replace(&self, rules: Vec<Rule>) {
        let next = Self::latest_active(rules);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Keeps the highest version of each rule id, then drops inactive ones.
    fn latest_active(rules: Vec<Rule>) -> Arc<[Rule]> {
        let mut latest: BTreeMap<String, Rule> = BTreeMap::new();
        for rule in rules {
            match latest.get(&rule.rule_id) {
                Some(current) if current.version >= rule.version => {}
                _ => {
                    latest.insert(rule.rule_id.clone(), rule);
                }
            }
        }
        latest.into_values().filter(|rule| rule.active).collect()
    }
}

impl Default for InMemoryRuleCatalog {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl RuleCatalog for InMemoryRuleCatalog {
    async fn active_rules(&self) -> Result<Arc<[Rule]>, CatalogError> {
        let snapshot = match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rule(id: &str, version: u32, active: bool) -> Rule {
        Rule {
            rule_id: id.to_string(),
            version,
            priority: 1,
            conditions: BTreeMap::new(),
            actions: BTreeMap::new(),
            scope: None,
            active,
        }
    }

    #[tokio::test]
    async fn test_latest_version_wins() {
        let catalog = InMemoryRuleCatalog::new(vec![
            rule("r1", 1, true),
            rule("r1", 3, true),
            rule("r1", 2, true),
        ]);
        let rules = catalog.active_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].version, 3);
    }

    #[tokio::test]
    async fn test_deactivated_latest_version_removes_rule() {
        let catalog = InMemoryRuleCatalog::new(vec![rule("r1", 1, true), rule("r1", 2, false)]);
        assert!(catalog.active_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_swaps_snapshot() {
        let catalog = InMemoryRuleCatalog::new(vec![rule("r1", 1, true)]);
        let before = catalog.active_rules().await.unwrap();
        catalog.replace(vec![rule("r2", 1, true), rule("r3", 1, true)]);
        let after = catalog.active_rules().await.unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"rule_id": "topup-dedup", "priority": 10, "scope": "top_up",
                 "conditions": {{"offer_type": "top_up"}},
                 "actions": {{"deduplicate": true}}}}]"#
        )
        .unwrap();

        let catalog = InMemoryRuleCatalog::from_json_file(file.path()).unwrap();
        let rules = catalog.active_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].version, 1);
        assert!(rules[0].active);
        assert_eq!(rules[0].scope.as_deref(), Some("top_up"));
    }

    #[test]
    fn test_from_json_file_reports_malformed_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            InMemoryRuleCatalog::from_json_file(file.path()),
            Err(CatalogError::Malformed(_))
        ));
    }
}
