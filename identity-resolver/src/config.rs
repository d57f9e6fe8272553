use std::{path::PathBuf, time::Duration};

use envconfig::Envconfig;

use crate::scope::{ScopeGroups, ScopeGroupsError};

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Batch processing
    #[envconfig(default = "8")]
    pub worker_count: usize,

    #[envconfig(default = "3")]
    pub max_conflict_retries: u32,

    // Collaborator deadlines
    #[envconfig(default = "2000")]
    pub store_timeout_ms: u64,

    #[envconfig(default = "2000")]
    pub catalog_timeout_ms: u64,

    #[envconfig(default = "5000")]
    pub lock_timeout_ms: u64,

    #[envconfig(default = "10000")]
    pub event_channel_capacity: usize,

    // Minimum fuzzy score when a rule authorizes fuzzy matching without
    // naming its own threshold
    #[envconfig(default = "0.9")]
    pub default_fuzzy_threshold: f64,

    // e.g. "instant_cl=preapproved,e_aggregator"; unlisted products are
    // their own group
    #[envconfig(default = "")]
    pub scope_groups: String,

    #[envconfig(default = "./records.jsonl")]
    pub input_path: String,

    #[envconfig(default = "./rules.json")]
    pub rules_path: String,
}

impl Config {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_millis(self.catalog_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn input_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.input_path)
    }

    pub fn rules_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.rules_path)
    }

    pub fn parse_scope_groups(&self) -> Result<ScopeGroups, ScopeGroupsError> {
        ScopeGroups::parse(&self.scope_groups)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: 8,
            max_conflict_retries: 3,
            store_timeout_ms: 2000,
            catalog_timeout_ms: 2000,
            lock_timeout_ms: 5000,
            event_channel_capacity: 10_000,
            default_fuzzy_threshold: 0.9,
            scope_groups: String::new(),
            input_path: "./records.jsonl".to_string(),
            rules_path: "./rules.json".to_string(),
        }
    }
}
