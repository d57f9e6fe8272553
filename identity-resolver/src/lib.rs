mod candidates;
pub mod config;
mod error;
mod events;
mod fuzzy;
mod ingest;
mod lock;
pub mod match_keys;
mod merge;
pub mod metrics_consts;
mod resolver;
pub mod rules;
mod scope;
mod store;
mod types;
mod updates;

#[cfg(test)]
mod testing;

pub use candidates::{CandidateSearch, ProfileCandidate};
pub use error::ResolveError;
pub use events::{ChannelEventPublisher, EventPublisher, LiveBookEvent};
pub use fuzzy::{FuzzyScorer, NameDobScorer};
pub use ingest::{BatchIngestor, BatchSummary, FailedRecord, IngestItem};
pub use lock::{lock_order, InMemoryKeyLockService, KeyLockGuard, KeyLockService, LockError};
pub use match_keys::{MatchKey, MatchKeyType};
pub use merge::{merge, new_profile, MergeError};
pub use resolver::{Resolver, ATTRIBUTE_UPDATE_SOURCE};
pub use rules::{CatalogError, InMemoryRuleCatalog, Rule, RuleCatalog, RuleEngine};
pub use scope::{DedupScope, ScopeGroups, ScopeGroupsError};
pub use store::{InMemoryLiveBookStore, LiveBookStore, OfferKeys, StoreError, StoreResult};
pub use types::{
    CanonicalId, CanonicalProfile, CustomerRecord, CustomerResolution, DeduplicationResult,
    LiveOffer, OfferRecord, OfferStatus, ProductType, ProvenanceEntry, Strategy,
};
pub use updates::{apply_updates, NameUpdate, ProfileUpdate};

#[cfg(test)]
pub use lock::{BreakpointedLockService, LockBreakpoint};
