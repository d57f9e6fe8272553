use std::time::Duration;

use thiserror::Error;

use crate::lock::LockError;
use crate::merge::MergeError;
use crate::rules::CatalogError;
use crate::store::StoreError;
use crate::types::CanonicalId;

#[derive(Error, Debug)]
pub enum ResolveError {
    /// The record should have been rejected upstream. Nothing is persisted.
    #[error("invalid record: {0}")]
    Validation(String),

    #[error("rule catalog unavailable")]
    RuleRetrieval(#[source] CatalogError),

    /// A concurrent writer got there first; re-resolving may succeed.
    #[error("concurrent modification")]
    Conflict(#[source] StoreError),

    /// Resolver invariant broken, e.g. a duplicate decision with no target.
    #[error("illegal resolver state: {context}")]
    IllegalResolverState { context: String },

    /// The write would give a near-unique key a second owner. Retrying
    /// reaches the same decision, so this goes to manual review.
    #[error("key already owned by another profile")]
    KeyConflict(#[source] StoreError),

    #[error("merge failed")]
    Merge(#[from] MergeError),

    #[error("live book unavailable")]
    Store(#[source] StoreError),

    #[error("live book call timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not lock match keys")]
    Lock(#[from] LockError),

    #[error("profile {0} not found")]
    ProfileNotFound(CanonicalId),
}

impl From<StoreError> for ResolveError {
    fn from(error: StoreError) -> Self {
        match error {
            e if e.is_conflict() => ResolveError::Conflict(e),
            e @ StoreError::DuplicateKey { .. } => ResolveError::KeyConflict(e),
            StoreError::Timeout(timeout) => ResolveError::Timeout(timeout),
            e => ResolveError::Store(e),
        }
    }
}

impl From<CatalogError> for ResolveError {
    fn from(error: CatalogError) -> Self {
        ResolveError::RuleRetrieval(error)
    }
}

impl ResolveError {
    /// Errors where running the same record again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolveError::Conflict(_) | ResolveError::Timeout(_) => true,
            ResolveError::Lock(LockError::Timeout { .. }) => true,
            ResolveError::RuleRetrieval(CatalogError::Timeout(_)) => true,
            _ => false,
        }
    }

    /// Errors after which no correct decision is possible for any record.
    pub fn aborts_batch(&self) -> bool {
        match self {
            ResolveError::RuleRetrieval(_) | ResolveError::Store(_) => true,
            ResolveError::Lock(LockError::Unavailable(_)) => true,
            _ => false,
        }
    }

    /// Short label for metrics and failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::Validation(_) => "validation",
            ResolveError::RuleRetrieval(_) => "rule_retrieval",
            ResolveError::Conflict(_) => "conflict",
            ResolveError::IllegalResolverState { .. } => "illegal_resolver_state",
            ResolveError::KeyConflict(_) => "key_conflict",
            ResolveError::Merge(_) => "merge",
            ResolveError::Store(_) => "store",
            ResolveError::Timeout(_) => "timeout",
            ResolveError::Lock(_) => "lock",
            ResolveError::ProfileNotFound(_) => "profile_not_found",
        }
    }
}
