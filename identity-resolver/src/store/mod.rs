mod memory;

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::match_keys::MatchKey;
use crate::scope::DedupScope;
use crate::types::{CanonicalId, CanonicalProfile, LiveOffer};

pub use memory::InMemoryLiveBookStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Optimistic concurrency check failed: the stored version is not the
    /// one the caller read. Nothing was written.
    #[error("version conflict on {entity_id}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        entity_id: String,
        expected: Option<i64>,
        actual: Option<i64>,
    },

    /// The write would make two profiles share a near-unique key.
    #[error("{key} already belongs to profile {owner}")]
    DuplicateKey { key: MatchKey, owner: CanonicalId },

    /// Store unreachable or failing.
    #[error("live book unavailable: {0}")]
    Unavailable(String),

    #[error("live book did not answer within {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Version conflicts only: the caller may re-read and retry. A
    /// duplicate key comes back the same on every attempt.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lookup keys for offer candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferKeys {
    /// Profiles known to own the offer.
    pub owner_ids: BTreeSet<CanonicalId>,
    /// Customer keys (PAN, mobile) the offer was issued against.
    pub match_keys: BTreeSet<MatchKey>,
}

/// The authoritative store of canonical profiles and offers.
///
/// `save` and `save_offer` are compare-and-swap on the entity version:
/// `expected_version = None` inserts and fails if the entity exists,
/// `Some(v)` replaces only if the stored version is `v`. A mismatch is
/// reported as [`StoreError::VersionConflict`], never overwritten.
#[async_trait]
pub trait LiveBookStore: Send + Sync {
    async fn find_by_match_key(&self, key: &MatchKey) -> StoreResult<Vec<CanonicalProfile>>;

    async fn find_by_source_reference(
        &self,
        source_system: &str,
        source_record_id: &str,
    ) -> StoreResult<Option<CanonicalProfile>>;

    async fn get_profile(&self, canonical_id: &CanonicalId) -> StoreResult<Option<CanonicalProfile>>;

    async fn save(
        &self,
        profile: CanonicalProfile,
        expected_version: Option<i64>,
    ) -> StoreResult<CanonicalProfile>;

    /// Offers owned by any of `keys.owner_ids` or issued against any of
    /// `keys.match_keys`, restricted to `scope`.
    async fn find_offer_candidates(
        &self,
        scope: &DedupScope,
        keys: &OfferKeys,
    ) -> StoreResult<Vec<LiveOffer>>;

    async fn get_offer(&self, offer_id: &str) -> StoreResult<Option<LiveOffer>>;

    async fn save_offer(
        &self,
        offer: LiveOffer,
        expected_version: Option<i64>,
    ) -> StoreResult<LiveOffer>;
}

/// Runs a store call under a deadline; expiry becomes [`StoreError::Timeout`].
pub(crate) async fn with_timeout<T, F>(timeout: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}
