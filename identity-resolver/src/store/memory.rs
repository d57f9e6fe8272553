use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{LiveBookStore, OfferKeys, StoreError, StoreResult};
use crate::match_keys::{offer_owner_keys, profile_keys, MatchKey, MatchKeyType};
use crate::metrics_consts::VERSION_CONFLICTS_COUNTER;
use crate::scope::DedupScope;
use crate::types::{CanonicalId, CanonicalProfile, LiveOffer};

#[derive(Default)]
struct LiveBook {
    profiles: HashMap<CanonicalId, CanonicalProfile>,
    profile_keys: HashMap<MatchKey, BTreeSet<CanonicalId>>,
    sources: HashMap<(String, String), CanonicalId>,
    offers: HashMap<String, LiveOffer>,
    offers_by_owner: HashMap<CanonicalId, BTreeSet<String>>,
    offers_by_key: HashMap<MatchKey, BTreeSet<String>>,
}

fn check_version(
    entity_id: String,
    expected: Option<i64>,
    actual: Option<i64>,
) -> StoreResult<()> {
    if expected == actual {
        return Ok(());
    }
    metrics::counter!(VERSION_CONFLICTS_COUNTER).increment(1);
    Err(StoreError::VersionConflict {
        entity_id,
        expected,
        actual,
    })
}

fn unindex<K: std::hash::Hash + Eq, V: Ord>(
    index: &mut HashMap<K, BTreeSet<V>>,
    key: K,
    value: &V,
) {
    if let Some(ids) = index.get_mut(&key) {
        ids.remove(value);
        if ids.is_empty() {
            index.remove(&key);
        }
    }
}

impl LiveBook {
    fn save_profile(
        &mut self,
        profile: CanonicalProfile,
        expected_version: Option<i64>,
    ) -> StoreResult<CanonicalProfile> {
        let id = profile.canonical_id;
        let current = self.profiles.get(&id);
        check_version(id.to_string(), expected_version, current.map(|p| p.version))?;

        let new_keys = profile_keys(&profile);
        for key in new_keys.iter().filter(|k| k.key_type == MatchKeyType::Pan) {
            if let Some(owner) = self
                .profile_keys
                .get(key)
                .and_then(|owners| owners.iter().find(|owner| **owner != id))
            {
                return Err(StoreError::DuplicateKey {
                    key: key.clone(),
                    owner: *owner,
                });
            }
        }

        if let Some(current) = current {
            for key in profile_keys(current) {
                unindex(&mut self.profile_keys, key, &id);
            }
        }
        for key in new_keys {
            self.profile_keys.entry(key).or_default().insert(id);
        }
        for entry in &profile.provenance {
            self.sources.insert(
                (entry.source_system.clone(), entry.source_record_id.clone()),
                id,
            );
        }

        self.profiles.insert(id, profile.clone());
        Ok(profile)
    }

    fn save_offer(
        &mut self,
        offer: LiveOffer,
        expected_version: Option<i64>,
    ) -> StoreResult<LiveOffer> {
        let offer_id = offer.offer_id().to_string();
        let current = self.offers.get(&offer_id);
        check_version(
            offer_id.clone(),
            expected_version,
            current.map(|o| o.version),
        )?;

        if let Some(current) = current {
            if let Some(owner) = current.owner_id {
                unindex(&mut self.offers_by_owner, owner, &offer_id);
            }
            for key in offer_owner_keys(&current.record) {
                unindex(&mut self.offers_by_key, key, &offer_id);
            }
        }
        if let Some(owner) = offer.owner_id {
            self.offers_by_owner
                .entry(owner)
                .or_default()
                .insert(offer_id.clone());
        }
        for key in offer_owner_keys(&offer.record) {
            self.offers_by_key
                .entry(key)
                .or_default()
                .insert(offer_id.clone());
        }

        self.offers.insert(offer_id, offer.clone());
        Ok(offer)
    }
}

/// Live book held in process memory: an arena of profiles and offers with
/// secondary indexes per match key. All mutations happen under one mutex,
/// so each `save` is atomic with respect to every other call.
pub struct InMemoryLiveBookStore {
    book: Mutex<LiveBook>,
    unavailable: AtomicBool,
}

impl InMemoryLiveBookStore {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(LiveBook::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All profiles, ordered by canonical id.
    pub fn profiles(&self) -> Vec<CanonicalProfile> {
        let book = self.lock_book();
        let mut profiles: Vec<CanonicalProfile> = book.profiles.values().cloned().collect();
        profiles.sort_by_key(|p| p.canonical_id);
        profiles
    }

    pub fn profile_count(&self) -> usize {
        self.lock_book().profiles.len()
    }

    pub fn offers(&self) -> Vec<LiveOffer> {
        let book = self.lock_book();
        let mut offers: Vec<LiveOffer> = book.offers.values().cloned().collect();
        offers.sort_by(|a, b| a.offer_id().cmp(b.offer_id()));
        offers
    }

    fn lock_book(&self) -> MutexGuard<'_, LiveBook> {
        // Every mutation validates before touching state, so a panic while
        // held cannot leave the indexes half-written.
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn book(&self) -> StoreResult<MutexGuard<'_, LiveBook>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory live book marked unavailable".to_string(),
            ));
        }
        Ok(self.lock_book())
    }
}

impl Default for InMemoryLiveBookStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveBookStore for InMemoryLiveBookStore {
    async fn find_by_match_key(&self, key: &MatchKey) -> StoreResult<Vec<CanonicalProfile>> {
        let book = self.book()?;
        Ok(book
            .profile_keys
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| book.profiles.get(id).cloned())
            .collect())
    }

    async fn find_by_source_reference(
        &self,
        source_system: &str,
        source_record_id: &str,
    ) -> StoreResult<Option<CanonicalProfile>> {
        let book = self.book()?;
        Ok(book
            .sources
            .get(&(source_system.to_string(), source_record_id.to_string()))
            .and_then(|id| book.profiles.get(id).cloned()))
    }

    async fn get_profile(&self, canonical_id: &CanonicalId) -> StoreResult<Option<CanonicalProfile>> {
        Ok(self.book()?.profiles.get(canonical_id).cloned())
    }

    async fn save(
        &self,
        profile: CanonicalProfile,
        expected_version: Option<i64>,
    ) -> StoreResult<CanonicalProfile> {
        self.book()?.save_profile(profile, expected_version)
    }

    async fn find_offer_candidates(
        &self,
        scope: &DedupScope,
        keys: &OfferKeys,
    ) -> StoreResult<Vec<LiveOffer>> {
        let book = self.book()?;
        let by_owner = keys
            .owner_ids
            .iter()
            .filter_map(|owner| book.offers_by_owner.get(owner));
        let by_key = keys
            .match_keys
            .iter()
            .filter_map(|key| book.offers_by_key.get(key));
        let offer_ids: BTreeSet<&String> = by_owner.chain(by_key).flatten().collect();

        Ok(offer_ids
            .into_iter()
            .filter_map(|offer_id| book.offers.get(offer_id))
            .filter(|offer| scope.admits(offer.record.offer_type))
            .cloned()
            .collect())
    }

    async fn get_offer(&self, offer_id: &str) -> StoreResult<Option<LiveOffer>> {
        Ok(self.book()?.offers.get(offer_id).cloned())
    }

    async fn save_offer(
        &self,
        offer: LiveOffer,
        expected_version: Option<i64>,
    ) -> StoreResult<LiveOffer> {
        self.book()?.save_offer(offer, expected_version)
    }
}
