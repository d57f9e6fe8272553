use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::match_keys::{offer_owner_keys, MatchKey, MatchKeyType};
use crate::metrics_consts::CANDIDATE_COUNT_HISTOGRAM;
use crate::scope::DedupScope;
use crate::store::{with_timeout, LiveBookStore, OfferKeys, StoreResult};
use crate::types::{CanonicalId, CanonicalProfile, LiveOffer, OfferRecord};

/// A stored profile together with the key types it was found through.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileCandidate {
    pub profile: CanonicalProfile,
    pub matched_on: BTreeSet<MatchKeyType>,
}

impl ProfileCandidate {
    /// Found through PAN or mobile.
    pub fn has_exact_match(&self) -> bool {
        self.matched_on.iter().any(MatchKeyType::is_exact)
    }
}

/// Scoped lookups against the live book.
#[derive(Clone)]
pub struct CandidateSearch {
    store: Arc<dyn LiveBookStore>,
    timeout: Duration,
}

impl CandidateSearch {
    pub fn new(store: Arc<dyn LiveBookStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Profiles sharing any of `keys`, unioned by canonical id.
    ///
    /// A profile is kept when it has been seen with a product `scope`
    /// admits. PAN hits are kept regardless: PAN identifies the person, not
    /// the product line.
    pub async fn find_profile_candidates(
        &self,
        keys: &BTreeSet<MatchKey>,
        scope: &DedupScope,
    ) -> StoreResult<Vec<ProfileCandidate>> {
        let mut by_id: BTreeMap<CanonicalId, ProfileCandidate> = BTreeMap::new();
        for key in keys {
            let profiles = with_timeout(self.timeout, self.store.find_by_match_key(key)).await?;
            for profile in profiles {
                by_id
                    .entry(profile.canonical_id)
                    .or_insert_with(|| ProfileCandidate {
                        profile,
                        matched_on: BTreeSet::new(),
                    })
                    .matched_on
                    .insert(key.key_type);
            }
        }

        let candidates: Vec<ProfileCandidate> = by_id
            .into_values()
            .filter(|candidate| {
                candidate.matched_on.contains(&MatchKeyType::Pan)
                    || scope.admits_any(&candidate.profile.product_types)
            })
            .collect();

        metrics::histogram!(CANDIDATE_COUNT_HISTOGRAM, "entity" => "customer")
            .record(candidates.len() as f64);
        Ok(candidates)
    }

    /// Stored offers in `scope` owned by one of `owner_ids` or issued
    /// against the same customer keys as `offer`. The offer itself is never
    /// its own candidate.
    pub async fn find_offer_candidates(
        &self,
        offer: &OfferRecord,
        owner_ids: BTreeSet<CanonicalId>,
        scope: &DedupScope,
    ) -> StoreResult<Vec<LiveOffer>> {
        let keys = OfferKeys {
            owner_ids,
            match_keys: offer_owner_keys(offer),
        };
        let candidates: Vec<LiveOffer> = with_timeout(
            self.timeout,
            self.store.find_offer_candidates(scope, &keys),
        )
        .await?
        .into_iter()
        .filter(|candidate| candidate.offer_id() != offer.offer_id)
        .collect();

        metrics::histogram!(CANDIDATE_COUNT_HISTOGRAM, "entity" => "offer")
            .record(candidates.len() as f64);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_keys::extract;
    use crate::merge::new_profile;
    use crate::store::InMemoryLiveBookStore;
    use crate::types::{CustomerRecord, ProductType};
    use chrono::Utc;
    use std::collections::HashMap;

    fn record(id: &str, product: ProductType) -> CustomerRecord {
        CustomerRecord {
            source_system: product.as_str().to_string(),
            source_customer_id: id.to_string(),
            first_name: Some("Asha".to_string()),
            middle_name: None,
            last_name: Some("Rao".to_string()),
            date_of_birth: None,
            gender: None,
            mobile: Some("9876543210".to_string()),
            email: Some("asha@example.com".to_string()),
            pan: None,
            aadhaar: None,
            address: None,
            segment: None,
            dnd_flag: None,
            loan_product_type: product,
            received_at: Utc::now(),
            attributes: HashMap::new(),
        }
    }

    async fn search_with(profiles: Vec<CanonicalProfile>) -> CandidateSearch {
        let store = Arc::new(InMemoryLiveBookStore::new());
        for profile in profiles {
            store.save(profile, None).await.unwrap();
        }
        CandidateSearch::new(store, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_candidates_union_key_types() {
        let stored = new_profile(&record("c-1", ProductType::Loyalty), Utc::now());
        let search = search_with(vec![stored.clone()]).await;

        let keys = extract(&record("c-2", ProductType::Loyalty));
        let candidates = search
            .find_profile_candidates(&keys, &DedupScope::all())
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].profile.canonical_id, stored.canonical_id);
        assert_eq!(
            candidates[0].matched_on,
            BTreeSet::from([MatchKeyType::Mobile, MatchKeyType::Email])
        );
        assert!(candidates[0].has_exact_match());
    }

    #[tokio::test]
    async fn test_out_of_scope_profiles_are_dropped_unless_pan_matches() {
        let mut loyalty = record("c-1", ProductType::Loyalty);
        loyalty.pan = Some("ABCDE1234F".to_string());
        let stored = new_profile(&loyalty, Utc::now());
        let search = search_with(vec![stored]).await;
        let top_up_only = DedupScope::products("top_up", BTreeSet::from([ProductType::TopUp]));

        let mut without_pan = record("t-1", ProductType::TopUp);
        without_pan.pan = None;
        let candidates = search
            .find_profile_candidates(&extract(&without_pan), &top_up_only)
            .await
            .unwrap();
        assert!(candidates.is_empty());

        let mut with_pan = without_pan.clone();
        with_pan.pan = Some("abcde1234f".to_string());
        let candidates = search
            .find_profile_candidates(&extract(&with_pan), &top_up_only)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_no_candidates_is_not_an_error() {
        let search = search_with(Vec::new()).await;
        let candidates = search
            .find_profile_candidates(&extract(&record("c-1", ProductType::Loyalty)), &DedupScope::all())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }
}
