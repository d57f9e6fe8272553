mod decision;
mod facts;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::candidates::CandidateSearch;
use crate::config::Config;
use crate::error::ResolveError;
use crate::events::{EventPublisher, LiveBookEvent};
use crate::fuzzy::{FuzzyScorer, NameDobScorer};
use crate::lock::{lock_order, KeyLockGuard, KeyLockService};
use crate::match_keys::{extract, offer_owner_keys, profile_keys, MatchKey};
use crate::merge::{merge, new_profile};
use crate::metrics_consts::{
    ILLEGAL_RESOLVER_STATE_COUNTER, RESOLUTION_DURATION_HISTOGRAM, RESOLUTION_FAILURES_COUNTER,
    RESOLUTION_OUTCOME_COUNTER,
};
use crate::rules::{FiredRule, RuleCatalog, RuleEngine};
use crate::scope::{DedupScope, ScopeGroups};
use crate::store::{with_timeout, LiveBookStore, StoreError};
use crate::types::{
    CanonicalId, CanonicalProfile, CustomerRecord, CustomerResolution, DeduplicationResult,
    LiveOffer, OfferRecord, Strategy,
};
use crate::updates::{apply_updates, ProfileUpdate};

use decision::{decide_customer, decide_offer};
use facts::{customer_facts, offer_facts};


/// Source of the attribute-update path in `ProfileUpdated` events.
pub const ATTRIBUTE_UPDATE_SOURCE: &str = "attribute_update";

/// Decides, for each incoming record, whether it is a new entity or a
/// duplicate of one already in the live book, and applies the outcome.
///
/// Every resolution holds advisory locks on all of the record's match keys
/// (sorted, so overlapping acquirers cannot deadlock) from candidate search
/// through persist. Two records for the same customer therefore serialize,
/// and the second one finds the profile the first created. The store's
/// version check stays in force underneath for writers that do not take
/// these locks.
pub struct Resolver {
    store: Arc<dyn LiveBookStore>,
    candidates: CandidateSearch,
    rules: RuleEngine,
    locks: Arc<dyn KeyLockService>,
    events: Arc<dyn EventPublisher>,
    scorer: Arc<dyn FuzzyScorer>,
    scope_groups: ScopeGroups,
    store_timeout: Duration,
    default_fuzzy_threshold: f64,
    max_update_retries: u32,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn LiveBookStore>,
        catalog: Arc<dyn RuleCatalog>,
        locks: Arc<dyn KeyLockService>,
        events: Arc<dyn EventPublisher>,
        scope_groups: ScopeGroups,
        config: &Config,
    ) -> Self {
        Self {
            candidates: CandidateSearch::new(store.clone(), config.store_timeout()),
            store,
            rules: RuleEngine::new(catalog, config.catalog_timeout()),
            locks,
            events,
            scorer: Arc::new(NameDobScorer),
            scope_groups,
            store_timeout: config.store_timeout(),
            default_fuzzy_threshold: config.default_fuzzy_threshold,
            max_update_retries: config.max_conflict_retries,
        }
    }

    /// Replaces the default [`NameDobScorer`].
    pub fn with_scorer(mut self, scorer: Arc<dyn FuzzyScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Resolves a customer record to a canonical profile, creating one when
    /// no existing profile is the same customer.
    ///
    /// Rules are evaluated before anything is locked or written, so a
    /// catalog failure leaves the live book untouched.
    pub async fn resolve_customer(
        &self,
        record: &CustomerRecord,
    ) -> Result<CustomerResolution, ResolveError> {
        let started = Instant::now();
        let result = self.resolve_customer_inner(record).await;
        self.record_outcome("customer", started, result.as_ref().map(|r| {
            (if r.is_new { "created" } else { "merged" }, r.strategy_applied)
        }));
        result
    }

    async fn resolve_customer_inner(
        &self,
        record: &CustomerRecord,
    ) -> Result<CustomerResolution, ResolveError> {
        validate_source_reference(&record.source_system, &record.source_customer_id)?;
        let keys = extract(record);
        if keys.is_empty() {
            return Err(ResolveError::Validation(format!(
                "record {}/{} yields no match key",
                record.source_system, record.source_customer_id
            )));
        }

        let fired = self.rules.evaluate(&customer_facts(record)).await?;
        let rule = self.dedup_rule(&fired, |scope| scope.admits(record.loan_product_type));
        let scope = match rule {
            Some(rule) => self.scope_groups.resolve_tag(rule.scope.as_deref()),
            None => DedupScope::all(),
        };

        let mut lock_ids: Vec<String> = keys.iter().map(MatchKey::lock_id).collect();
        lock_ids.push(source_lock_id(
            &record.source_system,
            &record.source_customer_id,
        ));
        let _guard = self.acquire(lock_ids).await?;

        let decision = match self.find_by_source(record).await? {
            Some(profile) => DeduplicationResult::duplicate(
                profile.canonical_id,
                Strategy::SourceReference,
                1.0,
                scope.label(),
            ),
            None => {
                let candidates = self
                    .candidates
                    .find_profile_candidates(&keys, &scope)
                    .await?;
                decide_customer(
                    record,
                    &candidates,
                    rule,
                    self.scorer.as_ref(),
                    self.default_fuzzy_threshold,
                    scope.label(),
                )
            }
        };

        debug!(
            source_system = %record.source_system,
            source_customer_id = %record.source_customer_id,
            rule_id = rule.map(|r| r.rule_id.as_str()),
            scope = %scope,
            is_duplicate = decision.is_duplicate,
            strategy = %decision.strategy_applied,
            "customer dedup decision"
        );

        if !decision.is_duplicate {
            return self.create_profile(record).await;
        }

        let target = decision.matched_id.ok_or_else(|| {
            self.illegal_state(format!(
                "record {}/{} flagged duplicate ({}) without a target",
                record.source_system, record.source_customer_id, decision.strategy_applied
            ))
        })?;
        let existing = self.load_profile(&target).await?.ok_or_else(|| {
            self.illegal_state(format!(
                "record {}/{} matched profile {target} which cannot be loaded",
                record.source_system, record.source_customer_id
            ))
        })?;

        self.merge_into(existing, record, &decision).await
    }

    async fn create_profile(
        &self,
        record: &CustomerRecord,
    ) -> Result<CustomerResolution, ResolveError> {
        let profile = new_profile(record, Utc::now());
        let saved = with_timeout(self.store_timeout, self.store.save(profile, None)).await?;

        info!(
            canonical_id = %saved.canonical_id,
            source_system = %record.source_system,
            source_customer_id = %record.source_customer_id,
            "created canonical profile"
        );
        self.events.publish(LiveBookEvent::ProfileCreated {
            id: saved.canonical_id,
            source: record.source_system.clone(),
        });

        Ok(CustomerResolution {
            canonical_id: saved.canonical_id,
            is_new: true,
            strategy_applied: Strategy::NoMatch,
            confidence: 0.0,
            profile: saved,
        })
    }

    async fn merge_into(
        &self,
        existing: CanonicalProfile,
        record: &CustomerRecord,
        decision: &DeduplicationResult,
    ) -> Result<CustomerResolution, ResolveError> {
        let merged = merge(&existing, record, Utc::now())?;

        // A replayed record that changes nothing is not written again.
        let profile = if same_content(&existing, &merged) {
            existing
        } else {
            let expected = existing.version;
            let saved = with_timeout(self.store_timeout, self.store.save(merged, Some(expected)))
                .await?;
            info!(
                canonical_id = %saved.canonical_id,
                version = saved.version,
                strategy = %decision.strategy_applied,
                source_system = %record.source_system,
                "merged record into canonical profile"
            );
            self.events.publish(LiveBookEvent::ProfileUpdated {
                id: saved.canonical_id,
                source: record.source_system.clone(),
                reason: decision.strategy_applied.to_string(),
            });
            saved
        };

        Ok(CustomerResolution {
            canonical_id: profile.canonical_id,
            is_new: false,
            strategy_applied: decision.strategy_applied,
            confidence: decision.confidence,
            profile,
        })
    }

    /// Deduplicates an offer within its scope group. A unique offer is
    /// stored; a duplicate is reported and not stored.
    pub async fn resolve_offer(
        &self,
        offer: &OfferRecord,
    ) -> Result<DeduplicationResult<String>, ResolveError> {
        let started = Instant::now();
        let result = self.resolve_offer_inner(offer).await;
        self.record_outcome("offer", started, result.as_ref().map(|r| {
            (if r.is_duplicate { "duplicate" } else { "unique" }, r.strategy_applied)
        }));
        result
    }

    async fn resolve_offer_inner(
        &self,
        offer: &OfferRecord,
    ) -> Result<DeduplicationResult<String>, ResolveError> {
        if offer.offer_id.trim().is_empty() {
            return Err(ResolveError::Validation("offer without offer_id".to_string()));
        }
        let owner_keys = offer_owner_keys(offer);
        if offer.profile_id.is_none() && owner_keys.is_empty() {
            return Err(ResolveError::Validation(format!(
                "offer {} names no owner",
                offer.offer_id
            )));
        }

        let fired = self.rules.evaluate(&offer_facts(offer)).await?;
        let group = self.scope_groups.offer_scope(offer.offer_type);
        let scope = match self.dedup_rule(&fired, |s| s.admits(offer.offer_type)) {
            Some(rule) => {
                let rule_scope = self.scope_groups.resolve_tag(rule.scope.as_deref());
                let scope = group.narrowed_by(&rule_scope);
                debug!(
                    offer_id = %offer.offer_id,
                    rule_id = %rule.rule_id,
                    scope = %scope,
                    "offer dedup rule"
                );
                scope
            }
            None => group.clone(),
        };

        // Locks follow the whole group so narrowed and unnarrowed offers of
        // the same group still serialize.
        let owner_ids = self.offer_owners(offer, &owner_keys).await?;
        let mut lock_ids: Vec<String> = owner_ids
            .iter()
            .map(|id| format!("offer:{}:owner:{id}", group.label()))
            .chain(
                owner_keys
                    .iter()
                    .map(|key| format!("offer:{}:{}", group.label(), key.lock_id())),
            )
            .collect();
        lock_ids.push(format!("offer:id:{}", offer.offer_id));
        let _guard = self.acquire(lock_ids).await?;

        let stored = with_timeout(self.store_timeout, self.store.get_offer(&offer.offer_id)).await?;
        let decision = match stored {
            Some(existing) => DeduplicationResult::duplicate(
                existing.offer_id().to_string(),
                Strategy::SourceReference,
                1.0,
                scope.label(),
            ),
            None => {
                let candidates = self
                    .candidates
                    .find_offer_candidates(offer, owner_ids.clone(), &scope)
                    .await?;
                decide_offer(offer, &candidates, scope.label())
            }
        };

        if decision.is_duplicate {
            let matched = decision.matched_id.clone().ok_or_else(|| {
                self.illegal_state(format!(
                    "offer {} flagged duplicate without a target",
                    offer.offer_id
                ))
            })?;
            info!(
                offer_id = %offer.offer_id,
                matched_offer_id = %matched,
                scope = %scope,
                strategy = %decision.strategy_applied,
                "duplicate offer"
            );
            self.events.publish(LiveBookEvent::OfferDeduplicated {
                offer_id: offer.offer_id.clone(),
                matched_offer_id: matched,
                scope: scope.label().to_string(),
            });
            return Ok(decision);
        }

        let owner_id = offer
            .profile_id
            .or_else(|| owner_ids.iter().next().copied());
        let live = LiveOffer {
            record: offer.clone(),
            owner_id,
            scope_group: group.label().to_string(),
            version: 1,
            updated_at: Utc::now(),
        };
        with_timeout(self.store_timeout, self.store.save_offer(live, None)).await?;

        info!(offer_id = %offer.offer_id, scope = %scope, "stored unique offer");
        self.events.publish(LiveBookEvent::OfferCreated {
            offer_id: offer.offer_id.clone(),
            profile_id: owner_id,
            scope: scope.label().to_string(),
        });
        Ok(decision)
    }

    /// The referenced profile plus every profile holding one of the offer's
    /// owner keys.
    async fn offer_owners(
        &self,
        offer: &OfferRecord,
        owner_keys: &BTreeSet<MatchKey>,
    ) -> Result<BTreeSet<CanonicalId>, ResolveError> {
        let mut owners = BTreeSet::new();
        if let Some(profile_id) = offer.profile_id {
            if self.load_profile(&profile_id).await?.is_none() {
                return Err(ResolveError::ProfileNotFound(profile_id));
            }
            owners.insert(profile_id);
        }
        for key in owner_keys {
            let profiles =
                with_timeout(self.store_timeout, self.store.find_by_match_key(key)).await?;
            owners.extend(profiles.into_iter().map(|p| p.canonical_id));
        }
        Ok(owners)
    }

    /// Applies explicit attribute updates to a profile.
    ///
    /// Locks the profile's keys before and after the update so a concurrent
    /// resolution on either the old or the new mobile/email waits. A version
    /// conflict re-reads and retries a bounded number of times.
    pub async fn update_profile_attributes(
        &self,
        canonical_id: CanonicalId,
        updates: Vec<ProfileUpdate>,
    ) -> Result<CanonicalProfile, ResolveError> {
        let mut attempt = 0;
        loop {
            let current = self
                .load_profile(&canonical_id)
                .await?
                .ok_or(ResolveError::ProfileNotFound(canonical_id))?;
            let updated = apply_updates(&current, &updates, Utc::now())?;

            let lock_ids = profile_keys(&current)
                .union(&profile_keys(&updated))
                .map(MatchKey::lock_id)
                .collect();
            let guard = self.acquire(lock_ids).await?;

            match with_timeout(
                self.store_timeout,
                self.store.save(updated, Some(current.version)),
            )
            .await
            {
                Ok(saved) => {
                    drop(guard);
                    let fields: Vec<&str> = updates.iter().map(ProfileUpdate::field).collect();
                    info!(canonical_id = %canonical_id, version = saved.version, fields = ?fields, "updated profile attributes");
                    self.events.publish(LiveBookEvent::ProfileUpdated {
                        id: canonical_id,
                        source: ATTRIBUTE_UPDATE_SOURCE.to_string(),
                        reason: fields.join(","),
                    });
                    return Ok(saved);
                }
                Err(e @ StoreError::VersionConflict { .. }) if attempt < self.max_update_retries => {
                    attempt += 1;
                    warn!(canonical_id = %canonical_id, attempt, error = %e, "profile changed underneath update, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Highest-priority fired rule that declares dedup and whose scope
    /// admits the record.
    fn dedup_rule<'a>(
        &self,
        fired: &'a [FiredRule],
        admits: impl Fn(&DedupScope) -> bool,
    ) -> Option<&'a FiredRule> {
        fired.iter().find(|rule| {
            rule.declares_dedup() && admits(&self.scope_groups.resolve_tag(rule.scope.as_deref()))
        })
    }

    async fn acquire(&self, lock_ids: Vec<String>) -> Result<KeyLockGuard, ResolveError> {
        Ok(self.locks.acquire(&lock_order(lock_ids)).await?)
    }

    async fn find_by_source(
        &self,
        record: &CustomerRecord,
    ) -> Result<Option<CanonicalProfile>, ResolveError> {
        Ok(with_timeout(
            self.store_timeout,
            self.store
                .find_by_source_reference(&record.source_system, &record.source_customer_id),
        )
        .await?)
    }

    async fn load_profile(
        &self,
        canonical_id: &CanonicalId,
    ) -> Result<Option<CanonicalProfile>, ResolveError> {
        Ok(with_timeout(self.store_timeout, self.store.get_profile(canonical_id)).await?)
    }

    fn illegal_state(&self, context: String) -> ResolveError {
        metrics::counter!(ILLEGAL_RESOLVER_STATE_COUNTER).increment(1);
        error!(context = %context, "illegal resolver state");
        ResolveError::IllegalResolverState { context }
    }

    fn record_outcome(
        &self,
        entity: &'static str,
        started: Instant,
        outcome: Result<(&'static str, Strategy), &ResolveError>,
    ) {
        metrics::histogram!(RESOLUTION_DURATION_HISTOGRAM, "entity" => entity)
            .record(started.elapsed().as_millis() as f64);
        match outcome {
            Ok((outcome, strategy)) => {
                metrics::counter!(
                    RESOLUTION_OUTCOME_COUNTER,
                    "entity" => entity,
                    "outcome" => outcome,
                    "strategy" => strategy.as_str()
                )
                .increment(1);
            }
            Err(e) => {
                metrics::counter!(RESOLUTION_FAILURES_COUNTER, "entity" => entity, "kind" => e.kind())
                    .increment(1);
            }
        }
    }
}

fn validate_source_reference(source_system: &str, source_id: &str) -> Result<(), ResolveError> {
    if source_system.trim().is_empty() || source_id.trim().is_empty() {
        return Err(ResolveError::Validation(
            "record without a source reference".to_string(),
        ));
    }
    Ok(())
}

fn source_lock_id(source_system: &str, source_id: &str) -> String {
    format!("source:{source_system}:{source_id}")
}

/// Equal apart from the bookkeeping a merge always touches.
fn same_content(existing: &CanonicalProfile, merged: &CanonicalProfile) -> bool {
    let mut normalized = merged.clone();
    normalized.version = existing.version;
    normalized.updated_at = existing.updated_at;
    normalized == *existing
}
