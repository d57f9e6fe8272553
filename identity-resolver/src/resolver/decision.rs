//! Pure duplicate decisions over already-fetched candidates.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::candidates::ProfileCandidate;
use crate::fuzzy::FuzzyScorer;
use crate::match_keys::{normalize_pan, MatchKeyType};
use crate::rules::FiredRule;
use crate::types::{CustomerRecord, DeduplicationResult, LiveOffer, OfferRecord, Strategy};

/// Most recently updated first, then lowest id.
fn recency_then_id<T: Ord>(a: (&DateTime<Utc>, T), b: (&DateTime<Utc>, T)) -> Ordering {
    b.0.cmp(a.0).then_with(|| a.1.cmp(&b.1))
}

/// Two different non-null PANs mean two different people, whatever else
/// matched.
fn pan_conflicts(record_pan: Option<&str>, candidate: &ProfileCandidate) -> bool {
    match (record_pan, candidate.profile.pan.as_deref()) {
        (Some(incoming), Some(existing)) => incoming != existing,
        _ => false,
    }
}

/// Decides whether `record` is a duplicate of one of `candidates`.
///
/// Exact (PAN/mobile) hits win outright. Partial hits only count when
/// `rule` authorizes fuzzy matching and the scorer reaches the threshold.
pub fn decide_customer(
    record: &CustomerRecord,
    candidates: &[ProfileCandidate],
    rule: Option<&FiredRule>,
    scorer: &dyn FuzzyScorer,
    default_threshold: f64,
    scope: &str,
) -> DeduplicationResult {
    let record_pan = record.pan.as_deref().and_then(normalize_pan);
    let eligible: Vec<&ProfileCandidate> = candidates
        .iter()
        .filter(|candidate| !pan_conflicts(record_pan.as_deref(), candidate))
        .collect();

    // A PAN hit outranks any mobile-only hit; merging into the mobile
    // owner would hand it a PAN another profile already holds.
    let pan_matched = eligible
        .iter()
        .any(|candidate| candidate.matched_on.contains(&MatchKeyType::Pan));
    let exact = eligible
        .iter()
        .filter(|candidate| {
            if pan_matched {
                candidate.matched_on.contains(&MatchKeyType::Pan)
            } else {
                candidate.has_exact_match()
            }
        })
        .min_by(|a, b| {
            recency_then_id(
                (&a.profile.updated_at, a.profile.canonical_id),
                (&b.profile.updated_at, b.profile.canonical_id),
            )
        });
    if let Some(candidate) = exact {
        return DeduplicationResult::duplicate(
            candidate.profile.canonical_id,
            Strategy::ExactKey,
            1.0,
            scope,
        );
    }

    let Some(rule) = rule.filter(|rule| rule.allows_fuzzy_match()) else {
        return DeduplicationResult::unique(scope);
    };
    let threshold = rule.fuzzy_threshold().unwrap_or(default_threshold);

    let best = eligible
        .iter()
        .map(|candidate| (scorer.score(record, &candidate.profile), *candidate))
        .filter(|(score, _)| *score >= threshold)
        .min_by(|(score_a, a), (score_b, b)| {
            score_b.total_cmp(score_a).then_with(|| {
                recency_then_id(
                    (&a.profile.updated_at, a.profile.canonical_id),
                    (&b.profile.updated_at, b.profile.canonical_id),
                )
            })
        });

    match best {
        Some((score, candidate)) => DeduplicationResult::duplicate(
            candidate.profile.canonical_id,
            Strategy::RuleAuthorizedFuzzy,
            score,
            scope,
        ),
        None => DeduplicationResult::unique(scope),
    }
}

/// The value an offer is matched on: loan id, else campaign id, else
/// nothing beyond the shared owner.
fn offer_key(offer: &OfferRecord) -> (Option<&str>, Option<&str>) {
    match offer.loan_id.as_deref() {
        Some(loan_id) => (Some(loan_id), None),
        None => (None, offer.campaign_id.as_deref()),
    }
}

/// Decides whether `offer` duplicates one of `candidates`, all of which
/// already share its owner and scope group.
pub fn decide_offer(
    offer: &OfferRecord,
    candidates: &[LiveOffer],
    scope: &str,
) -> DeduplicationResult<String> {
    let matches_key = |candidate: &&LiveOffer| match offer_key(offer) {
        (Some(loan_id), _) => candidate.record.loan_id.as_deref() == Some(loan_id),
        (None, Some(campaign_id)) => candidate.record.campaign_id.as_deref() == Some(campaign_id),
        (None, None) => true,
    };

    candidates
        .iter()
        .filter(matches_key)
        .min_by(|a, b| recency_then_id((&a.updated_at, a.offer_id()), (&b.updated_at, b.offer_id())))
        .map(|candidate| {
            DeduplicationResult::duplicate(
                candidate.offer_id().to_string(),
                Strategy::ExactKey,
                1.0,
                scope,
            )
        })
        .unwrap_or_else(|| DeduplicationResult::unique(scope))
}
