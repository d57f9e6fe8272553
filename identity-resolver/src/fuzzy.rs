//! Scoring of partial (email / name+DOB) matches.
//!
//! Partial matches only count when a fired rule authorizes them; the
//! scoring function is injected so deployments can swap it.

use crate::match_keys::{normalize_email, normalize_name};
use crate::types::{CanonicalProfile, CustomerRecord};

pub trait FuzzyScorer: Send + Sync {
    /// Similarity in `[0.0, 1.0]` between an incoming record and a
    /// candidate profile.
    fn score(&self, record: &CustomerRecord, candidate: &CanonicalProfile) -> f64;
}

/// Deterministic scorer over normalized name, date of birth and email.
///
/// | evidence                                   | score |
/// |--------------------------------------------|-------|
/// | same name and same date of birth           | 1.0   |
/// | same email and (same name or same DOB)     | 0.9   |
/// | same email only                            | 0.6   |
/// | same DOB and same surname                  | 0.5   |
/// | anything else                              | 0.0   |
#[derive(Debug, Clone, Copy, Default)]
pub struct NameDobScorer;

impl FuzzyScorer for NameDobScorer {
    fn score(&self, record: &CustomerRecord, candidate: &CanonicalProfile) -> f64 {
        let record_name = normalize_name([
            record.first_name.as_deref(),
            record.middle_name.as_deref(),
            record.last_name.as_deref(),
        ]);
        let candidate_name = normalize_name([
            candidate.first_name.as_deref(),
            candidate.middle_name.as_deref(),
            candidate.last_name.as_deref(),
        ]);
        let same_name = record_name.is_some() && record_name == candidate_name;
        let same_dob = record.date_of_birth.is_some()
            && record.date_of_birth == candidate.date_of_birth;
        let record_email = record.email.as_deref().and_then(normalize_email);
        let same_email = record_email.is_some() && record_email == candidate.email;
        let record_surname = normalize_name([record.last_name.as_deref()]);
        let same_surname =
            record_surname.is_some() && record_surname == normalize_name([candidate.last_name.as_deref()]);

        if same_name && same_dob {
            1.0
        } else if same_email && (same_name || same_dob) {
            0.9
        } else if same_email {
            0.6
        } else if same_dob && same_surname {
            0.5
        } else {
            0.0
        }
    }
}
