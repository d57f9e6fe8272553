//! Field-level merge policy for canonical profiles.
//!
//! Every field is handled explicitly:
//!
//! | field                       | policy                                        |
//! |-----------------------------|-----------------------------------------------|
//! | canonical id                | never changes                                 |
//! | PAN                         | set once; a different incoming PAN is an error |
//! | mobile, email, address      | incoming wins when present and different      |
//! | segment                     | incoming wins when present                    |
//! | dnd flag                    | incoming wins when present                    |
//! | name, date of birth, gender | filled when absent, otherwise retained        |
//! | product types               | union                                         |
//! | provenance                  | appended, never truncated                     |
//! | version                     | +1 per merge                                  |
//!
//! Merging is pure; persisting the result is the live book's job.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::match_keys::{normalize_email, normalize_mobile, normalize_pan};
use crate::types::{CanonicalId, CanonicalProfile, CustomerRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("profile {canonical_id} has PAN {existing}, incoming record carries {incoming}")]
    ConflictingPan {
        canonical_id: CanonicalId,
        existing: String,
        incoming: String,
    },
    #[error("profile {0} version counter overflowed")]
    VersionOverflow(CanonicalId),
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Incoming wins when present and different, otherwise the existing value
/// is kept.
fn prefer_incoming(existing: &Option<String>, incoming: Option<String>) -> Option<String> {
    match incoming {
        Some(value) if existing.as_deref() != Some(value.as_str()) => Some(value),
        _ => existing.clone(),
    }
}

fn fill_if_absent<T: Clone>(existing: &Option<T>, incoming: Option<T>) -> Option<T> {
    existing.clone().or(incoming)
}

/// Builds the first version of a profile from a record nobody matched.
pub fn new_profile(record: &CustomerRecord, now: DateTime<Utc>) -> CanonicalProfile {
    CanonicalProfile {
        canonical_id: CanonicalId::generate(),
        first_name: clean(record.first_name.as_deref()),
        middle_name: clean(record.middle_name.as_deref()),
        last_name: clean(record.last_name.as_deref()),
        date_of_birth: record.date_of_birth,
        gender: clean(record.gender.as_deref()),
        mobile: record.mobile.as_deref().and_then(normalize_mobile),
        email: record.email.as_deref().and_then(normalize_email),
        pan: record.pan.as_deref().and_then(normalize_pan),
        address: clean(record.address.as_deref()),
        segment: clean(record.segment.as_deref()),
        dnd_flag: record.dnd_flag.unwrap_or(false),
        product_types: BTreeSet::from([record.loan_product_type]),
        version: 1,
        provenance: vec![record.provenance()],
        created_at: now,
        updated_at: now,
    }
}

/// Combines an existing profile with an incoming record that was resolved
/// as the same customer.
pub fn merge(
    existing: &CanonicalProfile,
    incoming: &CustomerRecord,
    now: DateTime<Utc>,
) -> Result<CanonicalProfile, MergeError> {
    let incoming_pan = incoming.pan.as_deref().and_then(normalize_pan);
    let pan = match (&existing.pan, incoming_pan) {
        (Some(current), Some(pan)) if *current != pan => {
            return Err(MergeError::ConflictingPan {
                canonical_id: existing.canonical_id,
                existing: current.clone(),
                incoming: pan,
            })
        }
        (current, pan) => fill_if_absent(current, pan),
    };

    let version = existing
        .version
        .checked_add(1)
        .ok_or(MergeError::VersionOverflow(existing.canonical_id))?;

    let mut provenance = existing.provenance.clone();
    if !existing.has_source(&incoming.source_system, &incoming.source_customer_id) {
        provenance.push(incoming.provenance());
    }

    let mut product_types = existing.product_types.clone();
    product_types.insert(incoming.loan_product_type);

    Ok(CanonicalProfile {
        canonical_id: existing.canonical_id,
        first_name: fill_if_absent(&existing.first_name, clean(incoming.first_name.as_deref())),
        middle_name: fill_if_absent(
            &existing.middle_name,
            clean(incoming.middle_name.as_deref()),
        ),
        last_name: fill_if_absent(&existing.last_name, clean(incoming.last_name.as_deref())),
        date_of_birth: fill_if_absent(&existing.date_of_birth, incoming.date_of_birth),
        gender: fill_if_absent(&existing.gender, clean(incoming.gender.as_deref())),
        mobile: prefer_incoming(
            &existing.mobile,
            incoming.mobile.as_deref().and_then(normalize_mobile),
        ),
        email: prefer_incoming(
            &existing.email,
            incoming.email.as_deref().and_then(normalize_email),
        ),
        pan,
        address: prefer_incoming(&existing.address, clean(incoming.address.as_deref())),
        segment: prefer_incoming(&existing.segment, clean(incoming.segment.as_deref())),
        dnd_flag: incoming.dnd_flag.unwrap_or(existing.dnd_flag),
        product_types,
        version,
        provenance,
        created_at: existing.created_at,
        updated_at: now,
    })
}
