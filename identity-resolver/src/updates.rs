//! Explicit attribute updates for an existing canonical profile.
//!
//! The set of updatable fields is closed: an update names its field as a
//! tag, and a tag outside this enum fails to deserialize. PAN is not
//! updatable through this path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::match_keys::{normalize_email, normalize_mobile};
use crate::merge::MergeError;
use crate::types::CanonicalProfile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameUpdate {
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// `{"field": "mobile", "value": "9876543210"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ProfileUpdate {
    Mobile(String),
    Email(String),
    Address(String),
    Segment(String),
    DndFlag(bool),
    Name(NameUpdate),
}

impl ProfileUpdate {
    pub fn field(&self) -> &'static str {
        match self {
            ProfileUpdate::Mobile(_) => "mobile",
            ProfileUpdate::Email(_) => "email",
            ProfileUpdate::Address(_) => "address",
            ProfileUpdate::Segment(_) => "segment",
            ProfileUpdate::DndFlag(_) => "dnd_flag",
            ProfileUpdate::Name(_) => "name",
        }
    }
}

fn required(field: &str, value: &str) -> Result<String, ResolveError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ResolveError::Validation(format!("{field} must not be blank")));
    }
    Ok(value.to_string())
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Applies `updates` in order to a copy of `profile` and bumps its version
/// once. An empty update list is rejected.
pub fn apply_updates(
    profile: &CanonicalProfile,
    updates: &[ProfileUpdate],
    now: DateTime<Utc>,
) -> Result<CanonicalProfile, ResolveError> {
    if updates.is_empty() {
        return Err(ResolveError::Validation("no updates given".to_string()));
    }

    let mut updated = profile.clone();
    for update in updates {
        match update {
            ProfileUpdate::Mobile(raw) => {
                updated.mobile = Some(normalize_mobile(raw).ok_or_else(|| {
                    ResolveError::Validation(format!("{raw:?} is not a usable mobile number"))
                })?);
            }
            ProfileUpdate::Email(raw) => {
                updated.email = Some(
                    normalize_email(raw)
                        .ok_or_else(|| ResolveError::Validation("email must not be blank".to_string()))?,
                );
            }
            ProfileUpdate::Address(address) => {
                updated.address = Some(required("address", address)?);
            }
            ProfileUpdate::Segment(segment) => {
                updated.segment = Some(required("segment", segment)?);
            }
            ProfileUpdate::DndFlag(flag) => updated.dnd_flag = *flag,
            ProfileUpdate::Name(name) => {
                updated.first_name = Some(required("first_name", &name.first_name)?);
                updated.middle_name = optional(name.middle_name.as_deref());
                updated.last_name = optional(name.last_name.as_deref());
            }
        }
    }

    updated.version = profile
        .version
        .checked_add(1)
        .ok_or(MergeError::VersionOverflow(profile.canonical_id))?;
    updated.updated_at = now;
    Ok(updated)
}
