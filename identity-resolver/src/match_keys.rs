//! Normalized, comparable keys derived from customer and offer records.
//!
//! Extraction never fails: a missing or unusable source field simply
//! contributes no key.

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{CanonicalProfile, CustomerRecord, OfferRecord};

static PAN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{5}[0-9]{4}[A-Z]$").expect("PAN pattern is valid"));

const MOBILE_DIGITS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchKeyType {
    Pan,
    Mobile,
    Email,
    NameDob,
}

impl MatchKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKeyType::Pan => "pan",
            MatchKeyType::Mobile => "mobile",
            MatchKeyType::Email => "email",
            MatchKeyType::NameDob => "name_dob",
        }
    }

    /// PAN and mobile hits are exact identity matches; email and name+DOB
    /// are partial.
    pub fn is_exact(&self) -> bool {
        matches!(self, MatchKeyType::Pan | MatchKeyType::Mobile)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatchKey {
    pub key_type: MatchKeyType,
    pub normalized_value: String,
}

impl MatchKey {
    pub fn new(key_type: MatchKeyType, normalized_value: impl Into<String>) -> Self {
        Self {
            key_type,
            normalized_value: normalized_value.into(),
        }
    }

    pub fn pan(raw: &str) -> Option<Self> {
        normalize_pan(raw).map(|value| Self::new(MatchKeyType::Pan, value))
    }

    pub fn mobile(raw: &str) -> Option<Self> {
        normalize_mobile(raw).map(|value| Self::new(MatchKeyType::Mobile, value))
    }

    pub fn email(raw: &str) -> Option<Self> {
        normalize_email(raw).map(|value| Self::new(MatchKeyType::Email, value))
    }

    pub fn name_dob(name: &str, date_of_birth: NaiveDate) -> Self {
        Self::new(
            MatchKeyType::NameDob,
            format!("{}|{}", name, date_of_birth.format("%Y-%m-%d")),
        )
    }

    /// Identifier used for advisory locking on this key.
    pub fn lock_id(&self) -> String {
        format!("{}:{}", self.key_type.as_str(), self.normalized_value)
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key_type.as_str(), self.normalized_value)
    }
}

fn non_blank(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Uppercased, trimmed PAN. Values that do not have the PAN shape are
/// treated as absent.
pub fn normalize_pan(raw: &str) -> Option<String> {
    let pan = non_blank(raw)?.to_ascii_uppercase();
    PAN_SHAPE.is_match(&pan).then_some(pan)
}

/// Digits only, last ten. Fewer than ten digits is not a usable number.
pub fn normalize_mobile(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MOBILE_DIGITS {
        return None;
    }
    Some(digits[digits.len() - MOBILE_DIGITS..].to_string())
}

pub fn normalize_email(raw: &str) -> Option<String> {
    non_blank(raw).map(str::to_lowercase)
}

/// Lowercased alphabetic tokens of all name parts, single-space joined.
pub fn normalize_name<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    let tokens: Vec<String> = parts
        .into_iter()
        .flatten()
        .flat_map(|part| part.split(|c: char| !c.is_alphabetic()))
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect();
    (!tokens.is_empty()).then(|| tokens.join(" "))
}

fn name_dob_key(
    first: Option<&str>,
    middle: Option<&str>,
    last: Option<&str>,
    date_of_birth: Option<NaiveDate>,
) -> Option<MatchKey> {
    let name = normalize_name([first, middle, last])?;
    Some(MatchKey::name_dob(&name, date_of_birth?))
}

/// Match keys of an incoming customer record.
///
/// The name+DOB composite is only derived when PAN, mobile and email are
/// all absent.
pub fn extract(record: &CustomerRecord) -> BTreeSet<MatchKey> {
    let mut keys = BTreeSet::new();
    keys.extend(record.pan.as_deref().and_then(MatchKey::pan));
    keys.extend(record.mobile.as_deref().and_then(MatchKey::mobile));
    keys.extend(record.email.as_deref().and_then(MatchKey::email));

    if keys.is_empty() {
        keys.extend(name_dob_key(
            record.first_name.as_deref(),
            record.middle_name.as_deref(),
            record.last_name.as_deref(),
            record.date_of_birth,
        ));
    }
    keys
}

/// Keys a stored profile is indexed under. Unlike [`extract`], the name+DOB
/// composite is always included so key-poor records can still find it.
pub fn profile_keys(profile: &CanonicalProfile) -> BTreeSet<MatchKey> {
    let mut keys = BTreeSet::new();
    keys.extend(profile.pan.as_deref().and_then(MatchKey::pan));
    keys.extend(profile.mobile.as_deref().and_then(MatchKey::mobile));
    keys.extend(profile.email.as_deref().and_then(MatchKey::email));
    keys.extend(name_dob_key(
        profile.first_name.as_deref(),
        profile.middle_name.as_deref(),
        profile.last_name.as_deref(),
        profile.date_of_birth,
    ));
    keys
}

/// Customer keys an offer was issued against.
pub fn offer_owner_keys(offer: &OfferRecord) -> BTreeSet<MatchKey> {
    let mut keys = BTreeSet::new();
    keys.extend(offer.owner_pan.as_deref().and_then(MatchKey::pan));
    keys.extend(offer.owner_mobile.as_deref().and_then(MatchKey::mobile));
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProductType;
    use chrono::Utc;
    use std::collections::HashMap;
    use test_case::test_case;

    fn record() -> CustomerRecord {
        CustomerRecord {
            source_system: "loyalty".to_string(),
            source_customer_id: "c-1".to_string(),
            first_name: Some("Asha".to_string()),
            middle_name: None,
            last_name: Some("Rao".to_string()),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 12),
            gender: None,
            mobile: None,
            email: None,
            pan: None,
            aadhaar: None,
            address: None,
            segment: None,
            dnd_flag: None,
            loan_product_type: ProductType::Loyalty,
            received_at: Utc::now(),
            attributes: HashMap::new(),
        }
    }

    #[test_case(" abcde1234f " => Some("ABCDE1234F".to_string()); "trims and uppercases")]
    #[test_case("ABCDE1234" => None; "too short")]
    #[test_case("1BCDE1234F" => None; "wrong shape")]
    #[test_case("   " => None; "blank")]
    fn test_normalize_pan(raw: &str) -> Option<String> {
        normalize_pan(raw)
    }

    #[test_case("+91 98765-43210" => Some("9876543210".to_string()); "country code stripped")]
    #[test_case("9876543210" => Some("9876543210".to_string()); "plain")]
    #[test_case("98765" => None; "too few digits")]
    fn test_normalize_mobile(raw: &str) -> Option<String> {
        normalize_mobile(raw)
    }

    #[test]
    fn test_email_is_lowercased() {
        assert_eq!(
            normalize_email("  Asha.Rao@Example.COM "),
            Some("asha.rao@example.com".to_string())
        );
    }

    #[test]
    fn test_name_dob_only_when_contact_keys_absent() {
        let keys = extract(&record());
        assert_eq!(keys.len(), 1);
        let key = keys.iter().next().unwrap();
        assert_eq!(key.key_type, MatchKeyType::NameDob);
        assert_eq!(key.normalized_value, "asha rao|1990-04-12");

        let mut with_mobile = record();
        with_mobile.mobile = Some("9876543210".to_string());
        let keys = extract(&with_mobile);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.iter().next().unwrap().key_type, MatchKeyType::Mobile);
    }

    #[test]
    fn test_invalid_pan_contributes_no_key() {
        let mut r = record();
        r.pan = Some("NOT-A-PAN".to_string());
        r.email = Some("a@b.in".to_string());
        let keys = extract(&r);
        assert!(keys.iter().all(|k| k.key_type != MatchKeyType::Pan));
        assert!(keys.iter().any(|k| k.key_type == MatchKeyType::Email));
    }

    #[test]
    fn test_missing_everything_yields_no_keys() {
        let mut r = record();
        r.date_of_birth = None;
        assert!(extract(&r).is_empty());
    }

    #[test]
    fn test_name_normalization_collapses_punctuation() {
        assert_eq!(
            normalize_name([Some(" Asha-Devi "), None, Some("RAO.")]),
            Some("asha devi rao".to_string())
        );
        assert_eq!(normalize_name([None, Some(" ")]), None);
    }
}
