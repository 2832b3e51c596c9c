//! The allowed identity set.
//!
//! Identities are 16-byte tokens shown in the canonical lower-case dashed
//! form (`78829655-59f6-466b-897d-ea351d4ec82b`). The set is built once from
//! configuration and only ever read afterwards.

use subtle::{Choice, ConstantTimeEq};
use uuid::Uuid;

use crate::config::AuthConfig;

/// Ordered list of identities allowed to open sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySet {
    entries: Vec<String>,
}

impl IdentitySet {
    /// Build a set from raw entries; comma-separated entries are split.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let raw: Vec<String> = entries.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self {
            entries: split_entries(&raw).map(str::to_string).collect(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.identities)
    }

    /// Exact match of a canonical identity against the trimmed entries.
    ///
    /// Every entry is compared in constant time, with no early exit on a match.
    pub fn contains(&self, canonical: &str) -> bool {
        let found = self.entries.iter().fold(Choice::from(0u8), |found, entry| {
            found | entry.trim().as_bytes().ct_eq(canonical.as_bytes())
        });
        bool::from(found)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

/// Flatten configured entries, splitting on commas and trimming whitespace.
pub(crate) fn split_entries(list: &[String]) -> impl Iterator<Item = &str> {
    list.iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
}

/// Render 16 identity bytes in canonical dashed form.
pub fn canonical_identity(bytes: &[u8; 16]) -> String {
    Uuid::from_bytes(*bytes).hyphenated().to_string()
}

/// Structural check of a canonical rendering: 36 chars, dashes at 8/13/18/23,
/// lower-case hex elsewhere.
pub(crate) fn is_well_formed(canonical: &str) -> bool {
    canonical.len() == 36
        && canonical.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_digit() || (b'a'..=b'f').contains(&b),
        })
}
