//! Human-shareable family group codes.
//!
//! A code reads `FAM-XXXXX` with the five characters drawn from an alphabet
//! that omits the visually ambiguous 0/O and 1/I. Parsing normalizes case and
//! whitespace, so a code read aloud or typed from a QR badge survives sloppy
//! entry.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{DEEP_LINK_SCHEME, GROUP_CODE_ALPHABET, GROUP_CODE_LEN, GROUP_CODE_PREFIX};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FamilyGroupCode(String);

impl FamilyGroupCode {
    /// Generate a fresh random code, uniform over the alphabet.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..GROUP_CODE_LEN)
            .map(|_| GROUP_CODE_ALPHABET[rng.gen_range(0..GROUP_CODE_ALPHABET.len())] as char)
            .collect();
        Self(format!("{GROUP_CODE_PREFIX}{suffix}"))
    }

    /// Parse user input into a canonical code.
    ///
    /// Trims surrounding whitespace and uppercases before checking the
    /// prefix, length and charset. Returns `None` for anything that is not
    /// exactly `FAM-` plus five allowed characters.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = input.trim().to_ascii_uppercase();
        let suffix = normalized.strip_prefix(GROUP_CODE_PREFIX)?;
        if suffix.len() != GROUP_CODE_LEN {
            return None;
        }
        if !suffix.bytes().all(|b| GROUP_CODE_ALPHABET.contains(&b)) {
            return None;
        }
        Some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// QR / deep-link form: `lantern://family/FAM-XXXXX`.
    pub fn to_link(&self) -> String {
        format!("{DEEP_LINK_SCHEME}://family/{}", self.0)
    }

    /// Parse a deep link back into a code.
    pub fn from_link(link: &str) -> Option<Self> {
        let rest = link
            .trim()
            .strip_prefix(DEEP_LINK_SCHEME)?
            .strip_prefix("://family/")?;
        Self::parse(rest)
    }
}

impl std::fmt::Display for FamilyGroupCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
