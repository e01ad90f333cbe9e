//! Canonical UUID wrapper shared by every typed identifier.

use crate::{IdError, IdResult};
use std::{fmt, str::FromStr};

/// Re-exported for convenience.
pub use ::uuid::Uuid;

/// Canonical UUID representation (32 lowercase hex characters, no hyphens).
///
/// Once constructed, the contained UUID is guaranteed to display in canonical form, so storage
/// keys and URLs derived from it are stable.
///
/// # Construction
/// - [`CanonicalUuid::new`] generates a fresh random identifier.
/// - [`CanonicalUuid::parse`] validates an externally supplied identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalUuid(Uuid);

impl Default for CanonicalUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl CanonicalUuid {
    /// Generates a new random (version 4) UUID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Validates and parses a UUID string that must already be canonical.
    ///
    /// Hyphenated or uppercase forms are rejected rather than normalised.
    ///
    /// # Arguments
    ///
    /// * `input` - Candidate identifier. Must be exactly 32 lowercase hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if `input` is not in canonical form.
    pub fn parse(input: &str) -> IdResult<Self> {
        if !Self::is_canonical(input) {
            return Err(IdError::InvalidInput(format!(
                "identifier must be 32 lowercase hex characters without hyphens, got: '{}'",
                input
            )));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| IdError::InvalidInput(format!("{input}: {e}")))
    }

    /// Returns the inner UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true if `input` is in canonical form.
    ///
    /// Purely syntactic: exactly 32 bytes, each one of `0-9` or `a-f`.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for CanonicalUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for CanonicalUuid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalUuid::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for CanonicalUuid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for CanonicalUuid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CanonicalUuid::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_generates_canonical_uuid() {
        let id = CanonicalUuid::new();
        let canonical = id.to_string();

        assert_eq!(canonical.len(), 32);
        assert!(CanonicalUuid::is_canonical(&canonical));
    }

    #[test]
    fn test_parse_rejects_uppercase() {
        assert!(CanonicalUuid::parse("550E8400E29B41D4A716446655440000").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(CanonicalUuid::parse("550e8400e29b41d4a71644665544000").is_err());
        assert!(CanonicalUuid::parse("550e8400e29b41d4a7164466554400000").is_err());
    }

    #[test]
    fn test_parse_rejects_invalid_characters() {
        let result = CanonicalUuid::parse("550e8400e29b41d4a716446655440zzz");
        match result {
            Err(IdError::InvalidInput(msg)) => assert!(msg.contains("32 lowercase hex")),
            _ => panic!("Expected InvalidInput error"),
        }
    }

    #[test]
    fn test_is_canonical_edges() {
        assert!(CanonicalUuid::is_canonical("00000000000000000000000000000000"));
        assert!(CanonicalUuid::is_canonical("ffffffffffffffffffffffffffffffff"));
        assert!(!CanonicalUuid::is_canonical(""));
        assert!(!CanonicalUuid::is_canonical(
            "550e8400-e29b-41d4-a716-446655440000"
        ));
    }

    #[test]
    fn test_inner_uuid_matches_display() {
        let id = CanonicalUuid::parse("550e8400e29b41d4a716446655440000").unwrap();
        assert_eq!(
            id.uuid().simple().to_string(),
            "550e8400e29b41d4a716446655440000"
        );
    }
}
