//! Small validated value types shared across the laudo crates.

use sha2::{Digest, Sha256};

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input was not a 64 character lowercase hex digest
    #[error("Invalid SHA-256 digest: {0}")]
    InvalidDigest(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
/// Report conclusions, physician names and certificate subjects all go through it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Arguments
    ///
    /// * `input` - Any type that can be converted to a string reference
    ///
    /// # Returns
    ///
    /// Returns `Ok(NonEmptyText)` if the trimmed input is non-empty,
    /// or `Err(TextError::Empty)` if it's empty or contains only whitespace.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper and returns the owned string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Lowercase hex SHA-256 digest.
///
/// Used for certificate fingerprints and content hashes embedded in material file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Hex(String);

impl Sha256Hex {
    /// Computes the digest of `bytes`.
    pub fn digest(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Parses an existing hex digest.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::InvalidDigest`] unless `input` is 64 lowercase hex characters.
    pub fn parse(input: &str) -> Result<Self, TextError> {
        let valid = input.len() == 64
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !valid {
            return Err(TextError::InvalidDigest(input.to_owned()));
        }
        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first `len` hex characters, for use in file names.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl TryFrom<String> for Sha256Hex {
    type Error = TextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Sha256Hex::parse(&value)
    }
}

impl From<Sha256Hex> for String {
    fn from(value: Sha256Hex) -> Self {
        value.0
    }
}

impl std::fmt::Display for Sha256Hex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Masks the middle of a code for public display.
///
/// Keeps the first and last four characters of codes longer than eight characters and
/// replaces the rest with `****`. Shorter codes keep only their first two characters.
pub fn mask_code(code: &str) -> String {
    let chars: Vec<char> = code.trim().chars().collect();
    if chars.is_empty() {
        return "****".to_owned();
    }
    if chars.len() <= 8 {
        let head: String = chars.iter().take(2).collect();
        return format!("{head}****");
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_and_rejects_blank() {
        let text = NonEmptyText::new("  Normal sinus rhythm.\n").unwrap();
        assert_eq!(text.as_str(), "Normal sinus rhythm.");
        assert!(matches!(NonEmptyText::new(" \t\n"), Err(TextError::Empty)));
    }

    #[test]
    fn non_empty_text_deserialize_rejects_empty() {
        let result: Result<NonEmptyText, _> = serde_json::from_str("\"   \"");
        assert!(result.is_err());
    }

    #[test]
    fn digest_matches_known_vector() {
        let digest = Sha256Hex::digest(b"abc");
        assert_eq!(
            digest.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest.short(8), "ba7816bf");
    }

    #[test]
    fn digest_parse_rejects_uppercase() {
        let upper = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        assert!(Sha256Hex::parse(upper).is_err());
    }

    #[test]
    fn mask_code_hides_middle() {
        assert_eq!(
            mask_code("550e8400e29b41d4a716446655440000"),
            "550e****0000"
        );
        assert_eq!(mask_code("ABC123"), "AB****");
        assert_eq!(mask_code(""), "****");
    }
}
