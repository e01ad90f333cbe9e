use crate::{CryptoResult, FieldCodec, ENVELOPE_PREFIX};

/// A stored text field that is either legacy plaintext or an encrypted envelope.
///
/// The variant is decided by the `enc:v1:` marker when the value is read from storage, so
/// plaintext that happens to contain colons is never mistaken for ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealedText {
    Plain(String),
    Encrypted(String),
}

impl SealedText {
    /// Classifies a raw stored value.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.starts_with(ENVELOPE_PREFIX) {
            SealedText::Encrypted(raw)
        } else {
            SealedText::Plain(raw)
        }
    }

    /// Encrypts `plaintext` for storage.
    pub fn seal(codec: &dyn FieldCodec, plaintext: &str) -> CryptoResult<Self> {
        codec.encrypt(plaintext).map(SealedText::Encrypted)
    }

    /// Returns the string exactly as persisted.
    pub fn stored(&self) -> &str {
        match self {
            SealedText::Plain(raw) | SealedText::Encrypted(raw) => raw,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, SealedText::Encrypted(_))
    }

    /// Decrypts strictly, surfacing codec failures.
    pub fn try_open(&self, codec: &dyn FieldCodec) -> CryptoResult<String> {
        match self {
            SealedText::Plain(raw) => Ok(raw.clone()),
            SealedText::Encrypted(envelope) => codec.decrypt(envelope),
        }
    }

    /// Decrypts for display, falling back to the raw stored value when decryption fails.
    pub fn open(&self, codec: &dyn FieldCodec) -> String {
        match self.try_open(codec) {
            Ok(plain) => plain,
            Err(e) => {
                tracing::warn!(error = %e, "field decrypt failed, using stored value");
                self.stored().to_owned()
            }
        }
    }
}

impl serde::Serialize for SealedText {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.stored())
    }
}

impl<'de> serde::Deserialize<'de> for SealedText {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SealedText::from_stored(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AesGcmFieldCodec, FieldKey};

    #[test]
    fn colon_plaintext_stays_plain() {
        let value = SealedText::from_stored("Conclusão: ritmo sinusal");
        assert!(!value.is_encrypted());

        let codec = AesGcmFieldCodec::new(&FieldKey::generate());
        assert_eq!(value.open(&codec), "Conclusão: ritmo sinusal");
    }

    #[test]
    fn sealed_value_opens_with_same_key() {
        let codec = AesGcmFieldCodec::new(&FieldKey::generate());
        let sealed = SealedText::seal(&codec, "Dr. Paulo").unwrap();

        assert!(sealed.is_encrypted());
        assert_eq!(sealed.try_open(&codec).unwrap(), "Dr. Paulo");
    }

    #[test]
    fn open_falls_back_to_stored_value() {
        let sealed = SealedText::seal(&AesGcmFieldCodec::new(&FieldKey::generate()), "x").unwrap();
        let other = AesGcmFieldCodec::new(&FieldKey::generate());

        assert!(sealed.try_open(&other).is_err());
        assert_eq!(sealed.open(&other), sealed.stored());
    }

    #[test]
    fn serde_round_trips_through_stored_form() {
        let value = SealedText::from_stored("enc:v1:AAAA");
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "\"enc:v1:AAAA\"");

        let back: SealedText = serde_json::from_str(&json).unwrap();
        assert!(back.is_encrypted());
    }
}
