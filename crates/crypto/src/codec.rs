use crate::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Marker that prefixes every encrypted field value.
pub const ENVELOPE_PREFIX: &str = "enc:v1:";

const NONCE_SIZE: usize = 12;

/// Opaque encrypt/decrypt primitive applied at the persistence boundary.
///
/// String methods produce and consume the textual envelope; byte methods produce the raw
/// `nonce || ciphertext` form used for certificate material on disk.
pub trait FieldCodec: Send + Sync {
    /// Encrypts `plaintext` into an `enc:v1:` envelope.
    fn encrypt(&self, plaintext: &str) -> CryptoResult<String>;

    /// Decrypts an `enc:v1:` envelope back to plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidData`] when the marker is missing or the payload is not
    /// base64, and [`CryptoError::DecryptionFailed`] when authentication fails.
    fn decrypt(&self, envelope: &str) -> CryptoResult<String>;

    fn encrypt_bytes(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    fn decrypt_bytes(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>>;
}

/// AES-256 key, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FieldKey([u8; 32]);

impl FieldKey {
    /// Generates a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Builds a key from exactly 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidData`] for any other length.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidData(format!("key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(key))
    }

    /// Decodes a base64 encoded 32 byte key (the `LAUDO_FIELD_KEY` format).
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let mut raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidData(format!("key is not base64: {e}")))?;
        let key = Self::from_bytes(&raw);
        raw.zeroize();
        key
    }
}

impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldKey(..)")
    }
}

/// [`FieldCodec`] backed by AES-256-GCM with a random 96-bit nonce per value.
pub struct AesGcmFieldCodec {
    cipher: Aes256Gcm,
}

impl AesGcmFieldCodec {
    pub fn new(key: &FieldKey) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
        Self { cipher }
    }
}

impl FieldCodec for AesGcmFieldCodec {
    fn encrypt(&self, plaintext: &str) -> CryptoResult<String> {
        let sealed = self.encrypt_bytes(plaintext.as_bytes())?;
        Ok(format!("{ENVELOPE_PREFIX}{}", STANDARD.encode(sealed)))
    }

    fn decrypt(&self, envelope: &str) -> CryptoResult<String> {
        let payload = envelope
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| CryptoError::InvalidData("missing envelope marker".into()))?;
        let sealed = STANDARD
            .decode(payload)
            .map_err(|e| CryptoError::InvalidData(format!("envelope is not base64: {e}")))?;
        let plain = self.decrypt_bytes(&sealed)?;
        String::from_utf8(plain)
            .map_err(|e| CryptoError::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
    }

    fn encrypt_bytes(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt_bytes(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() <= NONCE_SIZE {
            return Err(CryptoError::InvalidData(format!(
                "sealed value too short: {} bytes",
                sealed.len()
            )));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> AesGcmFieldCodec {
        AesGcmFieldCodec::new(&FieldKey::generate())
    }

    #[test]
    fn envelope_carries_marker_and_decrypts() {
        let codec = codec();
        let envelope = codec.encrypt("Dra. Ana: cardiologia").unwrap();

        assert!(envelope.starts_with(ENVELOPE_PREFIX));
        assert!(!envelope.contains("cardiologia"));
        assert_eq!(codec.decrypt(&envelope).unwrap(), "Dra. Ana: cardiologia");
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let codec = codec();
        assert_ne!(codec.encrypt("x").unwrap(), codec.encrypt("x").unwrap());
    }

    #[test]
    fn decrypt_with_other_key_fails() {
        let envelope = codec().encrypt("segredo").unwrap();
        let result = codec().decrypt(&envelope);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn decrypt_without_marker_is_invalid() {
        let result = codec().decrypt("aGVsbG8=");
        assert!(matches!(result, Err(CryptoError::InvalidData(_))));
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let result = codec().decrypt_bytes(&[0u8; 5]);
        assert!(matches!(result, Err(CryptoError::InvalidData(_))));
    }

    #[test]
    fn key_from_base64_requires_32_bytes() {
        let good = STANDARD.encode([7u8; 32]);
        assert!(FieldKey::from_base64(&good).is_ok());

        let short = STANDARD.encode([7u8; 16]);
        assert!(matches!(
            FieldKey::from_base64(&short),
            Err(CryptoError::InvalidData(_))
        ));
    }
}
