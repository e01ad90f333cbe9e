//! Field-level encryption at rest.
//!
//! Sensitive record fields (conclusions, names, certificate passwords, certificate material
//! paths) are stored through a [`FieldCodec`]. Encrypted values carry an explicit envelope
//! marker so that reading a record never has to guess whether a stored string is ciphertext:
//!
//! ```text
//! enc:v1:<base64(nonce || ciphertext)>
//! ```
//!
//! Values without the marker are legacy plaintext. [`SealedText`] models the two cases and is
//! what persisted records hold instead of raw strings.

mod codec;
mod sealed;

pub use codec::{AesGcmFieldCodec, FieldCodec, FieldKey, ENVELOPE_PREFIX};
pub use sealed::SealedText;

/// Errors raised by field encryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Key material or envelope had the wrong shape
    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
