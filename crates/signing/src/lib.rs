//! # Laudo Signing
//!
//! Digital signatures for rendered reports.
//!
//! A signature is applied in three steps:
//! 1. a `/Sig` placeholder with a reserved `/Contents` slot is inserted into the PDF,
//! 2. the bytes outside that slot are hashed with SHA-256,
//! 3. a detached CMS `SignedData` over that digest is hex-encoded into the slot.
//!
//! The private key comes from a PKCS#12 container opened with the stored password. Stored
//! passwords are not always captured faithfully, so [`SigningEngine::sign`] retries a fixed
//! list of [`PasswordVariant`]s before giving up.

mod cms;
mod der;
mod engine;
mod inspect;
mod placeholder;

pub use engine::{
    password_variants, PasswordVariant, SignedPdf, SigningEngine, DEFAULT_RESERVE_BYTES,
    MAX_RESERVE_BYTES, MIN_RESERVE_BYTES,
};
pub use inspect::{inspect_signature, SignatureInspection};

/// Descriptive fields written into the signature dictionary.
#[derive(Debug, Clone)]
pub struct SignerMetadata {
    /// Signer display name (`/Name`).
    pub name: String,
    /// Purpose of the signature (`/Reason`).
    pub reason: String,
    /// Where the signature was applied (`/Location`).
    pub location: String,
    pub contact_info: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("PDF cannot be signed: {0}")]
    Pdf(String),
    #[error("unsupported private key: {0}")]
    UnsupportedKey(String),
    #[error("invalid signer certificate: {0}")]
    Certificate(String),
    #[error("signature operation failed: {0}")]
    Crypto(String),
    #[error("signature needs {needed} bytes but only {reserved} are reserved")]
    SignatureTooLarge { needed: usize, reserved: usize },
    #[error("signing failed for all {attempts} password variants: {last}")]
    AllVariantsFailed { attempts: usize, last: String },
    #[error("document has no signature")]
    NotSigned,
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
}

pub type SigningResult<T> = std::result::Result<T, SigningError>;
