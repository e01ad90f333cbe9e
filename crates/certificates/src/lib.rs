//! Physician signing certificates.
//!
//! - [`CertificateAnalyzer`] opens a PKCS#12 container and extracts the leaf certificate, its
//!   private key and descriptive metadata.
//! - [`CertificateStore`] registers one active certificate per physician, keeps the container
//!   encrypted at rest and hands decrypted material to the signing pipeline.
//! - [`DevCertificate`] issues self-signed PKCS#12 files for development and tests.

mod analyzer;
mod issue;
mod repository;
mod store;

pub use analyzer::{CertificateAnalyzer, CertificateBundle, CertificateInfo};
pub use issue::DevCertificate;
pub use repository::{
    CertificateFailure, CertificateRecord, CertificateRepository, InMemoryCertificateRepository,
};
pub use store::{CertificateStore, CertificateSummary, SigningMaterial};

use laudo_crypto::CryptoError;

/// Errors raised while analysing, registering or loading certificates.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("wrong certificate password")]
    WrongPassword,

    #[error("certificate container has no private key")]
    MissingKey,

    #[error("certificate container has no certificate")]
    MissingCertificate,

    #[error("physician already has an active certificate")]
    AlreadyActive,

    #[error("certificate expired")]
    Expired,

    #[error("certificate already registered")]
    DuplicateFingerprint,

    #[error("physician has no active certificate")]
    NoActiveCertificate,

    #[error("certificate not found")]
    NotFound,

    #[error("failed to generate certificate: {0}")]
    Generation(String),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("certificate repository failure: {0}")]
    Repository(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("certificate material I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type CertificateResult<T> = Result<T, CertificateError>;
