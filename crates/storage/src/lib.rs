//! Laudo Artifact Storage
//!
//! Persists rendered and signed report PDFs.
//!
//! ## Stores
//!
//! - **Primary**: any [`object_store::ObjectStore`], S3 in production. Objects are private and
//!   only ever exposed through time-boxed signed URLs.
//! - **Legacy**: optional secondary store behind a public CDN base URL. Used as a write
//!   fallback when the primary is unavailable and as a read fallback for artifacts written
//!   before the primary existed.
//!
//! ## Key Layout
//!
//! ```text
//! laudos/
//! └── <tenant_id>/
//!     └── <report_id>/
//!         ├── original/
//!         │   └── <timestamp>_laudo_<report_id>.pdf
//!         └── assinado/
//!             └── <timestamp>_laudo_<report_id>.pdf
//! ```

mod artifact;
mod reconciler;
mod signer;

pub use artifact::{artifact_key, ArtifactKind, StorageLocation, StoredArtifact};
pub use reconciler::{ArtifactStream, LegacyStore, StorageReconciler};
pub use signer::{HmacUrlSigner, S3UrlSigner, UrlSigner};

/// Errors that can occur during artifact storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Neither the primary nor the legacy store accepted the upload
    #[error("Upload failed (primary: {primary}; legacy: {legacy})")]
    UploadFailed { primary: String, legacy: String },

    /// Key absent from every store
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// Key is not a valid object path
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// A store call exceeded the configured timeout
    #[error("Storage operation timed out: {0}")]
    Timeout(String),

    /// Signed URL could not be produced or failed verification
    #[error("Signed URL error: {0}")]
    Signature(String),

    /// Any other backend failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
