//! Typed identifiers for laudo entities.
//!
//! Every persisted entity (reports, exams, patients, users, tenants, certificates) is keyed by a
//! UUID. To keep keys deterministic across storage paths, URLs and audit entries, identifiers use
//! a *canonical* representation: **32 lowercase hexadecimal characters** (no hyphens).
//!
//! Each entity gets its own newtype so a [`ReportId`] can never be passed where an [`ExamId`] is
//! expected. All of them share the same parsing and display rules through [`CanonicalUuid`].
//!
//! ## Canonical form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Identifiers arriving from outside (REST paths, CLI arguments) must already be canonical.
//! Uppercase or hyphenated values are rejected rather than normalised.

mod canonical;

pub use canonical::{CanonicalUuid, Uuid};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// Input was not a canonical identifier
    #[error("Invalid identifier: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type IdResult<T> = Result<T, IdError>;

/// Declares a typed identifier wrapping a [`CanonicalUuid`].
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(CanonicalUuid);

        impl $name {
            /// Generates a fresh identifier.
            pub fn new() -> Self {
                Self(CanonicalUuid::new())
            }

            /// Parses an identifier that must already be in canonical form.
            ///
            /// # Errors
            ///
            /// Returns [`IdError::InvalidInput`] if `input` is not 32 lowercase hex characters.
            pub fn parse(input: &str) -> IdResult<Self> {
                CanonicalUuid::parse(input).map(Self)
            }

            /// Returns the underlying UUID.
            pub fn uuid(&self) -> Uuid {
                self.0.uuid()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

define_id!(
    /// Identifier of a medical report (laudo). A redo produces a new `ReportId`.
    ReportId
);
define_id!(
    /// Identifier of an exam.
    ExamId
);
define_id!(
    /// Identifier of a patient.
    PatientId
);
define_id!(
    /// Identifier of a user. Physicians are users, so this also keys physicians.
    UserId
);
define_id!(
    /// Identifier of a tenant (clinic).
    TenantId
);
define_id!(
    /// Identifier of a registered signing certificate.
    CertificateId
);
