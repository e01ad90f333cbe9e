use laudo_certificates::CertificateError;
use laudo_crypto::CryptoError;
use laudo_ids::IdError;
use laudo_render::RenderError;
use laudo_signing::SigningError;
use laudo_storage::StorageError;
use laudo_types::TextError;
use serde::Serialize;

/// Stable error categories shared with the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Permission,
    Certificate,
    Storage,
    Render,
    Repository,
    Internal,
}

impl ErrorKind {
    /// Whether the message is written for the end user and safe to return in production.
    pub fn is_user_facing(self) -> bool {
        matches!(
            self,
            Self::Validation | Self::NotFound | Self::Conflict | Self::Permission | Self::Certificate
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaudoError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("render error: {0}")]
    Render(String),
    #[error("repository error: {0}")]
    Repository(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type LaudoResult<T> = std::result::Result<T, LaudoError>;

impl LaudoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Permission(_) => ErrorKind::Permission,
            Self::Certificate(_) => ErrorKind::Certificate,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Render(_) => ErrorKind::Render,
            Self::Repository(_) => ErrorKind::Repository,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The message without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Permission(m)
            | Self::Certificate(m)
            | Self::Storage(m)
            | Self::Render(m)
            | Self::Repository(m)
            | Self::Internal(m) => m,
        }
    }
}

impl From<CertificateError> for LaudoError {
    fn from(error: CertificateError) -> Self {
        match error {
            CertificateError::InvalidCertificate(_)
            | CertificateError::WrongPassword
            | CertificateError::MissingKey
            | CertificateError::MissingCertificate => Self::Validation(error.to_string()),
            CertificateError::AlreadyActive | CertificateError::DuplicateFingerprint => {
                Self::Conflict(error.to_string())
            }
            CertificateError::Expired | CertificateError::NoActiveCertificate => {
                Self::Certificate(format!(
                    "{error}; upload the signed document manually instead"
                ))
            }
            CertificateError::NotFound => Self::NotFound(error.to_string()),
            CertificateError::Repository(_) => Self::Repository(error.to_string()),
            CertificateError::Generation(_)
            | CertificateError::PasswordHash(_)
            | CertificateError::Crypto(_)
            | CertificateError::Io(_) => Self::Internal(error.to_string()),
        }
    }
}

impl From<SigningError> for LaudoError {
    fn from(error: SigningError) -> Self {
        Self::Certificate(format!(
            "digital signature failed ({error}); upload the signed document manually instead"
        ))
    }
}

impl From<StorageError> for LaudoError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(_) => Self::NotFound(error.to_string()),
            StorageError::InvalidKey(_) => Self::Validation(error.to_string()),
            _ => Self::Storage(error.to_string()),
        }
    }
}

impl From<RenderError> for LaudoError {
    fn from(error: RenderError) -> Self {
        Self::Render(error.to_string())
    }
}

impl From<CryptoError> for LaudoError {
    fn from(error: CryptoError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<TextError> for LaudoError {
    fn from(error: TextError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<IdError> for LaudoError {
    fn from(error: IdError) -> Self {
        Self::Validation(error.to_string())
    }
}
