use chrono::{DateTime, Utc};
use laudo_ids::{ReportId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which version of a report document an object holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Rendered without a digital signature.
    Original,
    /// Digitally signed or uploaded signed document.
    #[serde(rename = "assinado")]
    Signed,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Signed => "assinado",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store that holds an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    Primary,
    Legacy,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub key: String,
    /// Signed URL for primary objects, public CDN URL for legacy ones.
    pub url: String,
    pub location: StorageLocation,
    pub size_bytes: u64,
}

/// Builds the object key for an artifact.
///
/// The filename is reduced to `[A-Za-z0-9._-]` and prefixed with a millisecond timestamp so
/// that re-uploads never overwrite a previous object.
pub fn artifact_key(
    tenant_id: TenantId,
    report_id: ReportId,
    kind: ArtifactKind,
    filename: &str,
    at: DateTime<Utc>,
) -> String {
    format!(
        "laudos/{tenant_id}/{report_id}/{kind}/{}_{}",
        at.format("%Y%m%d%H%M%S%3f"),
        sanitize_filename(filename, report_id)
    )
}

fn sanitize_filename(filename: &str, report_id: ReportId) -> String {
    let cleaned: String = filename
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        format!("laudo_{report_id}.pdf")
    } else {
        cleaned.to_owned()
    }
}
