//! Primary/legacy reconciliation for report artifacts.
//!
//! Writes go to the primary store first and fall back to the legacy store. Reads, URL
//! resolution and deletes look in the primary store first and then in the legacy store, so
//! artifacts written by either path stay reachable through the same key.

use crate::artifact::{artifact_key, ArtifactKind, StorageLocation, StoredArtifact};
use crate::signer::UrlSigner;
use crate::{StorageError, StorageResult};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use laudo_ids::{ReportId, TenantId};
use object_store::path::Path;
use object_store::ObjectStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Secondary store whose objects are served from a public base URL.
#[derive(Clone)]
pub struct LegacyStore {
    pub store: Arc<dyn ObjectStore>,
    pub public_base_url: String,
}

impl LegacyStore {
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: &str) -> Self {
        Self {
            store,
            public_base_url: public_base_url.trim_end_matches('/').to_owned(),
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

/// Bytes of an artifact, streamed from whichever store holds it.
pub struct ArtifactStream {
    pub location: StorageLocation,
    pub size_bytes: u64,
    pub stream: BoxStream<'static, StorageResult<Bytes>>,
}

impl std::fmt::Debug for ArtifactStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStream")
            .field("location", &self.location)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// Stores report PDFs across the primary and legacy object stores.
///
/// Every store call is bounded by `timeout`. A timed-out call counts as a failure of that
/// store and triggers the same fallback as any other error.
#[derive(Clone)]
pub struct StorageReconciler {
    primary: Arc<dyn ObjectStore>,
    legacy: Option<LegacyStore>,
    signer: Arc<dyn UrlSigner>,
    timeout: Duration,
    default_ttl: Duration,
}

impl StorageReconciler {
    /// Creates a reconciler.
    ///
    /// # Arguments
    ///
    /// * `primary` - Private store; objects are exposed only via `signer`.
    /// * `legacy` - Optional public fallback store.
    /// * `signer` - Produces time-boxed URLs for primary objects.
    /// * `timeout` - Upper bound for each individual store call.
    /// * `default_ttl` - Lifetime of the URL returned by [`persist`](Self::persist).
    pub fn new(
        primary: Arc<dyn ObjectStore>,
        legacy: Option<LegacyStore>,
        signer: Arc<dyn UrlSigner>,
        timeout: Duration,
        default_ttl: Duration,
    ) -> Self {
        Self {
            primary,
            legacy,
            signer,
            timeout,
            default_ttl,
        }
    }

    /// Uploads an artifact, falling back to the legacy store if the primary fails.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Document content.
    /// * `report_id` / `tenant_id` - Namespace of the key.
    /// * `kind` - `original` or `assinado`.
    /// * `filename` - Base filename; sanitized and prefixed with a timestamp.
    ///
    /// # Returns
    ///
    /// The key, a URL for immediate access and the store that accepted the upload.
    ///
    /// # Errors
    ///
    /// - [`StorageError::UploadFailed`] if both stores failed (or the primary failed and no
    ///   legacy store is configured).
    /// - [`StorageError::Backend`] if the primary accepted the upload but no URL could be
    ///   signed for it. The uploaded object is removed first.
    pub async fn persist(
        &self,
        bytes: Vec<u8>,
        report_id: ReportId,
        tenant_id: TenantId,
        kind: ArtifactKind,
        filename: &str,
    ) -> StorageResult<StoredArtifact> {
        let key = artifact_key(tenant_id, report_id, kind, filename, Utc::now());
        let path = parse_key(&key)?;
        let size_bytes = bytes.len() as u64;
        let payload = Bytes::from(bytes);

        let primary_error = match self
            .bounded("primary put", self.primary.put(&path, payload.clone()))
            .await
        {
            Ok(_) => {
                tracing::info!(key = %key, size = size_bytes, "artifact stored in primary store");
                let url = match self.signer.signed_url(&key, self.default_ttl).await {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::error!(key = %key, error = %e, "no access URL for stored artifact, removing it");
                        if let Err(cleanup) =
                            self.bounded("primary delete", self.primary.delete(&path)).await
                        {
                            tracing::warn!(key = %key, error = %cleanup, "failed to remove unreachable artifact");
                        }
                        return Err(StorageError::Backend(format!(
                            "artifact stored but no access URL could be issued: {e}"
                        )));
                    }
                };
                return Ok(StoredArtifact {
                    key,
                    url,
                    location: StorageLocation::Primary,
                    size_bytes,
                });
            }
            Err(e) => e,
        };

        tracing::warn!(key = %key, error = %primary_error, "primary upload failed, trying legacy store");

        let Some(legacy) = &self.legacy else {
            return Err(StorageError::UploadFailed {
                primary: primary_error.to_string(),
                legacy: "not configured".into(),
            });
        };

        match self
            .bounded("legacy put", legacy.store.put(&path, payload))
            .await
        {
            Ok(_) => {
                tracing::info!(key = %key, size = size_bytes, "artifact stored in legacy store");
                Ok(StoredArtifact {
                    url: legacy.public_url(&key),
                    key,
                    location: StorageLocation::Legacy,
                    size_bytes,
                })
            }
            Err(legacy_error) => {
                tracing::error!(key = %key, error = %legacy_error, "legacy upload failed");
                Err(StorageError::UploadFailed {
                    primary: primary_error.to_string(),
                    legacy: legacy_error.to_string(),
                })
            }
        }
    }

    /// Returns a URL for reading `key`.
    ///
    /// Primary objects always get a signed URL valid for `ttl`; a permanent URL is only ever
    /// returned for objects that exist solely in the legacy store.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no store holds the key.
    /// - [`StorageError::InvalidKey`] if the key is not a valid object path.
    pub async fn get_access_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        match self.locate(key).await? {
            StorageLocation::Primary => self.signer.signed_url(key, ttl).await,
            StorageLocation::Legacy => match &self.legacy {
                Some(legacy) => Ok(legacy.public_url(key)),
                None => Err(StorageError::NotFound(key.to_owned())),
            },
        }
    }

    /// Deletes `key` from every store that holds it.
    ///
    /// Callers cleaning up superseded artifacts treat the error as advisory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if no store held the key, or the backend error of a
    /// failed delete.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = parse_key(key)?;
        let mut deleted = false;

        if self.exists(&self.primary, &path).await? {
            self.bounded("primary delete", self.primary.delete(&path))
                .await?;
            deleted = true;
        }
        if let Some(legacy) = &self.legacy {
            if self.exists(&legacy.store, &path).await? {
                self.bounded("legacy delete", legacy.store.delete(&path))
                    .await?;
                deleted = true;
            }
        }

        if deleted {
            tracing::info!(key = %key, "artifact deleted");
            Ok(())
        } else {
            Err(StorageError::NotFound(key.to_owned()))
        }
    }

    /// Opens `key` for streaming without buffering the whole object.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if no store holds the key.
    pub async fn open_stream(&self, key: &str) -> StorageResult<ArtifactStream> {
        let location = self.locate(key).await?;
        let store = match (location, &self.legacy) {
            (StorageLocation::Legacy, Some(legacy)) => &legacy.store,
            _ => &self.primary,
        };
        let path = parse_key(key)?;
        let result = self.bounded("get", store.get(&path)).await?;
        let size_bytes = result.meta.size as u64;
        let stream = result
            .into_stream()
            .map(|chunk| chunk.map_err(map_store_error))
            .boxed();

        Ok(ArtifactStream {
            location,
            size_bytes,
            stream,
        })
    }

    /// Reads a whole artifact into memory.
    pub async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        let mut opened = self.open_stream(key).await?;
        let mut out = Vec::with_capacity(opened.size_bytes as usize);
        while let Some(chunk) = opened.stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Finds the store holding `key`, preferring the primary.
    async fn locate(&self, key: &str) -> StorageResult<StorageLocation> {
        let path = parse_key(key)?;

        let primary_error = match self.exists(&self.primary, &path).await {
            Ok(true) => return Ok(StorageLocation::Primary),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "primary lookup failed, checking legacy store");
                Some(e)
            }
        };

        if let Some(legacy) = &self.legacy {
            if self.exists(&legacy.store, &path).await? {
                return Ok(StorageLocation::Legacy);
            }
        }

        match primary_error {
            Some(e) => Err(e),
            None => Err(StorageError::NotFound(key.to_owned())),
        }
    }

    async fn exists(&self, store: &Arc<dyn ObjectStore>, path: &Path) -> StorageResult<bool> {
        match self.bounded("head", store.head(path)).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn bounded<T, F>(&self, operation: &str, future: F) -> StorageResult<T>
    where
        F: Future<Output = object_store::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result.map_err(map_store_error),
            Err(_) => Err(StorageError::Timeout(format!(
                "{operation} exceeded {:?}",
                self.timeout
            ))),
        }
    }
}

fn parse_key(key: &str) -> StorageResult<Path> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".into()));
    }
    Path::parse(key).map_err(|e| StorageError::InvalidKey(e.to_string()))
}

fn map_store_error(error: object_store::Error) -> StorageError {
    match error {
        object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
        other => StorageError::Backend(other.to_string()),
    }
}
