use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use object_store::path::Path;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

/// Produces time-boxed URLs for primary-store objects.
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String>;
}

/// Presigned GET URLs from the object store itself (S3 query-string authentication).
#[derive(Clone)]
pub struct S3UrlSigner {
    signer: Arc<dyn object_store::signer::Signer>,
}

impl std::fmt::Debug for S3UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3UrlSigner").finish_non_exhaustive()
    }
}

impl S3UrlSigner {
    pub fn new(signer: Arc<dyn object_store::signer::Signer>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl UrlSigner for S3UrlSigner {
    async fn signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let path = Path::parse(key).map_err(|e| StorageError::InvalidKey(e.to_string()))?;
        let url = self
            .signer
            .signed_url(reqwest::Method::GET, &path, ttl)
            .await
            .map_err(|e| StorageError::Signature(e.to_string()))?;
        Ok(url.to_string())
    }
}

/// Expiring download links served by this application.
///
/// URLs take the form `{base_url}/arquivos/{key}?expires={unix}&signature={hex}`, where the
/// signature is HMAC-SHA256 over `"{key}\n{expires}"`.
#[derive(Clone)]
pub struct HmacUrlSigner {
    secret: Arc<[u8]>,
    base_url: String,
}

impl std::fmt::Debug for HmacUrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacUrlSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HmacUrlSigner {
    /// # Errors
    ///
    /// Returns [`StorageError::Signature`] if `secret` is shorter than 16 bytes.
    pub fn new(secret: &[u8], base_url: &str) -> StorageResult<Self> {
        if secret.len() < 16 {
            return Err(StorageError::Signature(
                "URL signing secret must be at least 16 bytes".into(),
            ));
        }
        Ok(Self {
            secret: Arc::from(secret),
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn mac(&self, key: &str, expires: i64) -> StorageResult<Hmac<Sha256>> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.secret)
            .map_err(|e| StorageError::Signature(e.to_string()))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Signature for `key` expiring at `expires` (unix seconds).
    pub fn signature(&self, key: &str, expires: i64) -> StorageResult<String> {
        Ok(hex::encode(self.mac(key, expires)?.finalize().into_bytes()))
    }

    /// Checks a link presented back to the application.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Signature`] if the link expired or the signature does not match.
    pub fn verify(&self, key: &str, expires: i64, signature: &str) -> StorageResult<()> {
        if Utc::now().timestamp() > expires {
            return Err(StorageError::Signature("link expired".into()));
        }
        let provided =
            hex::decode(signature).map_err(|_| StorageError::Signature("bad signature".into()))?;
        self.mac(key, expires)?
            .verify_slice(&provided)
            .map_err(|_| StorageError::Signature("bad signature".into()))
    }
}

#[async_trait]
impl UrlSigner for HmacUrlSigner {
    async fn signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let ttl = i64::try_from(ttl.as_secs())
            .map_err(|_| StorageError::Signature("TTL out of range".into()))?;
        let expires = Utc::now().timestamp() + ttl;
        Ok(format!(
            "{}/arquivos/{}?expires={}&signature={}",
            self.base_url,
            key,
            expires,
            self.signature(key, expires)?
        ))
    }
}
