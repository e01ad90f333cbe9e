use crate::{CertificateError, CertificateResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use laudo_crypto::SealedText;
use laudo_ids::{CertificateId, UserId};
use laudo_types::Sha256Hex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persisted certificate row.
///
/// `material_path` and `password` are sealed with the field codec. The row is never deleted;
/// deactivation only flips `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: CertificateId,
    pub physician_id: UserId,
    pub material_path: SealedText,
    pub password: SealedText,
    /// Argon2 PHC string, used only to confirm the password.
    pub password_hash: String,
    pub original_filename: String,
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub fingerprint: Sha256Hex,
    pub signature_algorithm: String,
    pub key_size: Option<u32>,
    pub active: bool,
    pub total_uses: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub failures: Vec<CertificateFailure>,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl CertificateRecord {
    pub fn is_usable_at(&self, at: DateTime<Utc>) -> bool {
        self.active && self.not_after >= at
    }
}

/// A signing failure recorded against a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateFailure {
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Persistence collaborator for certificate rows.
#[async_trait]
pub trait CertificateRepository: Send + Sync {
    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Implementations must reject a fingerprint that already exists with
    /// [`CertificateError::DuplicateFingerprint`], and a second usable certificate for the same
    /// physician with [`CertificateError::AlreadyActive`].
    async fn insert(&self, record: CertificateRecord) -> CertificateResult<()>;

    async fn update(&self, record: CertificateRecord) -> CertificateResult<()>;

    /// Bumps `total_uses` and sets `last_used_at`, leaving every other column untouched.
    async fn increment_use(&self, id: CertificateId, at: DateTime<Utc>) -> CertificateResult<()>;

    /// Appends to `failures`, leaving every other column untouched.
    async fn push_failure(
        &self,
        id: CertificateId,
        failure: CertificateFailure,
    ) -> CertificateResult<()>;

    async fn get(&self, id: CertificateId) -> CertificateResult<Option<CertificateRecord>>;

    /// Returns the physician's row with `active == true`, if any (expired or not).
    async fn find_active(&self, physician_id: UserId)
        -> CertificateResult<Option<CertificateRecord>>;

    async fn find_by_fingerprint(
        &self,
        fingerprint: &Sha256Hex,
    ) -> CertificateResult<Option<CertificateRecord>>;

    async fn list_for_physician(&self, physician_id: UserId)
        -> CertificateResult<Vec<CertificateRecord>>;
}

/// In-process [`CertificateRepository`].
#[derive(Debug, Default)]
pub struct InMemoryCertificateRepository {
    rows: RwLock<HashMap<CertificateId, CertificateRecord>>,
}

impl InMemoryCertificateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CertificateRepository for InMemoryCertificateRepository {
    async fn insert(&self, record: CertificateRecord) -> CertificateResult<()> {
        let mut rows = self.rows.write().await;
        if rows.values().any(|r| r.fingerprint == record.fingerprint) {
            return Err(CertificateError::DuplicateFingerprint);
        }
        let now = Utc::now();
        if record.active
            && rows
                .values()
                .any(|r| r.physician_id == record.physician_id && r.is_usable_at(now))
        {
            return Err(CertificateError::AlreadyActive);
        }
        if rows.contains_key(&record.id) {
            return Err(CertificateError::Repository(format!(
                "certificate {} already exists",
                record.id
            )));
        }
        rows.insert(record.id, record);
        Ok(())
    }

    async fn update(&self, record: CertificateRecord) -> CertificateResult<()> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(CertificateError::NotFound),
        }
    }

    async fn increment_use(&self, id: CertificateId, at: DateTime<Utc>) -> CertificateResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(CertificateError::NotFound)?;
        row.total_uses += 1;
        row.last_used_at = Some(at);
        Ok(())
    }

    async fn push_failure(
        &self,
        id: CertificateId,
        failure: CertificateFailure,
    ) -> CertificateResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(CertificateError::NotFound)?;
        row.failures.push(failure);
        Ok(())
    }

    async fn get(&self, id: CertificateId) -> CertificateResult<Option<CertificateRecord>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_active(
        &self,
        physician_id: UserId,
    ) -> CertificateResult<Option<CertificateRecord>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| r.physician_id == physician_id && r.active)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &Sha256Hex,
    ) -> CertificateResult<Option<CertificateRecord>> {
        let rows = self.rows.read().await;
        Ok(rows.values().find(|r| &r.fingerprint == fingerprint).cloned())
    }

    async fn list_for_physician(
        &self,
        physician_id: UserId,
    ) -> CertificateResult<Vec<CertificateRecord>> {
        let rows = self.rows.read().await;
        let mut found: Vec<_> = rows
            .values()
            .filter(|r| r.physician_id == physician_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }
}
