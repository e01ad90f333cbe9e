//! Certificate registration and retrieval.

use crate::{
    CertificateAnalyzer, CertificateError, CertificateFailure, CertificateRecord,
    CertificateRepository, CertificateResult,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use laudo_crypto::{FieldCodec, SealedText};
use laudo_ids::{CertificateId, UserId};
use laudo_types::Sha256Hex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Decrypted material needed to sign with a physician's active certificate.
pub struct SigningMaterial {
    pub certificate_id: CertificateId,
    pub pkcs12: Zeroizing<Vec<u8>>,
    pub password: Zeroizing<String>,
    pub subject: String,
    pub not_after: DateTime<Utc>,
}

impl std::fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("certificate_id", &self.certificate_id)
            .field("subject", &self.subject)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Certificate metadata safe to return to callers (no material, no password).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateSummary {
    pub id: CertificateId,
    pub physician_id: UserId,
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
    pub expired: bool,
    pub total_uses: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl From<&CertificateRecord> for CertificateSummary {
    fn from(record: &CertificateRecord) -> Self {
        Self {
            id: record.id,
            physician_id: record.physician_id,
            original_filename: record.original_filename.clone(),
            subject: record.subject.clone(),
            issuer: record.issuer.clone(),
            serial_number: record.serial_number.clone(),
            not_before: record.not_before,
            not_after: record.not_after,
            fingerprint: record.fingerprint.clone(),
            signature_algorithm: record.signature_algorithm.clone(),
            key_size: record.key_size,
            active: record.active,
            expired: record.not_after < Utc::now(),
            total_uses: record.total_uses,
            last_used_at: record.last_used_at,
            created_at: record.created_at,
            deactivated_at: record.deactivated_at,
        }
    }
}

/// Registers physician certificates and serves them to the signing pipeline.
///
/// The PKCS#12 container is written encrypted under `material_dir`; the row keeps the sealed
/// path, the sealed password (needed to sign) and an Argon2 hash of the password (needed only
/// to confirm it).
#[derive(Clone)]
pub struct CertificateStore {
    repository: Arc<dyn CertificateRepository>,
    codec: Arc<dyn FieldCodec>,
    material_dir: PathBuf,
    analyzer: CertificateAnalyzer,
}

impl CertificateStore {
    pub fn new(
        repository: Arc<dyn CertificateRepository>,
        codec: Arc<dyn FieldCodec>,
        material_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repository,
            codec,
            material_dir: material_dir.into(),
            analyzer: CertificateAnalyzer::new(),
        }
    }

    /// Registers a PKCS#12 certificate for a physician.
    ///
    /// An active certificate that has already expired is deactivated as part of the
    /// registration so that the physician ends up with exactly one usable certificate.
    ///
    /// # Arguments
    ///
    /// * `physician_id` - Owner of the certificate.
    /// * `pkcs12` - Raw container bytes as uploaded.
    /// * `original_filename` - Name of the uploaded file, kept for display.
    /// * `password` - Container password.
    ///
    /// # Errors
    ///
    /// - Analyzer errors ([`CertificateError::WrongPassword`], ...) for unreadable containers.
    /// - [`CertificateError::AlreadyActive`] if the physician has a usable certificate.
    /// - [`CertificateError::Expired`] if the certificate's validity has ended.
    /// - [`CertificateError::DuplicateFingerprint`] if the certificate is already registered.
    pub async fn register(
        &self,
        physician_id: UserId,
        pkcs12: &[u8],
        original_filename: &str,
        password: &str,
    ) -> CertificateResult<CertificateId> {
        let info = self.analyzer.analyze(pkcs12, password)?;
        let now = Utc::now();

        if let Some(mut current) = self.repository.find_active(physician_id).await? {
            if current.is_usable_at(now) {
                return Err(CertificateError::AlreadyActive);
            }
            current.active = false;
            current.deactivated_at = Some(now);
            self.repository.update(current).await?;
        }

        if info.is_expired_at(now) {
            return Err(CertificateError::Expired);
        }

        if self
            .repository
            .find_by_fingerprint(&info.fingerprint)
            .await?
            .is_some()
        {
            return Err(CertificateError::DuplicateFingerprint);
        }

        let file_name = format!(
            "{}_{}_{}.p12.enc",
            physician_id,
            now.format("%Y%m%dT%H%M%S%3fZ"),
            Sha256Hex::digest(pkcs12).short(16)
        );
        let path = self.material_dir.join(file_name);
        tokio::fs::create_dir_all(&self.material_dir).await?;
        tokio::fs::write(&path, self.codec.encrypt_bytes(pkcs12)?).await?;

        let password_hash = {
            let password = Zeroizing::new(password.to_owned());
            tokio::task::spawn_blocking(move || hash_password(&password))
                .await
                .map_err(|e| CertificateError::PasswordHash(e.to_string()))??
        };

        let id = CertificateId::new();
        let record = CertificateRecord {
            id,
            physician_id,
            material_path: SealedText::seal(self.codec.as_ref(), &path.to_string_lossy())?,
            password: SealedText::seal(self.codec.as_ref(), password)?,
            password_hash,
            original_filename: original_filename.to_owned(),
            subject: info.subject,
            issuer: info.issuer,
            serial_number: info.serial_number,
            not_before: info.not_before,
            not_after: info.not_after,
            fingerprint: info.fingerprint,
            signature_algorithm: info.signature_algorithm,
            key_size: info.key_size,
            active: true,
            total_uses: 0,
            last_used_at: None,
            failures: Vec::new(),
            created_at: now,
            deactivated_at: None,
        };

        if let Err(e) = self.repository.insert(record).await {
            if let Err(unlink) = tokio::fs::remove_file(&path).await {
                tracing::warn!(error = %unlink, path = %path.display(), "failed to remove certificate material after rejected insert");
            }
            return Err(e);
        }

        tracing::info!(certificate_id = %id, physician_id = %physician_id, "certificate registered");
        Ok(id)
    }

    /// Loads the physician's active certificate for signing.
    ///
    /// # Errors
    ///
    /// - [`CertificateError::NoActiveCertificate`] if no active certificate exists.
    /// - [`CertificateError::Expired`] if the active certificate's validity has ended.
    /// - [`CertificateError::Io`] / [`CertificateError::Crypto`] if the stored material cannot be
    ///   read back.
    pub async fn fetch_for_signing(
        &self,
        physician_id: UserId,
    ) -> CertificateResult<SigningMaterial> {
        let record = self
            .repository
            .find_active(physician_id)
            .await?
            .ok_or(CertificateError::NoActiveCertificate)?;

        if record.not_after < Utc::now() {
            return Err(CertificateError::Expired);
        }

        let path = record.material_path.open(self.codec.as_ref());
        let sealed = tokio::fs::read(&path).await?;
        let pkcs12 = Zeroizing::new(self.codec.decrypt_bytes(&sealed)?);

        Ok(SigningMaterial {
            certificate_id: record.id,
            pkcs12,
            password: Zeroizing::new(record.password.open(self.codec.as_ref())),
            subject: record.subject,
            not_after: record.not_after,
        })
    }

    /// Deactivates a certificate owned by `physician_id`.
    ///
    /// The row is kept; the encrypted material file is removed on a best-effort basis.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::NotFound`] if the certificate does not exist or belongs to a
    /// different physician.
    pub async fn deactivate(
        &self,
        certificate_id: CertificateId,
        physician_id: UserId,
    ) -> CertificateResult<()> {
        let mut record = self.owned(certificate_id, physician_id).await?;
        let path = record.material_path.open(self.codec.as_ref());

        record.active = false;
        record.deactivated_at = Some(Utc::now());
        self.repository.update(record).await?;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(error = %e, certificate_id = %certificate_id, "failed to remove certificate material");
        }
        tracing::info!(certificate_id = %certificate_id, "certificate deactivated");
        Ok(())
    }

    /// Checks `password` against the stored hash without decrypting the stored password.
    pub async fn confirm_password(
        &self,
        certificate_id: CertificateId,
        physician_id: UserId,
        password: &str,
    ) -> CertificateResult<bool> {
        let record = self.owned(certificate_id, physician_id).await?;
        let password = Zeroizing::new(password.to_owned());
        tokio::task::spawn_blocking(move || verify_password(&password, &record.password_hash))
            .await
            .map_err(|e| CertificateError::PasswordHash(e.to_string()))
    }

    /// Whether the physician currently has a usable certificate.
    pub async fn auto_signing_available(&self, physician_id: UserId) -> CertificateResult<bool> {
        Ok(self
            .repository
            .find_active(physician_id)
            .await?
            .is_some_and(|r| r.is_usable_at(Utc::now())))
    }

    pub async fn active_for_physician(
        &self,
        physician_id: UserId,
    ) -> CertificateResult<Option<CertificateSummary>> {
        Ok(self
            .repository
            .find_active(physician_id)
            .await?
            .as_ref()
            .map(CertificateSummary::from))
    }

    pub async fn list_for_physician(
        &self,
        physician_id: UserId,
    ) -> CertificateResult<Vec<CertificateSummary>> {
        let records = self.repository.list_for_physician(physician_id).await?;
        Ok(records.iter().map(CertificateSummary::from).collect())
    }

    /// Bumps the usage counter after a successful signature.
    ///
    /// Only the usage columns are written, so a deactivation that lands while a signature is
    /// in flight is kept.
    pub async fn record_use(&self, certificate_id: CertificateId) -> CertificateResult<()> {
        self.repository
            .increment_use(certificate_id, Utc::now())
            .await
    }

    /// Appends a failure reason after an unsuccessful signature.
    pub async fn record_failure(
        &self,
        certificate_id: CertificateId,
        reason: &str,
    ) -> CertificateResult<()> {
        self.repository
            .push_failure(
                certificate_id,
                CertificateFailure {
                    at: Utc::now(),
                    reason: reason.to_owned(),
                },
            )
            .await
    }

    async fn owned(
        &self,
        certificate_id: CertificateId,
        physician_id: UserId,
    ) -> CertificateResult<CertificateRecord> {
        match self.repository.get(certificate_id).await? {
            Some(record) if record.physician_id == physician_id => Ok(record),
            _ => Err(CertificateError::NotFound),
        }
    }
}

fn hash_password(password: &str) -> CertificateResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CertificateError::PasswordHash(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is unreadable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DevCertificate, InMemoryCertificateRepository};
    use laudo_crypto::{AesGcmFieldCodec, FieldKey};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> (CertificateStore, Arc<InMemoryCertificateRepository>) {
        let repository = Arc::new(InMemoryCertificateRepository::new());
        let codec = Arc::new(AesGcmFieldCodec::new(&FieldKey::generate()));
        let store = CertificateStore::new(repository.clone(), codec, dir.path().join("certs"));
        (store, repository)
    }

    fn pkcs12(name: &str, password: &str) -> Vec<u8> {
        DevCertificate::valid_for_days(name, "CRM-SP 123456", 365)
            .to_pkcs12(password)
            .unwrap()
    }

    #[tokio::test]
    async fn register_encrypts_material_and_password() {
        let dir = TempDir::new().unwrap();
        let (store, repository) = store(&dir);
        let physician = UserId::new();
        let der = pkcs12("Dra. Ana", "senha");

        let id = store
            .register(physician, &der, "ana.p12", "senha")
            .await
            .unwrap();

        let record = repository.get(id).await.unwrap().unwrap();
        assert!(record.active);
        assert!(record.password.is_encrypted());
        assert!(record.material_path.is_encrypted());
        assert_ne!(record.password_hash, "senha");

        let files: Vec<_> = std::fs::read_dir(dir.path().join("certs"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
        let on_disk = std::fs::read(files[0].as_ref().unwrap().path()).unwrap();
        assert_ne!(on_disk, der);
    }

    #[tokio::test]
    async fn second_active_certificate_is_rejected_until_deactivated() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        let physician = UserId::new();

        let first = store
            .register(physician, &pkcs12("Dra. Ana", "a"), "a.p12", "a")
            .await
            .unwrap();
        let second = store
            .register(physician, &pkcs12("Dra. Ana", "b"), "b.p12", "b")
            .await;
        assert!(matches!(second, Err(CertificateError::AlreadyActive)));

        store.deactivate(first, physician).await.unwrap();
        store
            .register(physician, &pkcs12("Dra. Ana", "b"), "b.p12", "b")
            .await
            .unwrap();

        let listed = store.list_for_physician(physician).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed.iter().filter(|c| c.active).count(), 1);
    }

    #[tokio::test]
    async fn expired_certificate_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        let der = DevCertificate::expired("Dr. Velho", "CRM-MG 9")
            .to_pkcs12("x")
            .unwrap();

        let result = store.register(UserId::new(), &der, "old.p12", "x").await;
        assert!(matches!(result, Err(CertificateError::Expired)));
    }

    #[tokio::test]
    async fn same_certificate_cannot_be_registered_twice() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        let der = pkcs12("Dra. Ana", "x");

        store
            .register(UserId::new(), &der, "a.p12", "x")
            .await
            .unwrap();
        let result = store.register(UserId::new(), &der, "a.p12", "x").await;
        assert!(matches!(result, Err(CertificateError::DuplicateFingerprint)));
    }

    #[tokio::test]
    async fn fetch_for_signing_returns_original_material() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        let physician = UserId::new();
        let der = pkcs12("Dra. Ana", " senha ");
        let id = store
            .register(physician, &der, "a.p12", " senha ")
            .await
            .unwrap();

        let material = store.fetch_for_signing(physician).await.unwrap();
        assert_eq!(material.certificate_id, id);
        assert_eq!(material.pkcs12.as_slice(), der.as_slice());
        assert_eq!(material.password.as_str(), " senha ");
    }

    #[tokio::test]
    async fn fetch_without_certificate_fails() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        let result = store.fetch_for_signing(UserId::new()).await;
        assert!(matches!(result, Err(CertificateError::NoActiveCertificate)));
    }

    #[tokio::test]
    async fn deactivate_keeps_row_and_removes_material() {
        let dir = TempDir::new().unwrap();
        let (store, repository) = store(&dir);
        let physician = UserId::new();
        let id = store
            .register(physician, &pkcs12("Dra. Ana", "x"), "a.p12", "x")
            .await
            .unwrap();

        store.deactivate(id, physician).await.unwrap();

        let record = repository.get(id).await.unwrap().unwrap();
        assert!(!record.active);
        assert!(record.deactivated_at.is_some());
        assert_eq!(
            std::fs::read_dir(dir.path().join("certs")).unwrap().count(),
            0
        );
        assert!(!store.auto_signing_available(physician).await.unwrap());
    }

    #[tokio::test]
    async fn deactivate_by_other_physician_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        let id = store
            .register(UserId::new(), &pkcs12("Dra. Ana", "x"), "a.p12", "x")
            .await
            .unwrap();

        let result = store.deactivate(id, UserId::new()).await;
        assert!(matches!(result, Err(CertificateError::NotFound)));
    }

    #[tokio::test]
    async fn confirm_password_uses_hash() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        let physician = UserId::new();
        let id = store
            .register(physician, &pkcs12("Dra. Ana", "certa"), "a.p12", "certa")
            .await
            .unwrap();

        assert!(store.confirm_password(id, physician, "certa").await.unwrap());
        assert!(!store.confirm_password(id, physician, "errada").await.unwrap());
    }

    #[tokio::test]
    async fn usage_and_failures_are_recorded() {
        let dir = TempDir::new().unwrap();
        let (store, repository) = store(&dir);
        let physician = UserId::new();
        let id = store
            .register(physician, &pkcs12("Dra. Ana", "x"), "a.p12", "x")
            .await
            .unwrap();

        store.record_use(id).await.unwrap();
        store.record_use(id).await.unwrap();
        store.record_failure(id, "timeout").await.unwrap();

        let record = repository.get(id).await.unwrap().unwrap();
        assert_eq!(record.total_uses, 2);
        assert!(record.last_used_at.is_some());
        assert_eq!(record.failures.len(), 1);
        assert_eq!(record.failures[0].reason, "timeout");
    }

    #[tokio::test]
    async fn usage_recorded_after_deactivation_keeps_certificate_inactive() {
        let dir = TempDir::new().unwrap();
        let (store, repository) = store(&dir);
        let physician = UserId::new();
        let id = store
            .register(physician, &pkcs12("Dra. Ana", "x"), "a.p12", "x")
            .await
            .unwrap();

        let material = store.fetch_for_signing(physician).await.unwrap();
        store.deactivate(id, physician).await.unwrap();
        store.record_use(material.certificate_id).await.unwrap();
        store
            .record_failure(material.certificate_id, "signature rejected")
            .await
            .unwrap();

        let record = repository.get(id).await.unwrap().unwrap();
        assert!(!record.active);
        assert!(record.deactivated_at.is_some());
        assert_eq!(record.total_uses, 1);
        assert_eq!(record.failures.len(), 1);
        assert!(!store.auto_signing_available(physician).await.unwrap());
        assert!(store.active_for_physician(physician).await.unwrap().is_none());
    }
}
