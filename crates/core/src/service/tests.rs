use super::*;
use crate::model::{ClinicRecord, PatientRecord, PhysicianRecord, RequestMeta};
use crate::repository::InMemoryRepository;
use crate::{CoreSettings, ErrorKind};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::{StreamExt, TryStreamExt};
use laudo_certificates::{CertificateRepository, DevCertificate, InMemoryCertificateRepository};
use laudo_crypto::{AesGcmFieldCodec, FieldKey, SealedText};
use laudo_ids::{PatientId, UserId};
use laudo_storage::{HmacUrlSigner, LegacyStore};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use std::time::Duration;
use tempfile::TempDir;

const PASSWORD: &str = "segredo-123";

struct FailingAudit;

#[async_trait]
impl AuditSink for FailingAudit {
    async fn record(&self, _record: AuditRecord) -> LaudoResult<()> {
        Err(LaudoError::Repository("audit store offline".into()))
    }
}

#[derive(Clone, Copy)]
enum Store {
    Working,
    Broken,
}

struct Harness {
    service: ReportService,
    repo: Arc<InMemoryRepository>,
    certificate_rows: Arc<InMemoryCertificateRepository>,
    codec: Arc<dyn FieldCodec>,
    primary: Arc<dyn ObjectStore>,
    legacy: Arc<dyn ObjectStore>,
    physician: Actor,
    exam_id: ExamId,
    _dir: TempDir,
}

/// A local store rooted at a regular file: every call fails.
fn broken_store(dir: &TempDir, name: &str) -> Arc<dyn ObjectStore> {
    let blocker = dir.path().join(name);
    std::fs::write(&blocker, b"not a directory").unwrap();
    Arc::new(LocalFileSystem::new_with_prefix(&blocker).unwrap())
}

fn store(dir: &TempDir, name: &str, kind: Store) -> Arc<dyn ObjectStore> {
    match kind {
        Store::Working => Arc::new(InMemory::new()),
        Store::Broken => broken_store(dir, name),
    }
}

async fn harness_with(primary: Store, legacy: Store, audit: Arc<dyn AuditSink>) -> Harness {
    harness_with_timeout(primary, legacy, audit, Duration::from_secs(30)).await
}

async fn harness_with_timeout(
    primary: Store,
    legacy: Store,
    audit: Arc<dyn AuditSink>,
    signing_timeout: Duration,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let codec: Arc<dyn FieldCodec> = Arc::new(AesGcmFieldCodec::new(&FieldKey::generate()));
    let repo = Arc::new(InMemoryRepository::new());
    let certificate_rows = Arc::new(InMemoryCertificateRepository::new());

    let primary_store = store(&dir, "primary", primary);
    let legacy_store = store(&dir, "legacy", legacy);
    let signer = Arc::new(
        HmacUrlSigner::new(b"test-secret-0123456789", "https://app.example.com").unwrap(),
    );
    let storage = StorageReconciler::new(
        primary_store.clone(),
        Some(LegacyStore::new(legacy_store.clone(), "https://cdn.example.com")),
        signer,
        Duration::from_secs(5),
        Duration::from_secs(300),
    );

    let material_dir = dir.path().join("certificados");
    std::fs::create_dir_all(&material_dir).unwrap();
    let certificates = CertificateStore::new(certificate_rows.clone(), codec.clone(), material_dir);

    let cfg = Arc::new(
        CoreConfig::new(CoreSettings {
            public_base_url: "https://laudos.example.com".into(),
            signing_timeout,
            ..CoreSettings::default()
        })
        .unwrap(),
    );

    let tenant_id = TenantId::new();
    let physician_id = UserId::new();
    let patient_id = PatientId::new();
    let exam_id = ExamId::new();

    PhysicianRepository::insert(
        repo.as_ref(),
        PhysicianRecord {
            id: physician_id,
            name: "Dra. Ana Souza".into(),
            crm: Some("CRM-SP 123456".into()),
        },
    )
    .await
    .unwrap();
    ClinicRepository::insert(
        repo.as_ref(),
        ClinicRecord {
            id: tenant_id,
            name: "Clínica Coração".into(),
            address: Some("Rua das Flores, 100".into()),
            phone: None,
        },
    )
    .await
    .unwrap();
    PatientRepository::insert(
        repo.as_ref(),
        PatientRecord {
            id: patient_id,
            tenant_id,
            name: SealedText::seal(codec.as_ref(), "Maria Silva").unwrap(),
            birth_date: NaiveDate::from_ymd_opt(1980, 3, 1),
            sex: Some("F".into()),
        },
    )
    .await
    .unwrap();
    ExamRepository::insert(
        repo.as_ref(),
        ExamRecord {
            id: exam_id,
            tenant_id,
            patient_id,
            physician_id,
            exam_type: "Eletrocardiograma".into(),
            exam_type_id: Some("ecg".into()),
            specialty_id: Some("cardiologia".into()),
            performed_at: Some(Utc::now()),
            requesting_physician: Some("Dr. Paulo".into()),
            height_cm: Some("165".into()),
            weight_kg: Some("abc".into()),
            heart_rate_bpm: Some("72".into()),
            pr_interval_ms: None,
            qrs_duration_ms: None,
            payment_value_cents: Some(4_500),
            status: ExamStatus::AwaitingReport,
            active_report: None,
        },
    )
    .await
    .unwrap();

    let service = ReportService::new(
        cfg,
        ReportServiceParts {
            reports: repo.clone(),
            exams: repo.clone(),
            patients: repo.clone(),
            physicians: repo.clone(),
            clinics: repo.clone(),
            codec: codec.clone(),
            certificates,
            storage,
            audit,
        },
    );

    Harness {
        service,
        repo,
        certificate_rows,
        codec,
        primary: primary_store,
        legacy: legacy_store,
        physician: Actor {
            id: physician_id,
            name: "Dra. Ana Souza".into(),
            tenant_id,
            request: RequestMeta::default(),
        },
        exam_id,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    harness_with(Store::Working, Store::Working, Arc::new(crate::TracingAuditSink)).await
}

impl Harness {
    async fn create(&self) -> Report {
        self.service
            .create(&self.physician, self.exam_id, "Normal sinus rhythm.")
            .await
            .unwrap()
            .report
    }

    async fn register_certificate(&self) -> CertificateId {
        let pkcs12 = DevCertificate::valid_for_days("Dra. Ana Souza", "CRM-SP 123456", 365)
            .to_pkcs12(PASSWORD)
            .unwrap();
        self.service
            .certificates()
            .register(self.physician.id, &pkcs12, "ana.p12", PASSWORD)
            .await
            .unwrap()
    }

    /// Replaces the stored container password so every signing attempt fails.
    async fn corrupt_certificate_password(&self, certificate_id: CertificateId) {
        let mut row = self.certificate_rows.get(certificate_id).await.unwrap().unwrap();
        row.password = SealedText::seal(self.codec.as_ref(), "senha-errada").unwrap();
        self.certificate_rows.update(row).await.unwrap();
    }

    async fn exam(&self) -> ExamRecord {
        ExamRepository::get(self.repo.as_ref(), self.exam_id)
            .await
            .unwrap()
            .unwrap()
    }

    fn other_user(&self) -> Actor {
        Actor {
            id: UserId::new(),
            name: "Recepção".into(),
            ..self.physician.clone()
        }
    }
}

async fn object_count(store: &Arc<dyn ObjectStore>) -> usize {
    let listed: Vec<_> = store.list(None).try_collect().await.unwrap();
    listed.len()
}

async fn exists(store: &Arc<dyn ObjectStore>, key: &str) -> bool {
    store.head(&Path::parse(key).unwrap()).await.is_ok()
}

fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF\n"
        .to_vec()
}

#[tokio::test]
async fn create_leaves_report_pending_and_exam_ready() {
    let h = harness().await;

    let created = h
        .service
        .create(&h.physician, h.exam_id, "Normal sinus rhythm.")
        .await
        .unwrap();
    let report = &created.report;

    assert_eq!(report.status, ReportStatus::PendingSignature);
    assert!(report.valid);
    assert_eq!(report.version, 1);
    assert_eq!(report.conclusion, "Normal sinus rhythm.");
    assert_eq!(report.payment_value_cents, Some(4_500));
    assert!(!report.payment_registered);
    assert_eq!(report.history.len(), 1);
    assert_eq!(report.history[0].action, HistoryAction::Created);
    assert!(!created.auto_signing_available);

    let original = report.original_key.as_deref().unwrap();
    assert!(original.contains("/original/"));
    assert!(exists(&h.primary, original).await);
    assert!(created.original_url.unwrap().contains("signature="));

    let exam = h.exam().await;
    assert_eq!(exam.status, ExamStatus::ReportReady);
    assert_eq!(exam.active_report, Some(report.id));
}

#[tokio::test]
async fn create_rejects_blank_conclusion_and_unknown_exam() {
    let h = harness().await;

    let blank = h.service.create(&h.physician, h.exam_id, "  \n ").await;
    assert_eq!(blank.unwrap_err().kind(), ErrorKind::Validation);

    let missing = h
        .service
        .create(&h.physician, ExamId::new(), "Normal.")
        .await;
    assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn conclusion_is_encrypted_at_rest() {
    let h = harness().await;
    let report = h.create().await;

    let record = ReportRepository::get(h.repo.as_ref(), report.id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.conclusion.is_encrypted());
    assert!(record.physician_name.is_encrypted());
}

#[tokio::test]
async fn second_valid_report_conflicts_until_first_is_invalidated() {
    let h = harness().await;
    let first = h.create().await;

    let duplicate = h
        .service
        .create(&h.physician, h.exam_id, "Outra conclusão.")
        .await;
    assert_eq!(duplicate.unwrap_err().kind(), ErrorKind::Conflict);

    h.service.invalidate(&h.physician, first.id).await.unwrap();
    assert_eq!(h.exam().await.status, ExamStatus::AwaitingReport);

    let second = h
        .service
        .create(&h.physician, h.exam_id, "Outra conclusão.")
        .await
        .unwrap();
    assert_eq!(h.exam().await.active_report, Some(second.report.id));
}

#[tokio::test]
async fn sign_without_certificate_fails_and_keeps_status() {
    let h = harness().await;
    let report = h.create().await;

    let err = h
        .service
        .sign(&h.physician, report.id, SignMode::Automatic)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Certificate);
    assert!(err.detail().contains("no active certificate"));

    let stored = h.service.get(&h.physician, report.id).await.unwrap();
    assert_eq!(stored.status, ReportStatus::PendingSignature);
    assert_eq!(stored.history.len(), 1);
}

#[tokio::test]
async fn automatic_sign_stores_signed_pdf_and_removes_original() {
    let h = harness().await;
    let certificate_id = h.register_certificate().await;
    let created = h
        .service
        .create(&h.physician, h.exam_id, "Normal sinus rhythm.")
        .await
        .unwrap();
    assert!(created.auto_signing_available);
    let original = created.report.original_key.clone().unwrap();

    let signed = h
        .service
        .sign(&h.physician, created.report.id, SignMode::Automatic)
        .await
        .unwrap();
    assert_eq!(signed.status, ReportStatus::Signed);
    assert_eq!(signed.location, StorageLocation::Primary);
    assert!(signed.digitally_signed);

    let report = h.service.get(&h.physician, created.report.id).await.unwrap();
    assert_eq!(report.signing_method, SigningMethod::CertificadoMedico);
    assert_eq!(report.certificate_id, Some(certificate_id));
    assert!(report.original_key.is_none());
    assert!(report.legacy_url.is_none());
    assert_eq!(
        report.history.last().map(|e| e.action),
        Some(HistoryAction::SignedAutomatically)
    );
    assert!(!exists(&h.primary, &original).await);

    let bytes = h
        .service
        .storage()
        .read(report.signed_key.as_deref().unwrap())
        .await
        .unwrap();
    let inspection = laudo_signing::inspect_signature(&bytes).unwrap();
    assert!(inspection.is_valid());

    let row = h.certificate_rows.get(certificate_id).await.unwrap().unwrap();
    assert_eq!(row.total_uses, 1);
    assert!(row.last_used_at.is_some());
    assert_eq!(h.exam().await.status, ExamStatus::ReportSigned);
}

#[tokio::test]
async fn signing_timeout_keeps_report_pending() {
    let h = harness_with_timeout(
        Store::Working,
        Store::Working,
        Arc::new(crate::TracingAuditSink),
        Duration::from_millis(1),
    )
    .await;
    let certificate_id = h.register_certificate().await;
    let report = h.create().await;

    let err = h
        .service
        .sign(&h.physician, report.id, SignMode::Automatic)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Certificate);
    assert!(err.detail().contains("timed out"));

    let stored = h.service.get(&h.physician, report.id).await.unwrap();
    assert_eq!(stored.status, ReportStatus::PendingSignature);
    assert!(stored.signed_key.is_none());
    assert_eq!(stored.original_key, report.original_key);
    assert_eq!(object_count(&h.primary).await, 1);
    assert_eq!(h.exam().await.status, ExamStatus::ReportReady);

    let row = h.certificate_rows.get(certificate_id).await.unwrap().unwrap();
    assert_eq!(row.total_uses, 0);
    assert!(row.failures[0].reason.contains("timed out"));
}

#[tokio::test]
async fn wrong_stored_password_fails_every_variant_without_writing() {
    let h = harness().await;
    let certificate_id = h.register_certificate().await;
    h.corrupt_certificate_password(certificate_id).await;
    let report = h.create().await;
    let before = object_count(&h.primary).await;

    let err = h
        .service
        .sign(&h.physician, report.id, SignMode::Automatic)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Certificate);
    assert!(err.detail().contains("manually"));

    assert_eq!(object_count(&h.primary).await, before);
    assert_eq!(object_count(&h.legacy).await, 0);
    let stored = h.service.get(&h.physician, report.id).await.unwrap();
    assert_eq!(stored.status, ReportStatus::PendingSignature);
    assert_eq!(stored.history.len(), 1);

    let row = h.certificate_rows.get(certificate_id).await.unwrap().unwrap();
    assert_eq!(row.failures.len(), 1);
    assert!(row.active);
}

#[tokio::test]
async fn manual_sign_is_recorded_as_manual() {
    let h = harness().await;
    h.register_certificate().await;
    let report = h.create().await;

    h.service
        .sign(&h.physician, report.id, SignMode::Manual)
        .await
        .unwrap();

    let report = h.service.get(&h.physician, report.id).await.unwrap();
    assert_eq!(
        report.history.last().map(|e| e.action),
        Some(HistoryAction::SignedManually)
    );
    assert!(report.digitally_signed);
}

#[tokio::test]
async fn signing_twice_conflicts() {
    let h = harness().await;
    h.register_certificate().await;
    let report = h.create().await;

    h.service
        .sign(&h.physician, report.id, SignMode::Automatic)
        .await
        .unwrap();
    let again = h
        .service
        .sign(&h.physician, report.id, SignMode::Automatic)
        .await;
    assert_eq!(again.unwrap_err().kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn only_responsible_physician_may_sign_or_upload() {
    let h = harness().await;
    h.register_certificate().await;
    let report = h.create().await;
    let intruder = h.other_user();

    let sign = h
        .service
        .sign(&intruder, report.id, SignMode::Automatic)
        .await;
    assert_eq!(sign.unwrap_err().kind(), ErrorKind::Permission);

    let upload = h
        .service
        .upload_signed(&intruder, report.id, pdf_bytes(), "application/pdf")
        .await;
    assert_eq!(upload.unwrap_err().kind(), ErrorKind::Permission);
}

#[tokio::test]
async fn other_tenant_cannot_see_report() {
    let h = harness().await;
    let report = h.create().await;
    let outsider = Actor {
        tenant_id: TenantId::new(),
        ..h.physician.clone()
    };

    let result = h.service.get(&outsider, report.id).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn expired_certificate_fails_without_changing_report() {
    let h = harness().await;
    let certificate_id = h.register_certificate().await;
    let mut row = h.certificate_rows.get(certificate_id).await.unwrap().unwrap();
    row.not_after = Utc::now() - chrono::Duration::days(1);
    h.certificate_rows.update(row).await.unwrap();

    let report = h.create().await;
    let err = h
        .service
        .sign(&h.physician, report.id, SignMode::Automatic)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Certificate);
    assert!(err.detail().contains("expired"));

    let stored = h.service.get(&h.physician, report.id).await.unwrap();
    assert_eq!(stored.status, ReportStatus::PendingSignature);
    assert!(stored.signed_key.is_none());
}

#[tokio::test]
async fn non_pdf_upload_is_rejected_without_writing() {
    let h = harness().await;
    let report = h.create().await;
    let before = object_count(&h.primary).await;

    let wrong_type = h
        .service
        .upload_signed(&h.physician, report.id, b"\x89PNG\r\n".to_vec(), "image/png")
        .await;
    assert_eq!(wrong_type.unwrap_err().kind(), ErrorKind::Validation);

    let wrong_content = h
        .service
        .upload_signed(&h.physician, report.id, b"hello".to_vec(), "application/pdf")
        .await;
    assert_eq!(wrong_content.unwrap_err().kind(), ErrorKind::Validation);

    assert_eq!(object_count(&h.primary).await, before);
    assert_eq!(object_count(&h.legacy).await, 0);
    let stored = h.service.get(&h.physician, report.id).await.unwrap();
    assert_eq!(stored.status, ReportStatus::PendingSignature);
}

#[tokio::test]
async fn upload_marks_report_signed_without_digital_signature() {
    let h = harness().await;
    let report = h.create().await;
    let original = report.original_key.clone().unwrap();

    let signed = h
        .service
        .upload_signed(
            &h.physician,
            report.id,
            pdf_bytes(),
            "application/pdf; charset=binary",
        )
        .await
        .unwrap();
    assert_eq!(signed.status, ReportStatus::Signed);
    assert!(!signed.digitally_signed);

    let report = h.service.get(&h.physician, report.id).await.unwrap();
    assert_eq!(report.signing_method, SigningMethod::UploadManual);
    assert!(!report.digitally_signed);
    assert!(report.certificate_id.is_none());
    assert!(report.signed_key.as_deref().unwrap().contains("/assinado/"));
    assert!(!exists(&h.primary, &original).await);
    assert_eq!(
        report.history.last().map(|e| e.action),
        Some(HistoryAction::SignedUpload)
    );
}

#[tokio::test]
async fn upload_falls_back_to_legacy_store() {
    let h = harness_with(Store::Broken, Store::Working, Arc::new(crate::TracingAuditSink)).await;
    let report = h.create().await;
    assert!(report.original_key.is_some());

    let signed = h
        .service
        .upload_signed(&h.physician, report.id, pdf_bytes(), "application/pdf")
        .await
        .unwrap();
    assert_eq!(signed.location, StorageLocation::Legacy);
    assert!(signed.url.starts_with("https://cdn.example.com/laudos/"));

    let report = h.service.get(&h.physician, report.id).await.unwrap();
    assert_eq!(report.legacy_url.as_deref(), Some(signed.url.as_str()));
    assert_eq!(
        h.service.access_url(&h.physician, report.id).await.unwrap(),
        signed.url
    );
}

#[tokio::test]
async fn both_stores_failing_surfaces_storage_error() {
    let h = harness_with(Store::Broken, Store::Broken, Arc::new(crate::TracingAuditSink)).await;

    let created = h
        .service
        .create(&h.physician, h.exam_id, "Normal sinus rhythm.")
        .await
        .unwrap();
    assert!(created.report.original_key.is_none());
    assert!(created.original_url.is_none());

    let err = h
        .service
        .upload_signed(&h.physician, created.report.id, pdf_bytes(), "application/pdf")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let stored = h.service.get(&h.physician, created.report.id).await.unwrap();
    assert_eq!(stored.status, ReportStatus::PendingSignature);
    assert!(stored.signed_key.is_none());
}

#[tokio::test]
async fn redo_creates_next_version_and_keeps_source() {
    let h = harness().await;
    let first = h.create().await;
    let before = h.service.get(&h.physician, first.id).await.unwrap();

    let redone = h
        .service
        .redo(&h.physician, first.id, Some("Bloqueio de ramo direito."))
        .await
        .unwrap();
    let second = &redone.report;

    assert_ne!(second.id, first.id);
    assert_eq!(second.version, 2);
    assert_eq!(second.previous_version, Some(first.id));
    assert_eq!(second.conclusion, "Bloqueio de ramo direito.");
    assert_eq!(second.status, ReportStatus::PendingSignature);
    assert_eq!(second.history.len(), 2);
    assert_eq!(second.history[0], before.history[0]);
    assert_eq!(second.history[1].action, HistoryAction::Redone);
    assert_eq!(second.history[1].version, 2);
    assert!(second.original_key.is_some());
    assert!(redone.url.is_some());

    let after = h.service.get(&h.physician, first.id).await.unwrap();
    assert_eq!(after, before);
    assert_eq!(h.exam().await.active_report, Some(second.id));

    let versions = h.service.versions(&h.physician, h.exam_id).await.unwrap();
    assert_eq!(
        versions.iter().map(|r| r.version).collect::<Vec<_>>(),
        vec![1, 2]
    );

    let stale = h.service.redo(&h.physician, first.id, None).await;
    assert_eq!(stale.unwrap_err().kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn superseded_version_is_not_current_and_invalidating_redo_restores_it() {
    let h = harness().await;
    let first = h.create().await;
    let second = h
        .service
        .redo(&h.physician, first.id, Some("Bloqueio de ramo direito."))
        .await
        .unwrap()
        .report;

    assert!(!h.service.public_view(first.id).await.unwrap().valid);
    assert!(h.service.public_view(second.id).await.unwrap().valid);
    let superseded = h.service.public_download(first.id).await;
    assert_eq!(superseded.unwrap_err().kind(), ErrorKind::NotFound);
    assert!(h.service.public_download(second.id).await.is_ok());

    h.service.invalidate(&h.physician, second.id).await.unwrap();
    let exam = h.exam().await;
    assert_eq!(exam.active_report, Some(first.id));
    assert_eq!(exam.status, ExamStatus::ReportReady);
    assert!(h.service.public_view(first.id).await.unwrap().valid);

    let duplicate = h
        .service
        .create(&h.physician, h.exam_id, "Outra conclusão.")
        .await;
    assert_eq!(duplicate.unwrap_err().kind(), ErrorKind::Conflict);

    let versions = h.service.versions(&h.physician, h.exam_id).await.unwrap();
    assert_eq!(versions.iter().filter(|r| r.valid).count(), 1);

    let third = h.service.redo(&h.physician, first.id, None).await.unwrap();
    assert_eq!(third.report.version, 3);
    assert_eq!(h.exam().await.active_report, Some(third.report.id));
}

#[tokio::test]
async fn redo_keeps_unsigned_version_when_signing_fails() {
    let h = harness().await;
    let first = h.create().await;
    let certificate_id = h.register_certificate().await;
    h.corrupt_certificate_password(certificate_id).await;

    let redone = h.service.redo(&h.physician, first.id, None).await.unwrap();
    let second = &redone.report;

    assert_eq!(second.status, ReportStatus::PendingSignature);
    assert!(!second.digitally_signed);
    assert!(second.signed_key.is_none());
    assert!(exists(&h.primary, second.original_key.as_deref().unwrap()).await);
    assert!(redone.url.is_some());
    assert_eq!(object_count(&h.primary).await, 2);

    let exam = h.exam().await;
    assert_eq!(exam.active_report, Some(second.id));
    assert_eq!(exam.status, ExamStatus::ReportReady);

    let row = h.certificate_rows.get(certificate_id).await.unwrap().unwrap();
    assert_eq!(row.failures.len(), 1);
    assert_eq!(row.total_uses, 0);
}

#[tokio::test]
async fn redo_signs_new_version_when_certificate_is_available() {
    let h = harness().await;
    let first = h.create().await;
    h.register_certificate().await;

    let redone = h.service.redo(&h.physician, first.id, None).await.unwrap();
    let second = &redone.report;

    assert_eq!(second.status, ReportStatus::Signed);
    assert!(second.digitally_signed);
    assert_eq!(second.conclusion, "Normal sinus rhythm.");
    assert!(second.signed_key.is_some());
    assert_eq!(
        second.history.last().map(|e| e.action),
        Some(HistoryAction::SignedAutomatically)
    );
    assert_eq!(h.exam().await.status, ExamStatus::ReportSigned);
}

#[tokio::test]
async fn invalidated_report_cannot_be_signed_or_redone() {
    let h = harness().await;
    h.register_certificate().await;
    let report = h.create().await;

    let invalidated = h.service.invalidate(&h.physician, report.id).await.unwrap();
    assert!(!invalidated.valid);
    assert_eq!(invalidated.status, ReportStatus::Invalidated);
    assert_eq!(
        invalidated.history.last().map(|e| e.action),
        Some(HistoryAction::Invalidated)
    );

    let again = h.service.invalidate(&h.physician, report.id).await.unwrap();
    assert_eq!(again.history.len(), invalidated.history.len());

    let sign = h
        .service
        .sign(&h.physician, report.id, SignMode::Automatic)
        .await;
    assert_eq!(sign.unwrap_err().kind(), ErrorKind::Conflict);
    let redo = h.service.redo(&h.physician, report.id, None).await;
    assert_eq!(redo.unwrap_err().kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn public_view_masks_code_and_hides_keys() {
    let h = harness().await;
    let report = h.create().await;

    let view = h.service.public_view(report.id).await.unwrap();
    assert_eq!(view.patient_name, "Maria Silva");
    assert_eq!(view.exam_type, "Eletrocardiograma");
    assert_eq!(view.code, mask_code(&report.id.to_string().to_uppercase()));
    assert!(view.code.contains("****"));
    assert!(!view.signed);
    assert!(view.valid);
    assert_eq!(view.status, "Laudo pronto para assinatura");

    let json = serde_json::to_string(&view).unwrap();
    assert!(!json.contains("laudos/"));
    assert!(!json.contains(&h.exam_id.to_string()));
}

#[tokio::test]
async fn download_streams_current_document() {
    let h = harness().await;
    let report = h.create().await;

    let download = h.service.download(&h.physician, report.id).await.unwrap();
    let DocumentDownload::Stream { filename, artifact } = download else {
        panic!("expected a stream");
    };
    assert_eq!(filename, format!("laudo_{}.pdf", report.id));

    let chunks: Vec<_> = artifact.stream.collect().await;
    let bytes: Vec<u8> = chunks
        .into_iter()
        .flat_map(|chunk| chunk.unwrap().to_vec())
        .collect();
    assert!(bytes.starts_with(b"%PDF"));

    h.service.invalidate(&h.physician, report.id).await.unwrap();
    let public = h.service.public_download(report.id).await;
    assert_eq!(public.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn failing_audit_sink_does_not_fail_operations() {
    let h = harness_with(Store::Working, Store::Working, Arc::new(FailingAudit)).await;

    let report = h.create().await;
    let invalidated = h.service.invalidate(&h.physician, report.id).await.unwrap();
    assert_eq!(invalidated.status, ReportStatus::Invalidated);
}

#[test]
fn upload_check_accepts_pdf_type_with_parameters() {
    assert!(check_pdf_upload(&pdf_bytes(), "Application/PDF; name=laudo.pdf").is_ok());
    assert!(check_pdf_upload(&pdf_bytes(), "application/octet-stream").is_err());
    assert!(check_pdf_upload(&[], "application/pdf").is_err());
}
