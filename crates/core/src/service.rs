//! Report lifecycle service.
//!
//! Drives a report through creation, signing, manual upload, redo and invalidation. Every
//! operation runs its steps strictly in order: render, sign, persist, clean up, update status.
//! Nothing is written to storage until the document bytes are final.

use crate::audit::{self, AuditRecord, AuditSink, REPORT_COLLECTION};
use crate::model::{
    Actor, ExamRecord, ExamStatus, HistoryAction, Report, ReportRecord, ReportStatus,
    SigningMethod,
};
use crate::repository::{
    ClinicRepository, ExamRepository, PatientRepository, PhysicianRepository, ReportRepository,
};
use crate::state::{check_artifacts, ReportEvent, ReportStateMachine};
use crate::{CoreConfig, LaudoError, LaudoResult};
use chrono::{DateTime, Utc};
use laudo_certificates::CertificateStore;
use laudo_crypto::FieldCodec;
use laudo_ids::{CertificateId, ExamId, ReportId, TenantId};
use laudo_render::{
    ClinicHeader, ExamSection, PatientSection, PhysicianSection, ReportDocument, ReportRenderer,
};
use laudo_signing::{SignerMetadata, SigningEngine};
use laudo_storage::{ArtifactKind, ArtifactStream, StorageLocation, StorageReconciler, StoredArtifact};
use laudo_types::{mask_code, NonEmptyText};
use serde::Serialize;
use std::sync::Arc;

#[cfg(test)]
mod tests;

/// Collaborators of [`ReportService`].
#[derive(Clone)]
pub struct ReportServiceParts {
    pub reports: Arc<dyn ReportRepository>,
    pub exams: Arc<dyn ExamRepository>,
    pub patients: Arc<dyn PatientRepository>,
    pub physicians: Arc<dyn PhysicianRepository>,
    pub clinics: Arc<dyn ClinicRepository>,
    pub codec: Arc<dyn FieldCodec>,
    pub certificates: CertificateStore,
    pub storage: StorageReconciler,
    pub audit: Arc<dyn AuditSink>,
}

/// How a certificate signature was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMode {
    Automatic,
    Manual,
}

impl SignMode {
    fn history_action(self) -> HistoryAction {
        match self {
            Self::Automatic => HistoryAction::SignedAutomatically,
            Self::Manual => HistoryAction::SignedManually,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedReport {
    pub report: Report,
    /// The responsible physician has a usable certificate.
    pub auto_signing_available: bool,
    /// Access URL of the unsigned original, if it could be stored.
    pub original_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedReport {
    pub report_id: ReportId,
    pub status: ReportStatus,
    pub url: String,
    pub location: StorageLocation,
    pub digitally_signed: bool,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedoneReport {
    pub report: Report,
    pub previous_report_id: ReportId,
    /// Access URL of the new document, signed or unsigned.
    pub url: Option<String>,
}

/// Unauthenticated projection of a report.
///
/// Carries no storage keys and no identifiers besides the report id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicReportView {
    pub report_id: ReportId,
    pub patient_name: String,
    pub exam_type: String,
    pub code: String,
    pub digitally_signed: bool,
    pub signed: bool,
    pub valid: bool,
    pub status: String,
    pub signed_at: Option<DateTime<Utc>>,
}

/// How a report document is delivered to a client.
pub enum DocumentDownload {
    /// Bytes proxied from the object store that holds them.
    Stream {
        filename: String,
        artifact: ArtifactStream,
    },
    /// Legacy documents only reachable through their public URL.
    Redirect(String),
}

impl std::fmt::Debug for DocumentDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream { filename, artifact } => f
                .debug_struct("Stream")
                .field("filename", filename)
                .field("artifact", artifact)
                .finish(),
            Self::Redirect(url) => f.debug_tuple("Redirect").field(url).finish(),
        }
    }
}

/// What a finished signature changes on the report.
struct SignatureApplied {
    action: HistoryAction,
    detail: String,
    method: SigningMethod,
    digitally_signed: bool,
    certificate_id: Option<CertificateId>,
    signed_at: DateTime<Utc>,
}

/// Certificate signature ready to be persisted.
struct CertificateSignature {
    bytes: Vec<u8>,
    certificate_id: CertificateId,
    signed_at: DateTime<Utc>,
    variant: laudo_signing::PasswordVariant,
}

/// Report lifecycle operations.
#[derive(Clone)]
pub struct ReportService {
    cfg: Arc<CoreConfig>,
    reports: Arc<dyn ReportRepository>,
    exams: Arc<dyn ExamRepository>,
    patients: Arc<dyn PatientRepository>,
    physicians: Arc<dyn PhysicianRepository>,
    clinics: Arc<dyn ClinicRepository>,
    codec: Arc<dyn FieldCodec>,
    certificates: CertificateStore,
    storage: StorageReconciler,
    audit: Arc<dyn AuditSink>,
    renderer: ReportRenderer,
    engine: SigningEngine,
    states: Arc<ReportStateMachine>,
}

impl ReportService {
    /// Creates the service.
    ///
    /// # Arguments
    ///
    /// * `cfg` - Resolved core configuration.
    /// * `parts` - Persistence, codec, certificate, storage and audit collaborators.
    pub fn new(cfg: Arc<CoreConfig>, parts: ReportServiceParts) -> Self {
        let engine = SigningEngine::new(cfg.signature_reserve_bytes());
        Self {
            cfg,
            reports: parts.reports,
            exams: parts.exams,
            patients: parts.patients,
            physicians: parts.physicians,
            clinics: parts.clinics,
            codec: parts.codec,
            certificates: parts.certificates,
            storage: parts.storage,
            audit: parts.audit,
            renderer: ReportRenderer::new(),
            engine,
            states: Arc::new(ReportStateMachine::new()),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn certificates(&self) -> &CertificateStore {
        &self.certificates
    }

    pub fn storage(&self) -> &StorageReconciler {
        &self.storage
    }

    /// Creates the report for an exam.
    ///
    /// The report starts in [`ReportStatus::PendingSignature`]. An unsigned original is
    /// rendered and stored straight away; failing to do so is logged and does not fail the
    /// creation.
    ///
    /// # Arguments
    ///
    /// * `actor` - Caller; recorded as the report's creator.
    /// * `exam_id` - Exam the report belongs to.
    /// * `conclusion` - Physician conclusion, one paragraph per line.
    ///
    /// # Returns
    ///
    /// The new report and whether its physician can sign it automatically.
    ///
    /// # Errors
    ///
    /// - [`LaudoError::Validation`] if the conclusion is blank.
    /// - [`LaudoError::NotFound`] if the exam or its physician does not exist in the actor's
    ///   tenant.
    /// - [`LaudoError::Conflict`] if the exam already has a valid report, including when a
    ///   concurrent creation claimed it first.
    pub async fn create(
        &self,
        actor: &Actor,
        exam_id: ExamId,
        conclusion: &str,
    ) -> LaudoResult<CreatedReport> {
        let conclusion = NonEmptyText::new(conclusion)?;
        let exam = self.load_exam(actor.tenant_id, exam_id).await?;

        let versions = self.reports.list_for_exam(exam_id).await?;
        if let Some(valid) = versions.iter().find(|record| record.valid) {
            return Err(LaudoError::Conflict(format!(
                "exam {exam_id} already has a valid report ({}); invalidate it first",
                valid.id
            )));
        }

        let physician = self
            .physicians
            .get(exam.physician_id)
            .await?
            .ok_or_else(|| LaudoError::NotFound(format!("physician {}", exam.physician_id)))?;

        let now = Utc::now();
        let mut report = Report {
            id: ReportId::new(),
            exam_id,
            tenant_id: exam.tenant_id,
            conclusion: conclusion.into_inner(),
            physician_id: physician.id,
            physician_name: physician.name,
            created_by: actor.id,
            status: ReportStatus::PendingSignature,
            valid: true,
            version: 1,
            history: Vec::new(),
            original_key: None,
            signed_key: None,
            legacy_url: None,
            digitally_signed: false,
            signing_method: SigningMethod::SemAssinatura,
            certificate_id: None,
            signed_at: None,
            exam_type_id: exam.exam_type_id.clone(),
            specialty_id: exam.specialty_id.clone(),
            payment_value_cents: exam.payment_value_cents,
            payment_registered: false,
            previous_version: None,
            created_at: now,
            updated_at: now,
        };
        report.push_history(actor, HistoryAction::Created, "Laudo criado");

        self.claim_and_insert(&report, exam.active_report).await?;

        let original_url = self.store_original(&mut report, &exam).await;
        self.set_exam_status(exam_id, ExamStatus::ReportReady).await;

        let auto_signing_available = self
            .certificates
            .auto_signing_available(report.physician_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "certificate lookup failed");
                false
            });

        tracing::info!(report_id = %report.id, exam_id = %exam_id, "report created");
        self.audit(
            actor,
            "criar_laudo",
            format!("Laudo criado para o exame {exam_id}"),
            &report,
            None,
        );

        Ok(CreatedReport {
            report,
            auto_signing_available,
            original_url,
        })
    }

    /// Signs a report with the responsible physician's active certificate.
    ///
    /// # Arguments
    ///
    /// * `actor` - Must be the report's responsible physician.
    /// * `report_id` - Report to sign.
    /// * `mode` - Recorded in the history; both modes run the same pipeline.
    ///
    /// # Errors
    ///
    /// - [`LaudoError::Permission`] if the actor is not the responsible physician.
    /// - [`LaudoError::Conflict`] if the report is not pending signature.
    /// - [`LaudoError::Certificate`] if there is no usable certificate, every password
    ///   variant failed, or signing timed out. The report is left unchanged.
    /// - [`LaudoError::Storage`] if neither store accepted the signed document.
    pub async fn sign(
        &self,
        actor: &Actor,
        report_id: ReportId,
        mode: SignMode,
    ) -> LaudoResult<SignedReport> {
        let report = self.load_for_actor(actor, report_id).await?;
        require_physician(actor, &report)?;
        let next = self.states.transition(report.status, ReportEvent::Sign)?;
        let exam = self.load_exam(report.tenant_id, report.exam_id).await?;

        let signature = self.certificate_signature(&report, &exam).await?;
        let stored = self
            .storage
            .persist(
                signature.bytes,
                report.id,
                report.tenant_id,
                ArtifactKind::Signed,
                &document_filename(report.id),
            )
            .await?;

        let before = audit_summary(&report);
        let applied = SignatureApplied {
            action: mode.history_action(),
            detail: format!(
                "Assinado com certificado digital (senha: {})",
                signature.variant
            ),
            method: SigningMethod::CertificadoMedico,
            digitally_signed: true,
            certificate_id: Some(signature.certificate_id),
            signed_at: signature.signed_at,
        };
        let report = self.finish_signature(actor, report, next, &stored, applied).await?;

        self.audit(
            actor,
            "assinar_laudo",
            format!("Laudo {} assinado digitalmente", report.id),
            &report,
            Some(before),
        );

        Ok(SignedReport {
            report_id: report.id,
            status: report.status,
            url: stored.url,
            location: stored.location,
            digitally_signed: true,
            signed_at: signature.signed_at,
        })
    }

    /// Stores a document the physician signed outside the system.
    ///
    /// The declared type must be `application/pdf` and the bytes must look like a PDF. Both
    /// checks run before anything is written.
    ///
    /// # Errors
    ///
    /// - [`LaudoError::Validation`] for a non-PDF type or content.
    /// - [`LaudoError::Permission`] if the actor is not the responsible physician.
    /// - [`LaudoError::Conflict`] if the report is not pending signature.
    /// - [`LaudoError::Storage`] if neither store accepted the document.
    pub async fn upload_signed(
        &self,
        actor: &Actor,
        report_id: ReportId,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> LaudoResult<SignedReport> {
        check_pdf_upload(&bytes, mime_type)?;

        let report = self.load_for_actor(actor, report_id).await?;
        require_physician(actor, &report)?;
        let next = self.states.transition(report.status, ReportEvent::UploadSigned)?;

        let stored = self
            .storage
            .persist(
                bytes,
                report.id,
                report.tenant_id,
                ArtifactKind::Signed,
                &document_filename(report.id),
            )
            .await?;

        let before = audit_summary(&report);
        let signed_at = Utc::now();
        let applied = SignatureApplied {
            action: HistoryAction::SignedUpload,
            detail: format!("Documento assinado enviado ({} bytes)", stored.size_bytes),
            method: SigningMethod::UploadManual,
            digitally_signed: false,
            certificate_id: None,
            signed_at,
        };
        let report = self.finish_signature(actor, report, next, &stored, applied).await?;

        self.audit(
            actor,
            "upload_laudo_assinado",
            format!("Laudo {} assinado enviado manualmente", report.id),
            &report,
            Some(before),
        );

        Ok(SignedReport {
            report_id: report.id,
            status: report.status,
            url: stored.url,
            location: stored.location,
            digitally_signed: false,
            signed_at,
        })
    }

    /// Creates a new version of a report.
    ///
    /// The new version copies the history of the source, appends a redo entry and takes over
    /// the exam's active-report link. It is signed straight away when the physician has a
    /// usable certificate; otherwise, or if signing fails, an unsigned original is stored. The
    /// source report is not modified.
    ///
    /// # Arguments
    ///
    /// * `actor` - Must be the report's responsible physician.
    /// * `report_id` - Source report; must be the exam's active report.
    /// * `new_conclusion` - Replacement conclusion; the source conclusion is kept if `None`.
    ///
    /// # Errors
    ///
    /// - [`LaudoError::Validation`] if `new_conclusion` is blank.
    /// - [`LaudoError::Permission`] if the actor is not the responsible physician.
    /// - [`LaudoError::Conflict`] if the source was invalidated, is no longer the exam's
    ///   active report, or a concurrent redo claimed the exam first.
    pub async fn redo(
        &self,
        actor: &Actor,
        report_id: ReportId,
        new_conclusion: Option<&str>,
    ) -> LaudoResult<RedoneReport> {
        let source = self.load_for_actor(actor, report_id).await?;
        require_physician(actor, &source)?;
        self.states.transition(source.status, ReportEvent::Redo)?;

        let exam = self.load_exam(source.tenant_id, source.exam_id).await?;
        if exam.active_report != Some(source.id) {
            return Err(LaudoError::Conflict(format!(
                "report {} is not the active report of exam {}",
                source.id, exam.id
            )));
        }

        let conclusion = match new_conclusion {
            Some(text) => NonEmptyText::new(text)?.into_inner(),
            None => source.conclusion.clone(),
        };

        let latest_version = self
            .reports
            .list_for_exam(exam.id)
            .await?
            .iter()
            .map(|record| record.version)
            .max()
            .unwrap_or(source.version);

        let now = Utc::now();
        let mut report = Report {
            id: ReportId::new(),
            conclusion,
            status: ReportStatus::PendingSignature,
            valid: true,
            version: latest_version + 1,
            history: source.history.clone(),
            created_by: actor.id,
            original_key: None,
            signed_key: None,
            legacy_url: None,
            digitally_signed: false,
            signing_method: SigningMethod::SemAssinatura,
            certificate_id: None,
            signed_at: None,
            payment_registered: false,
            previous_version: Some(source.id),
            created_at: now,
            updated_at: now,
            ..source.clone()
        };
        report.push_history(
            actor,
            HistoryAction::Redone,
            &format!("Refeito a partir da versão {}", source.version),
        );

        self.claim_and_insert(&report, Some(source.id)).await?;

        let mut url = None;
        if self.signing_available(&report).await {
            match self.redo_signature(actor, &report, &exam).await {
                Ok((signed, signed_url)) => {
                    report = signed;
                    url = Some(signed_url);
                }
                Err(e) => {
                    tracing::warn!(
                        report_id = %report.id,
                        error = %e,
                        "signing redone report failed, storing unsigned document"
                    );
                }
            }
        }
        if url.is_none() {
            url = self.store_original(&mut report, &exam).await;
        }

        let exam_status = if report.status == ReportStatus::Signed {
            ExamStatus::ReportSigned
        } else {
            ExamStatus::ReportReady
        };
        self.set_exam_status(exam.id, exam_status).await;

        tracing::info!(
            report_id = %report.id,
            previous = %source.id,
            version = report.version,
            "report redone"
        );
        self.audit(
            actor,
            "refazer_laudo",
            format!("Laudo {} refeito como {}", source.id, report.id),
            &report,
            Some(audit_summary(&source)),
        );

        Ok(RedoneReport {
            report,
            previous_report_id: source.id,
            url,
        })
    }

    /// Invalidates a report.
    ///
    /// Invalidating an already invalidated report returns it unchanged. If the report was the
    /// exam's active report, the link falls back to the version it was redone from when that
    /// version is still valid; otherwise the exam goes back to awaiting a report.
    ///
    /// # Errors
    ///
    /// Returns [`LaudoError::NotFound`] if the report does not exist in the actor's tenant.
    pub async fn invalidate(&self, actor: &Actor, report_id: ReportId) -> LaudoResult<Report> {
        let mut report = self.load_for_actor(actor, report_id).await?;
        let next = self.states.transition(report.status, ReportEvent::Invalidate)?;
        if report.status == ReportStatus::Invalidated {
            return Ok(report);
        }

        let before = audit_summary(&report);
        report.status = next;
        report.valid = false;
        report.updated_at = Utc::now();
        report.push_history(actor, HistoryAction::Invalidated, "Laudo invalidado");
        self.save(&report).await?;

        let fallback = match report.previous_version {
            Some(previous_id) => self
                .find_report(previous_id)
                .await?
                .filter(|previous| previous.valid && previous.exam_id == report.exam_id),
            None => None,
        };
        if self
            .exams
            .claim_active_report(
                report.exam_id,
                Some(report.id),
                fallback.as_ref().map(|previous| previous.id),
            )
            .await?
        {
            let exam_status = match &fallback {
                Some(previous) if previous.status == ReportStatus::Signed => {
                    ExamStatus::ReportSigned
                }
                Some(_) => ExamStatus::ReportReady,
                None => ExamStatus::AwaitingReport,
            };
            self.set_exam_status(report.exam_id, exam_status).await;
        }

        tracing::info!(report_id = %report.id, "report invalidated");
        self.audit(
            actor,
            "invalidar_laudo",
            format!("Laudo {} invalidado", report.id),
            &report,
            Some(before),
        );
        Ok(report)
    }

    /// Decrypted report, scoped to the actor's tenant.
    pub async fn get(&self, actor: &Actor, report_id: ReportId) -> LaudoResult<Report> {
        self.load_for_actor(actor, report_id).await
    }

    /// Every version of the exam's report, oldest first.
    pub async fn versions(&self, actor: &Actor, exam_id: ExamId) -> LaudoResult<Vec<Report>> {
        self.load_exam(actor.tenant_id, exam_id).await?;
        let records = self.reports.list_for_exam(exam_id).await?;
        Ok(records
            .into_iter()
            .map(|record| record.open(self.codec.as_ref()))
            .collect())
    }

    /// Time-boxed URL of the report's current document.
    ///
    /// # Errors
    ///
    /// Returns [`LaudoError::NotFound`] if the report has no document.
    pub async fn access_url(&self, actor: &Actor, report_id: ReportId) -> LaudoResult<String> {
        let report = self.load_for_actor(actor, report_id).await?;
        self.document_url(&report).await
    }

    /// Streams the report's current document to an authenticated caller.
    pub async fn download(
        &self,
        actor: &Actor,
        report_id: ReportId,
    ) -> LaudoResult<DocumentDownload> {
        let report = self.load_for_actor(actor, report_id).await?;
        self.open_document(&report).await
    }

    /// Streams a current report's document to the public verification page.
    ///
    /// Only the exam's active version is served; superseded and invalidated versions are
    /// reported as missing.
    pub async fn public_download(&self, report_id: ReportId) -> LaudoResult<DocumentDownload> {
        let report = self.load_report(report_id).await?;
        let exam = self.load_exam(report.tenant_id, report.exam_id).await?;
        if !is_current(&report, &exam) {
            return Err(LaudoError::NotFound(format!("report {report_id}")));
        }
        self.open_document(&report).await
    }

    /// Public verification data for a report.
    ///
    /// # Errors
    ///
    /// Returns [`LaudoError::NotFound`] if the report or its exam does not exist.
    pub async fn public_view(&self, report_id: ReportId) -> LaudoResult<PublicReportView> {
        let report = self.load_report(report_id).await?;
        let exam = self.load_exam(report.tenant_id, report.exam_id).await?;
        let valid = is_current(&report, &exam);
        let patient_name = match self.patients.get(exam.patient_id).await? {
            Some(patient) => patient.name.open(self.codec.as_ref()),
            None => String::new(),
        };

        Ok(PublicReportView {
            report_id: report.id,
            patient_name,
            exam_type: exam.exam_type,
            code: mask_code(&verification_code(report.id)),
            digitally_signed: report.digitally_signed,
            signed: report.status == ReportStatus::Signed,
            valid,
            status: report.status.label().to_owned(),
            signed_at: report.signed_at,
        })
    }

    async fn find_report(&self, report_id: ReportId) -> LaudoResult<Option<Report>> {
        Ok(self
            .reports
            .get(report_id)
            .await?
            .map(|record| record.open(self.codec.as_ref())))
    }

    async fn load_report(&self, report_id: ReportId) -> LaudoResult<Report> {
        self.find_report(report_id)
            .await?
            .ok_or_else(|| LaudoError::NotFound(format!("report {report_id}")))
    }

    async fn load_for_actor(&self, actor: &Actor, report_id: ReportId) -> LaudoResult<Report> {
        let report = self.load_report(report_id).await?;
        if report.tenant_id != actor.tenant_id {
            return Err(LaudoError::NotFound(format!("report {report_id}")));
        }
        Ok(report)
    }

    async fn load_exam(&self, tenant_id: TenantId, exam_id: ExamId) -> LaudoResult<ExamRecord> {
        match self.exams.get(exam_id).await? {
            Some(exam) if exam.tenant_id == tenant_id => Ok(exam),
            _ => Err(LaudoError::NotFound(format!("exam {exam_id}"))),
        }
    }

    async fn save(&self, report: &Report) -> LaudoResult<()> {
        check_artifacts(report)?;
        let record = ReportRecord::seal(report, self.codec.as_ref())?;
        self.reports.update(record).await
    }

    /// Takes over the exam's active-report link and inserts the report.
    ///
    /// The link is released again if the insert fails.
    async fn claim_and_insert(&self, report: &Report, expected: Option<ReportId>) -> LaudoResult<()> {
        let claimed = self
            .exams
            .claim_active_report(report.exam_id, expected, Some(report.id))
            .await?;
        if !claimed {
            return Err(LaudoError::Conflict(format!(
                "exam {} was updated by another request",
                report.exam_id
            )));
        }

        let inserted = match ReportRecord::seal(report, self.codec.as_ref()) {
            Ok(record) => self.reports.insert(record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = inserted {
            if let Err(release) = self
                .exams
                .claim_active_report(report.exam_id, Some(report.id), expected)
                .await
            {
                tracing::error!(exam_id = %report.exam_id, error = %release, "failed to release exam claim");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn set_exam_status(&self, exam_id: ExamId, status: ExamStatus) {
        if let Err(e) = self.exams.set_status(exam_id, status).await {
            tracing::warn!(exam_id = %exam_id, status = status.label(), error = %e, "failed to update exam status");
        }
    }

    async fn signing_available(&self, report: &Report) -> bool {
        match self.certificates.auto_signing_available(report.physician_id).await {
            Ok(available) => available,
            Err(e) => {
                tracing::warn!(report_id = %report.id, error = %e, "certificate lookup failed");
                false
            }
        }
    }

    /// Builds the rendering context from the report and its exam.
    async fn document(
        &self,
        report: &Report,
        exam: &ExamRecord,
        signed_at: Option<DateTime<Utc>>,
    ) -> LaudoResult<ReportDocument> {
        let (patient, physician, clinic) = tokio::try_join!(
            self.patients.get(exam.patient_id),
            self.physicians.get(report.physician_id),
            self.clinics.get(report.tenant_id),
        )?;
        let patient =
            patient.ok_or_else(|| LaudoError::NotFound(format!("patient {}", exam.patient_id)))?;

        let clinic = clinic
            .map(|c| ClinicHeader {
                name: c.name,
                address: c.address,
                phone: c.phone,
            })
            .unwrap_or_default();

        Ok(ReportDocument {
            clinic,
            patient: PatientSection {
                name: patient.name.open(self.codec.as_ref()),
                birth_date: patient.birth_date,
                sex: patient.sex,
            },
            exam: ExamSection {
                exam_type: exam.exam_type.clone(),
                performed_at: exam.performed_at,
                requesting_physician: exam.requesting_physician.clone(),
                height_cm: exam.height_cm.clone(),
                weight_kg: exam.weight_kg.clone(),
                heart_rate_bpm: exam.heart_rate_bpm.clone(),
                pr_interval_ms: exam.pr_interval_ms.clone(),
                qrs_duration_ms: exam.qrs_duration_ms.clone(),
            },
            physician: PhysicianSection {
                name: report.physician_name.clone(),
                crm: physician.and_then(|p| p.crm),
            },
            conclusion: report.conclusion.clone(),
            public_url: Some(self.cfg.public_report_url(report.id)),
            digitally_signed: signed_at.is_some(),
            signed_at,
            verification_code: verification_code(report.id),
            generated_at: Utc::now(),
        })
    }

    /// Renders and stores the unsigned original. Failures are logged and yield `None`.
    async fn store_original(&self, report: &mut Report, exam: &ExamRecord) -> Option<String> {
        let current: &Report = report;
        let stored = async {
            let document = self.document(current, exam, None).await?;
            let pdf = self.renderer.render(&document)?;
            let stored = self
                .storage
                .persist(
                    pdf,
                    current.id,
                    current.tenant_id,
                    ArtifactKind::Original,
                    &document_filename(report.id),
                )
                .await?;
            Ok::<_, LaudoError>(stored)
        }
        .await;

        let stored = match stored {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(report_id = %report.id, error = %e, "unsigned original not stored");
                return None;
            }
        };

        report.original_key = Some(stored.key.clone());
        report.updated_at = Utc::now();
        if let Err(e) = self.save(report).await {
            tracing::warn!(report_id = %report.id, error = %e, "failed to link unsigned original");
            report.original_key = None;
            self.discard(&stored.key).await;
            return None;
        }
        Some(stored.url)
    }

    /// Renders the signed layout and signs it with the physician's certificate.
    ///
    /// Certificate usage is recorded on success and the failure reason on error; neither
    /// bookkeeping write can fail the signature.
    async fn certificate_signature(
        &self,
        report: &Report,
        exam: &ExamRecord,
    ) -> LaudoResult<CertificateSignature> {
        let material = self
            .certificates
            .fetch_for_signing(report.physician_id)
            .await?;
        let certificate_id = material.certificate_id;

        let document = self.document(report, exam, Some(Utc::now())).await?;
        let pdf = self.renderer.render(&document)?;
        let metadata = SignerMetadata {
            name: report.physician_name.clone(),
            reason: format!("Laudo médico {}", verification_code(report.id)),
            location: self.cfg.signature_location().to_owned(),
            contact_info: None,
        };

        let engine = self.engine.clone();
        let task = tokio::task::spawn_blocking(move || {
            engine.sign(&pdf, &material.pkcs12, &material.password, &metadata)
        });
        let outcome = match tokio::time::timeout(self.cfg.signing_timeout(), task).await {
            Ok(Ok(result)) => result.map_err(LaudoError::from),
            Ok(Err(e)) => Err(LaudoError::Internal(format!("signing task failed: {e}"))),
            Err(_) => Err(LaudoError::Certificate(
                "digital signature timed out; upload the signed document manually instead".into(),
            )),
        };

        match outcome {
            Ok(signed) => {
                if let Err(e) = self.certificates.record_use(certificate_id).await {
                    tracing::warn!(certificate_id = %certificate_id, error = %e, "failed to record certificate use");
                }
                Ok(CertificateSignature {
                    bytes: signed.bytes,
                    certificate_id,
                    signed_at: signed.signed_at,
                    variant: signed.variant,
                })
            }
            Err(e) => {
                tracing::warn!(report_id = %report.id, certificate_id = %certificate_id, error = %e, "digital signature failed");
                if let Err(record) = self
                    .certificates
                    .record_failure(certificate_id, e.detail())
                    .await
                {
                    tracing::warn!(certificate_id = %certificate_id, error = %record, "failed to record certificate failure");
                }
                Err(e)
            }
        }
    }

    /// Signs and stores a freshly redone report.
    async fn redo_signature(
        &self,
        actor: &Actor,
        report: &Report,
        exam: &ExamRecord,
    ) -> LaudoResult<(Report, String)> {
        let next = self.states.transition(report.status, ReportEvent::Sign)?;
        let signature = self.certificate_signature(report, exam).await?;
        let stored = self
            .storage
            .persist(
                signature.bytes,
                report.id,
                report.tenant_id,
                ArtifactKind::Signed,
                &document_filename(report.id),
            )
            .await?;
        let applied = SignatureApplied {
            action: HistoryAction::SignedAutomatically,
            detail: format!(
                "Assinado com certificado digital (senha: {})",
                signature.variant
            ),
            method: SigningMethod::CertificadoMedico,
            digitally_signed: true,
            certificate_id: Some(signature.certificate_id),
            signed_at: signature.signed_at,
        };
        let report = self
            .finish_signature(actor, report.clone(), next, &stored, applied)
            .await?;
        Ok((report, stored.url))
    }

    /// Removes the superseded original and records the signature on the report.
    ///
    /// If the report cannot be saved the newly stored artifact is removed again.
    async fn finish_signature(
        &self,
        actor: &Actor,
        mut report: Report,
        next: ReportStatus,
        stored: &StoredArtifact,
        applied: SignatureApplied,
    ) -> LaudoResult<Report> {
        if let Some(original) = report.original_key.take() {
            self.discard(&original).await;
        }

        report.status = next;
        report.signed_key = Some(stored.key.clone());
        report.legacy_url =
            (stored.location == StorageLocation::Legacy).then(|| stored.url.clone());
        report.digitally_signed = applied.digitally_signed;
        report.signing_method = applied.method;
        report.certificate_id = applied.certificate_id;
        report.signed_at = Some(applied.signed_at);
        report.updated_at = Utc::now();
        report.push_history(actor, applied.action, &applied.detail);

        if let Err(e) = self.save(&report).await {
            tracing::error!(report_id = %report.id, error = %e, "failed to save signed report");
            self.discard(&stored.key).await;
            return Err(e);
        }

        self.set_exam_status(report.exam_id, ExamStatus::ReportSigned)
            .await;
        tracing::info!(
            report_id = %report.id,
            key = %stored.key,
            method = ?report.signing_method,
            "report signed"
        );
        Ok(report)
    }

    /// Best-effort delete of an artifact.
    async fn discard(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            tracing::warn!(key = %key, error = %e, "failed to delete artifact");
        }
    }

    async fn document_url(&self, report: &Report) -> LaudoResult<String> {
        if let Some(key) = report.current_key() {
            return Ok(self
                .storage
                .get_access_url(key, self.cfg.access_url_ttl())
                .await?);
        }
        report
            .legacy_url
            .clone()
            .ok_or_else(|| LaudoError::NotFound(format!("document of report {}", report.id)))
    }

    async fn open_document(&self, report: &Report) -> LaudoResult<DocumentDownload> {
        if let Some(key) = report.current_key() {
            let artifact = self.storage.open_stream(key).await?;
            return Ok(DocumentDownload::Stream {
                filename: document_filename(report.id),
                artifact,
            });
        }
        match &report.legacy_url {
            Some(url) => Ok(DocumentDownload::Redirect(url.clone())),
            None => Err(LaudoError::NotFound(format!(
                "document of report {}",
                report.id
            ))),
        }
    }

    fn audit(
        &self,
        actor: &Actor,
        action: &str,
        description: String,
        report: &Report,
        before: Option<serde_json::Value>,
    ) {
        audit::dispatch(
            &self.audit,
            AuditRecord {
                actor_id: actor.id,
                action: action.to_owned(),
                description,
                collection: REPORT_COLLECTION.to_owned(),
                document_id: report.id.to_string(),
                before,
                after: Some(audit_summary(report)),
                request_meta: actor.request.clone(),
                tenant_id: report.tenant_id,
            },
        );
    }
}

/// A report is current while it is valid and still the exam's active version.
fn is_current(report: &Report, exam: &ExamRecord) -> bool {
    report.valid && exam.active_report == Some(report.id)
}

fn require_physician(actor: &Actor, report: &Report) -> LaudoResult<()> {
    if actor.id != report.physician_id {
        return Err(LaudoError::Permission(
            "only the responsible physician can sign this report".into(),
        ));
    }
    Ok(())
}

/// Rejects uploads that are not PDF documents, by declared type and by content.
fn check_pdf_upload(bytes: &[u8], mime_type: &str) -> LaudoResult<()> {
    let declared = mime_type.split(';').next().unwrap_or_default().trim();
    if !declared.eq_ignore_ascii_case("application/pdf") {
        return Err(LaudoError::Validation(format!(
            "only application/pdf documents are accepted, got \"{declared}\""
        )));
    }
    if bytes.is_empty() {
        return Err(LaudoError::Validation("uploaded document is empty".into()));
    }
    match infer::get(bytes) {
        Some(kind) if kind.mime_type() == "application/pdf" => Ok(()),
        _ => Err(LaudoError::Validation(
            "uploaded file is not a PDF document".into(),
        )),
    }
}

/// Code printed on the document and checked on the public page.
fn verification_code(report_id: ReportId) -> String {
    report_id.to_string().to_uppercase()
}

fn document_filename(report_id: ReportId) -> String {
    format!("laudo_{report_id}.pdf")
}

/// Report fields written to the audit log. The conclusion is left out.
fn audit_summary(report: &Report) -> serde_json::Value {
    serde_json::json!({
        "id": report.id,
        "exam_id": report.exam_id,
        "status": report.status,
        "valid": report.valid,
        "version": report.version,
        "signing_method": report.signing_method,
        "digitally_signed": report.digitally_signed,
        "signed_at": report.signed_at,
    })
}
