//! Domain records.
//!
//! [`Report`] is the plaintext domain value the service works with. [`ReportRecord`] is its
//! persisted form, with the conclusion and physician display name sealed by the field codec.
//! Conversion happens only at the repository boundary.

use crate::LaudoResult;
use chrono::{DateTime, NaiveDate, Utc};
use laudo_crypto::{FieldCodec, SealedText};
use laudo_ids::{CertificateId, ExamId, PatientId, ReportId, TenantId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "Laudo pronto para assinatura")]
    PendingSignature,
    #[serde(rename = "Laudo assinado")]
    Signed,
    #[serde(rename = "Invalidado")]
    Invalidated,
}

impl ReportStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::PendingSignature => "Laudo pronto para assinatura",
            Self::Signed => "Laudo assinado",
            Self::Invalidated => "Invalidado",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExamStatus {
    #[serde(rename = "Aguardando laudo")]
    AwaitingReport,
    #[serde(rename = "Laudo realizado")]
    ReportReady,
    #[serde(rename = "Laudo assinado")]
    ReportSigned,
}

impl ExamStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::AwaitingReport => "Aguardando laudo",
            Self::ReportReady => "Laudo realizado",
            Self::ReportSigned => "Laudo assinado",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMethod {
    CertificadoMedico,
    UploadManual,
    SemAssinatura,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    #[serde(rename = "Criação")]
    Created,
    #[serde(rename = "Assinatura automática")]
    SignedAutomatically,
    #[serde(rename = "Assinatura manual")]
    SignedManually,
    #[serde(rename = "Upload de laudo assinado")]
    SignedUpload,
    #[serde(rename = "Refação")]
    Redone,
    #[serde(rename = "Invalidação")]
    Invalidated,
}

impl HistoryAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "Criação",
            Self::SignedAutomatically => "Assinatura automática",
            Self::SignedManually => "Assinatura manual",
            Self::SignedUpload => "Upload de laudo assinado",
            Self::Redone => "Refação",
            Self::Invalidated => "Invalidação",
        }
    }
}

/// One lifecycle event in a report's own history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub actor_id: UserId,
    pub actor_name: String,
    pub action: HistoryAction,
    pub detail: String,
    pub version: u32,
}

/// Request metadata forwarded to the audit collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// The authenticated caller of a core operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
    pub tenant_id: TenantId,
    pub request: RequestMeta,
}

/// Plaintext report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub id: ReportId,
    pub exam_id: ExamId,
    pub tenant_id: TenantId,
    pub conclusion: String,
    /// Responsible physician; the only actor allowed to sign or upload.
    pub physician_id: UserId,
    pub physician_name: String,
    pub created_by: UserId,
    pub status: ReportStatus,
    pub valid: bool,
    pub version: u32,
    pub history: Vec<HistoryEntry>,
    /// Unsigned render, removed once a signed artifact exists.
    pub original_key: Option<String>,
    pub signed_key: Option<String>,
    /// Public URL of an artifact that only exists in the legacy store.
    pub legacy_url: Option<String>,
    pub digitally_signed: bool,
    pub signing_method: SigningMethod,
    pub certificate_id: Option<CertificateId>,
    pub signed_at: Option<DateTime<Utc>>,
    pub exam_type_id: Option<String>,
    pub specialty_id: Option<String>,
    pub payment_value_cents: Option<u64>,
    pub payment_registered: bool,
    /// Report this one was redone from.
    pub previous_version: Option<ReportId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// Key of the artifact a reader should get: the signed one when present.
    pub fn current_key(&self) -> Option<&str> {
        self.signed_key.as_deref().or(self.original_key.as_deref())
    }

    pub(crate) fn push_history(&mut self, actor: &Actor, action: HistoryAction, detail: &str) {
        self.history.push(HistoryEntry {
            at: Utc::now(),
            actor_id: actor.id,
            actor_name: actor.name.clone(),
            action,
            detail: detail.to_owned(),
            version: self.version,
        });
    }
}

/// Persisted report row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: ReportId,
    pub exam_id: ExamId,
    pub tenant_id: TenantId,
    pub conclusion: SealedText,
    pub physician_id: UserId,
    pub physician_name: SealedText,
    pub created_by: UserId,
    pub status: ReportStatus,
    pub valid: bool,
    pub version: u32,
    pub history: Vec<HistoryEntry>,
    pub original_key: Option<String>,
    pub signed_key: Option<String>,
    pub legacy_url: Option<String>,
    pub digitally_signed: bool,
    pub signing_method: SigningMethod,
    pub certificate_id: Option<CertificateId>,
    pub signed_at: Option<DateTime<Utc>>,
    pub exam_type_id: Option<String>,
    pub specialty_id: Option<String>,
    pub payment_value_cents: Option<u64>,
    pub payment_registered: bool,
    pub previous_version: Option<ReportId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportRecord {
    /// Seals the encrypted fields of `report`.
    pub fn seal(report: &Report, codec: &dyn FieldCodec) -> LaudoResult<Self> {
        Ok(Self {
            id: report.id,
            exam_id: report.exam_id,
            tenant_id: report.tenant_id,
            conclusion: SealedText::seal(codec, &report.conclusion)?,
            physician_id: report.physician_id,
            physician_name: SealedText::seal(codec, &report.physician_name)?,
            created_by: report.created_by,
            status: report.status,
            valid: report.valid,
            version: report.version,
            history: report.history.clone(),
            original_key: report.original_key.clone(),
            signed_key: report.signed_key.clone(),
            legacy_url: report.legacy_url.clone(),
            digitally_signed: report.digitally_signed,
            signing_method: report.signing_method,
            certificate_id: report.certificate_id,
            signed_at: report.signed_at,
            exam_type_id: report.exam_type_id.clone(),
            specialty_id: report.specialty_id.clone(),
            payment_value_cents: report.payment_value_cents,
            payment_registered: report.payment_registered,
            previous_version: report.previous_version,
            created_at: report.created_at,
            updated_at: report.updated_at,
        })
    }

    /// Opens the sealed fields; values that fail to decrypt fall back to the stored string.
    pub fn open(self, codec: &dyn FieldCodec) -> Report {
        Report {
            id: self.id,
            exam_id: self.exam_id,
            tenant_id: self.tenant_id,
            conclusion: self.conclusion.open(codec),
            physician_id: self.physician_id,
            physician_name: self.physician_name.open(codec),
            created_by: self.created_by,
            status: self.status,
            valid: self.valid,
            version: self.version,
            history: self.history,
            original_key: self.original_key,
            signed_key: self.signed_key,
            legacy_url: self.legacy_url,
            digitally_signed: self.digitally_signed,
            signing_method: self.signing_method,
            certificate_id: self.certificate_id,
            signed_at: self.signed_at,
            exam_type_id: self.exam_type_id,
            specialty_id: self.specialty_id,
            payment_value_cents: self.payment_value_cents,
            payment_registered: self.payment_registered,
            previous_version: self.previous_version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Exam row. Only the fields the report pipeline reads or writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamRecord {
    pub id: ExamId,
    pub tenant_id: TenantId,
    pub patient_id: PatientId,
    /// Physician assigned to report on the exam.
    pub physician_id: UserId,
    pub exam_type: String,
    pub exam_type_id: Option<String>,
    pub specialty_id: Option<String>,
    pub performed_at: Option<DateTime<Utc>>,
    pub requesting_physician: Option<String>,
    pub height_cm: Option<String>,
    pub weight_kg: Option<String>,
    pub heart_rate_bpm: Option<String>,
    pub pr_interval_ms: Option<String>,
    pub qrs_duration_ms: Option<String>,
    pub payment_value_cents: Option<u64>,
    pub status: ExamStatus,
    /// The exam's single valid report.
    pub active_report: Option<ReportId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: PatientId,
    pub tenant_id: TenantId,
    pub name: SealedText,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicianRecord {
    pub id: UserId,
    pub name: String,
    /// CRM registration with state, e.g. `CRM-SP 123456`.
    pub crm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicRecord {
    pub id: TenantId,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use laudo_crypto::{AesGcmFieldCodec, FieldKey};

    #[test]
    fn labels_match_serialized_names() {
        for status in [
            ReportStatus::PendingSignature,
            ReportStatus::Signed,
            ReportStatus::Invalidated,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.label()));
        }
        for action in [HistoryAction::Created, HistoryAction::Redone, HistoryAction::SignedUpload] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.label()));
        }
        assert_eq!(
            serde_json::to_string(&SigningMethod::CertificadoMedico).unwrap(),
            "\"certificado_medico\""
        );
    }

    #[test]
    fn sealing_encrypts_conclusion_and_name() {
        let codec = AesGcmFieldCodec::new(&FieldKey::generate());
        let now = Utc::now();
        let report = Report {
            id: ReportId::new(),
            exam_id: ExamId::new(),
            tenant_id: TenantId::new(),
            conclusion: "Ritmo sinusal.".into(),
            physician_id: UserId::new(),
            physician_name: "Dra. Ana".into(),
            created_by: UserId::new(),
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
            exam_type_id: None,
            specialty_id: None,
            payment_value_cents: Some(12_000),
            payment_registered: false,
            previous_version: None,
            created_at: now,
            updated_at: now,
        };

        let record = ReportRecord::seal(&report, &codec).unwrap();
        assert!(record.conclusion.is_encrypted());
        assert!(!record.conclusion.stored().contains("Ritmo"));
        assert_eq!(record.open(&codec), report);
    }

    #[test]
    fn legacy_plaintext_is_read_as_is() {
        let codec = AesGcmFieldCodec::new(&FieldKey::generate());
        let sealed = SealedText::from_stored("Conclusão: normal");
        assert_eq!(sealed.open(&codec), "Conclusão: normal");
    }
}
