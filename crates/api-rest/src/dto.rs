//! Request and response bodies.

use laudo_certificates::CertificateSummary;
use laudo_core::{CreatedReport, PublicReportView, RedoneReport, Report, SignedReport};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReportReq {
    pub exam_id: String,
    pub conclusion: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateReportRes {
    pub report_id: String,
    pub status: String,
    pub auto_signing_available: bool,
    pub original_url: Option<String>,
}

impl From<CreatedReport> for CreateReportRes {
    fn from(created: CreatedReport) -> Self {
        Self {
            report_id: created.report.id.to_string(),
            status: created.report.status.label().to_owned(),
            auto_signing_available: created.auto_signing_available,
            original_url: created.original_url,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignReportRes {
    pub report_id: String,
    pub status: String,
    pub url: String,
    pub digitally_signed: bool,
    /// RFC 3339.
    pub signed_at: String,
}

impl From<SignedReport> for SignReportRes {
    fn from(signed: SignedReport) -> Self {
        Self {
            report_id: signed.report_id.to_string(),
            status: signed.status.label().to_owned(),
            url: signed.url,
            digitally_signed: signed.digitally_signed,
            signed_at: signed.signed_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RedoReportReq {
    /// Replacement conclusion; the current one is kept when absent.
    pub conclusion: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RedoReportRes {
    pub report_id: String,
    pub previous_report_id: String,
    pub version: u32,
    pub status: String,
    pub url: Option<String>,
}

impl From<RedoneReport> for RedoReportRes {
    fn from(redone: RedoneReport) -> Self {
        Self {
            report_id: redone.report.id.to_string(),
            previous_report_id: redone.previous_report_id.to_string(),
            version: redone.report.version,
            status: redone.report.status.label().to_owned(),
            url: redone.url,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryEntryRes {
    pub at: String,
    pub actor_name: String,
    pub action: String,
    pub detail: String,
    pub version: u32,
}

/// Report without artifact keys.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReportRes {
    pub report_id: String,
    pub exam_id: String,
    pub status: String,
    pub valid: bool,
    pub version: u32,
    pub conclusion: String,
    pub physician_name: String,
    pub digitally_signed: bool,
    pub signing_method: String,
    pub signed_at: Option<String>,
    pub previous_version: Option<String>,
    pub history: Vec<HistoryEntryRes>,
}

impl From<Report> for ReportRes {
    fn from(report: Report) -> Self {
        let signing_method = serde_json::to_value(report.signing_method)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        Self {
            report_id: report.id.to_string(),
            exam_id: report.exam_id.to_string(),
            status: report.status.label().to_owned(),
            valid: report.valid,
            version: report.version,
            conclusion: report.conclusion,
            physician_name: report.physician_name,
            digitally_signed: report.digitally_signed,
            signing_method,
            signed_at: report.signed_at.map(|t| t.to_rfc3339()),
            previous_version: report.previous_version.map(|id| id.to_string()),
            history: report
                .history
                .into_iter()
                .map(|entry| HistoryEntryRes {
                    at: entry.at.to_rfc3339(),
                    actor_name: entry.actor_name,
                    action: entry.action.label().to_owned(),
                    detail: entry.detail,
                    version: entry.version,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AccessUrlRes {
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublicReportRes {
    pub report_id: String,
    pub patient_name: String,
    pub exam_type: String,
    pub code: String,
    pub digitally_signed: bool,
    pub signed: bool,
    pub valid: bool,
    pub status: String,
    pub signed_at: Option<String>,
}

impl From<PublicReportView> for PublicReportRes {
    fn from(view: PublicReportView) -> Self {
        Self {
            report_id: view.report_id.to_string(),
            patient_name: view.patient_name,
            exam_type: view.exam_type,
            code: view.code,
            digitally_signed: view.digitally_signed,
            signed: view.signed,
            valid: view.valid,
            status: view.status,
            signed_at: view.signed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterCertificateReq {
    pub filename: String,
    pub password: String,
    /// PKCS#12 container, base64.
    pub pkcs12_base64: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterCertificateRes {
    pub certificate_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPasswordReq {
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmPasswordRes {
    pub valid: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CertificateRes {
    pub certificate_id: String,
    pub filename: String,
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: String,
    pub not_after: String,
    pub fingerprint: String,
    pub active: bool,
    pub expired: bool,
    pub total_uses: u64,
    pub last_used_at: Option<String>,
}

impl From<CertificateSummary> for CertificateRes {
    fn from(summary: CertificateSummary) -> Self {
        Self {
            certificate_id: summary.id.to_string(),
            filename: summary.original_filename,
            subject: summary.subject,
            issuer: summary.issuer,
            serial_number: summary.serial_number,
            not_before: summary.not_before.to_rfc3339(),
            not_after: summary.not_after.to_rfc3339(),
            fingerprint: summary.fingerprint.to_string(),
            active: summary.active,
            expired: summary.expired,
            total_uses: summary.total_uses,
            last_used_at: summary.last_used_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Query string of links issued by the HMAC URL signer.
#[derive(Debug, Deserialize)]
pub struct SignedLinkQuery {
    pub expires: i64,
    pub signature: String,
}
