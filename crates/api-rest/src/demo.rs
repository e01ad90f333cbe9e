//! Demo data for running the server without an external database.

use laudo_core::{
    ClinicRecord, ClinicRepository, ExamRecord, ExamRepository, ExamStatus, InMemoryRepository,
    LaudoResult, PatientRecord, PatientRepository, PhysicianRecord, PhysicianRepository,
};
use laudo_crypto::{FieldCodec, SealedText};
use laudo_ids::{ExamId, PatientId, TenantId, UserId};

/// Identifiers of the seeded records.
#[derive(Debug, Clone, Copy)]
pub struct DemoData {
    pub tenant_id: TenantId,
    pub physician_id: UserId,
    pub exam_id: ExamId,
}

/// Inserts one clinic, physician, patient and exam awaiting a report.
pub async fn seed(repo: &InMemoryRepository, codec: &dyn FieldCodec) -> LaudoResult<DemoData> {
    let tenant_id = TenantId::new();
    let physician_id = UserId::new();
    let patient_id = PatientId::new();
    let exam_id = ExamId::new();

    ClinicRepository::insert(
        repo,
        ClinicRecord {
            id: tenant_id,
            name: "Clínica Demonstração".into(),
            address: Some("Av. Paulista, 1000 - São Paulo/SP".into()),
            phone: Some("(11) 4000-0000".into()),
        },
    )
    .await?;
    PhysicianRepository::insert(
        repo,
        PhysicianRecord {
            id: physician_id,
            name: "Dra. Ana Souza".into(),
            crm: Some("CRM-SP 123456".into()),
        },
    )
    .await?;
    PatientRepository::insert(
        repo,
        PatientRecord {
            id: patient_id,
            tenant_id,
            name: SealedText::seal(codec, "Maria Silva")?,
            birth_date: chrono::NaiveDate::from_ymd_opt(1980, 3, 1),
            sex: Some("F".into()),
        },
    )
    .await?;
    ExamRepository::insert(
        repo,
        ExamRecord {
            id: exam_id,
            tenant_id,
            patient_id,
            physician_id,
            exam_type: "Eletrocardiograma".into(),
            exam_type_id: Some("ecg".into()),
            specialty_id: Some("cardiologia".into()),
            performed_at: Some(chrono::Utc::now()),
            requesting_physician: Some("Dr. Paulo Lima".into()),
            height_cm: Some("165".into()),
            weight_kg: Some("62.5".into()),
            heart_rate_bpm: Some("72".into()),
            pr_interval_ms: Some("160".into()),
            qrs_duration_ms: Some("90".into()),
            payment_value_cents: Some(4_500),
            status: ExamStatus::AwaitingReport,
            active_report: None,
        },
    )
    .await?;

    tracing::info!(
        tenant_id = %tenant_id,
        physician_id = %physician_id,
        exam_id = %exam_id,
        "demo data seeded"
    );
    Ok(DemoData {
        tenant_id,
        physician_id,
        exam_id,
    })
}
