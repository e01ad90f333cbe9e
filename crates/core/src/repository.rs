//! Persistence collaborators.
//!
//! The core only depends on these traits. [`InMemoryRepository`] implements all of them for
//! tests and for running the service without a database.

use crate::model::{
    ClinicRecord, ExamRecord, ExamStatus, PatientRecord, PhysicianRecord, ReportRecord,
};
use crate::{LaudoError, LaudoResult};
use async_trait::async_trait;
use laudo_ids::{ExamId, PatientId, ReportId, TenantId, UserId};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn insert(&self, record: ReportRecord) -> LaudoResult<()>;

    async fn update(&self, record: ReportRecord) -> LaudoResult<()>;

    async fn get(&self, id: ReportId) -> LaudoResult<Option<ReportRecord>>;

    /// Every version ever created for `exam_id`, oldest first.
    async fn list_for_exam(&self, exam_id: ExamId) -> LaudoResult<Vec<ReportRecord>>;
}

#[async_trait]
pub trait ExamRepository: Send + Sync {
    async fn insert(&self, record: ExamRecord) -> LaudoResult<()>;

    async fn get(&self, id: ExamId) -> LaudoResult<Option<ExamRecord>>;

    /// Atomically replaces the exam's active report link.
    ///
    /// The link is only written if it currently equals `expected`.
    ///
    /// # Returns
    ///
    /// `false` if the link had changed (another request claimed the exam first).
    ///
    /// # Errors
    ///
    /// Returns [`LaudoError::NotFound`] if the exam does not exist.
    async fn claim_active_report(
        &self,
        exam_id: ExamId,
        expected: Option<ReportId>,
        new: Option<ReportId>,
    ) -> LaudoResult<bool>;

    async fn set_status(&self, exam_id: ExamId, status: ExamStatus) -> LaudoResult<()>;
}

#[async_trait]
pub trait PatientRepository: Send + Sync {
    async fn insert(&self, record: PatientRecord) -> LaudoResult<()>;

    async fn get(&self, id: PatientId) -> LaudoResult<Option<PatientRecord>>;
}

#[async_trait]
pub trait PhysicianRepository: Send + Sync {
    async fn insert(&self, record: PhysicianRecord) -> LaudoResult<()>;

    async fn get(&self, id: UserId) -> LaudoResult<Option<PhysicianRecord>>;
}

#[async_trait]
pub trait ClinicRepository: Send + Sync {
    async fn insert(&self, record: ClinicRecord) -> LaudoResult<()>;

    async fn get(&self, id: TenantId) -> LaudoResult<Option<ClinicRecord>>;
}

/// In-process implementation of every repository trait.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    reports: RwLock<HashMap<ReportId, ReportRecord>>,
    exams: RwLock<HashMap<ExamId, ExamRecord>>,
    patients: RwLock<HashMap<PatientId, PatientRecord>>,
    physicians: RwLock<HashMap<UserId, PhysicianRecord>>,
    clinics: RwLock<HashMap<TenantId, ClinicRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn duplicate(what: &str, id: impl std::fmt::Display) -> LaudoError {
    LaudoError::Repository(format!("{what} {id} already exists"))
}

#[async_trait]
impl ReportRepository for InMemoryRepository {
    async fn insert(&self, record: ReportRecord) -> LaudoResult<()> {
        let mut reports = self.reports.write().await;
        if reports.contains_key(&record.id) {
            return Err(duplicate("report", record.id));
        }
        reports.insert(record.id, record);
        Ok(())
    }

    async fn update(&self, record: ReportRecord) -> LaudoResult<()> {
        let mut reports = self.reports.write().await;
        match reports.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(LaudoError::NotFound(format!("report {}", record.id))),
        }
    }

    async fn get(&self, id: ReportId) -> LaudoResult<Option<ReportRecord>> {
        Ok(self.reports.read().await.get(&id).cloned())
    }

    async fn list_for_exam(&self, exam_id: ExamId) -> LaudoResult<Vec<ReportRecord>> {
        let reports = self.reports.read().await;
        let mut found: Vec<_> = reports
            .values()
            .filter(|r| r.exam_id == exam_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.version, r.created_at));
        Ok(found)
    }
}

#[async_trait]
impl ExamRepository for InMemoryRepository {
    async fn insert(&self, record: ExamRecord) -> LaudoResult<()> {
        let mut exams = self.exams.write().await;
        if exams.contains_key(&record.id) {
            return Err(duplicate("exam", record.id));
        }
        exams.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: ExamId) -> LaudoResult<Option<ExamRecord>> {
        Ok(self.exams.read().await.get(&id).cloned())
    }

    async fn claim_active_report(
        &self,
        exam_id: ExamId,
        expected: Option<ReportId>,
        new: Option<ReportId>,
    ) -> LaudoResult<bool> {
        let mut exams = self.exams.write().await;
        let exam = exams
            .get_mut(&exam_id)
            .ok_or_else(|| LaudoError::NotFound(format!("exam {exam_id}")))?;
        if exam.active_report != expected {
            return Ok(false);
        }
        exam.active_report = new;
        Ok(true)
    }

    async fn set_status(&self, exam_id: ExamId, status: ExamStatus) -> LaudoResult<()> {
        let mut exams = self.exams.write().await;
        let exam = exams
            .get_mut(&exam_id)
            .ok_or_else(|| LaudoError::NotFound(format!("exam {exam_id}")))?;
        exam.status = status;
        Ok(())
    }
}

#[async_trait]
impl PatientRepository for InMemoryRepository {
    async fn insert(&self, record: PatientRecord) -> LaudoResult<()> {
        let mut patients = self.patients.write().await;
        if patients.contains_key(&record.id) {
            return Err(duplicate("patient", record.id));
        }
        patients.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: PatientId) -> LaudoResult<Option<PatientRecord>> {
        Ok(self.patients.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl PhysicianRepository for InMemoryRepository {
    async fn insert(&self, record: PhysicianRecord) -> LaudoResult<()> {
        self.physicians.write().await.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: UserId) -> LaudoResult<Option<PhysicianRecord>> {
        Ok(self.physicians.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl ClinicRepository for InMemoryRepository {
    async fn insert(&self, record: ClinicRecord) -> LaudoResult<()> {
        self.clinics.write().await.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: TenantId) -> LaudoResult<Option<ClinicRecord>> {
        Ok(self.clinics.read().await.get(&id).cloned())
    }
}
