//! # Laudo Core
//!
//! Report lifecycle for the laudo backend.
//!
//! This crate ties the leaf crates together:
//! - domain records and their encrypted persisted form ([`model`]),
//! - the report status transition table ([`state`]),
//! - persistence and audit collaborators ([`repository`], [`audit`]),
//! - [`ReportService`], which creates, signs, uploads, redoes and invalidates reports.
//!
//! **No API concerns**: HTTP routing and authentication belong in `api-rest`.

pub mod audit;
pub mod config;
pub mod error;
pub mod model;
pub mod repository;
pub mod service;
pub mod state;

pub use audit::{AuditRecord, AuditSink, TracingAuditSink};
pub use config::{CoreConfig, CoreSettings};
pub use error::{ErrorKind, LaudoError, LaudoResult};
pub use model::{
    Actor, ClinicRecord, ExamRecord, ExamStatus, HistoryAction, HistoryEntry, PatientRecord,
    PhysicianRecord, Report, ReportRecord, ReportStatus, RequestMeta, SigningMethod,
};
pub use repository::{
    ClinicRepository, ExamRepository, InMemoryRepository, PatientRepository,
    PhysicianRepository, ReportRepository,
};
pub use service::{
    CreatedReport, DocumentDownload, PublicReportView, RedoneReport, ReportService,
    ReportServiceParts, SignMode, SignedReport,
};
pub use state::{ReportEvent, ReportStateMachine};
