//! Wiring of the report service for the server binaries.

use crate::AppState;
use laudo_certificates::{CertificateStore, InMemoryCertificateRepository};
use laudo_core::{
    CoreConfig, CoreSettings, InMemoryRepository, LaudoResult, ReportService, ReportServiceParts,
    TracingAuditSink,
};
use laudo_crypto::FieldCodec;
use laudo_storage::{HmacUrlSigner, LegacyStore, StorageReconciler, UrlSigner};
use object_store::ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything needed to run the service, resolved by the binary at startup.
pub struct Backend {
    pub settings: CoreSettings,
    pub codec: Arc<dyn FieldCodec>,
    pub primary: Arc<dyn ObjectStore>,
    pub legacy: Option<LegacyStore>,
    pub url_signer: Arc<dyn UrlSigner>,
    /// Set when the primary store is served through `/arquivos`.
    pub link_verifier: Option<Arc<HmacUrlSigner>>,
    pub certificate_dir: PathBuf,
}

impl Backend {
    /// Builds the application state over in-memory repositories.
    ///
    /// The repository is returned so callers can seed it.
    ///
    /// # Errors
    ///
    /// Returns [`laudo_core::LaudoError::Validation`] if the settings are rejected.
    pub fn in_memory(self) -> LaudoResult<(AppState, Arc<InMemoryRepository>)> {
        let cfg = Arc::new(CoreConfig::new(self.settings)?);
        let repo = Arc::new(InMemoryRepository::new());

        let storage = StorageReconciler::new(
            self.primary,
            self.legacy,
            self.url_signer,
            cfg.storage_timeout(),
            cfg.access_url_ttl(),
        );
        let certificates = CertificateStore::new(
            Arc::new(InMemoryCertificateRepository::new()),
            self.codec.clone(),
            self.certificate_dir,
        );

        let service = ReportService::new(
            cfg,
            ReportServiceParts {
                reports: repo.clone(),
                exams: repo.clone(),
                patients: repo.clone(),
                physicians: repo.clone(),
                clinics: repo.clone(),
                codec: self.codec,
                certificates,
                storage,
                audit: Arc::new(TracingAuditSink),
            },
        );

        Ok((
            AppState {
                service,
                link_verifier: self.link_verifier,
            },
            repo,
        ))
    }
}
