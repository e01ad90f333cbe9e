//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into services. Nothing in the
//! core reads environment variables during request handling.

use crate::{LaudoError, LaudoResult};
use laudo_ids::ReportId;
use laudo_signing::{MAX_RESERVE_BYTES, MIN_RESERVE_BYTES};
use std::time::Duration;

/// Raw settings, as read by the binary.
#[derive(Clone, Debug)]
pub struct CoreSettings {
    /// Base URL of the public site, used for verification links and QR codes.
    pub public_base_url: String,
    /// Lifetime of signed artifact URLs.
    pub access_url_ttl: Duration,
    /// Bound for each object store call.
    pub storage_timeout: Duration,
    /// Bound for one signing attempt (all password variants).
    pub signing_timeout: Duration,
    /// Written as `/Location` in the signature dictionary.
    pub signature_location: String,
    pub signature_reserve_bytes: usize,
    /// Include internal error detail in HTTP responses (development only).
    pub expose_error_detail: bool,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:3000".into(),
            access_url_ttl: Duration::from_secs(15 * 60),
            storage_timeout: Duration::from_secs(15),
            signing_timeout: Duration::from_secs(15),
            signature_location: "Brasil".into(),
            signature_reserve_bytes: laudo_signing::DEFAULT_RESERVE_BYTES,
            expose_error_detail: false,
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    public_base_url: String,
    access_url_ttl: Duration,
    storage_timeout: Duration,
    signing_timeout: Duration,
    signature_location: String,
    signature_reserve_bytes: usize,
    expose_error_detail: bool,
}

impl CoreConfig {
    /// Validates `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`LaudoError::Validation`] if the base URL is not HTTP(S), a duration is zero, the
    /// signature location is blank, or the reserve size is outside the supported range.
    pub fn new(settings: CoreSettings) -> LaudoResult<Self> {
        let base = settings.public_base_url.trim().trim_end_matches('/');
        let scheme_ok = base.starts_with("https://") || base.starts_with("http://");
        let host_ok = base.split_once("://").is_some_and(|(_, rest)| !rest.is_empty());
        if !scheme_ok || !host_ok {
            return Err(LaudoError::Validation(
                "public_base_url must be an http(s) URL".into(),
            ));
        }

        for (name, value) in [
            ("access_url_ttl", settings.access_url_ttl),
            ("storage_timeout", settings.storage_timeout),
            ("signing_timeout", settings.signing_timeout),
        ] {
            if value.is_zero() {
                return Err(LaudoError::Validation(format!("{name} cannot be zero")));
            }
        }

        if settings.signature_location.trim().is_empty() {
            return Err(LaudoError::Validation(
                "signature_location cannot be empty".into(),
            ));
        }

        if !(MIN_RESERVE_BYTES..=MAX_RESERVE_BYTES).contains(&settings.signature_reserve_bytes) {
            return Err(LaudoError::Validation(format!(
                "signature_reserve_bytes must be between {MIN_RESERVE_BYTES} and {MAX_RESERVE_BYTES}"
            )));
        }

        Ok(Self {
            public_base_url: base.to_owned(),
            access_url_ttl: settings.access_url_ttl,
            storage_timeout: settings.storage_timeout,
            signing_timeout: settings.signing_timeout,
            signature_location: settings.signature_location.trim().to_owned(),
            signature_reserve_bytes: settings.signature_reserve_bytes,
            expose_error_detail: settings.expose_error_detail,
        })
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    /// Public verification page of a report.
    pub fn public_report_url(&self, report_id: ReportId) -> String {
        format!("{}/publico/laudos/{}", self.public_base_url, report_id)
    }

    pub fn access_url_ttl(&self) -> Duration {
        self.access_url_ttl
    }

    pub fn storage_timeout(&self) -> Duration {
        self.storage_timeout
    }

    pub fn signing_timeout(&self) -> Duration {
        self.signing_timeout
    }

    pub fn signature_location(&self) -> &str {
        &self.signature_location
    }

    pub fn signature_reserve_bytes(&self) -> usize {
        self.signature_reserve_bytes
    }

    pub fn expose_error_detail(&self) -> bool {
        self.expose_error_detail
    }
}
