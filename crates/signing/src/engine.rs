use crate::cms::{self, CmsInput, SignerKey};
use crate::placeholder;
use crate::{SignerMetadata, SigningError, SigningResult};
use chrono::{DateTime, Utc};
use laudo_certificates::{CertificateAnalyzer, CertificateBundle};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lower and upper bounds for the CMS slot reserved in the PDF.
pub const MIN_RESERVE_BYTES: usize = 4_096;
pub const MAX_RESERVE_BYTES: usize = 65_536;
pub const DEFAULT_RESERVE_BYTES: usize = 16_384;

/// Transformation applied to the stored password before opening the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordVariant {
    Original,
    Trimmed,
    Lowercase,
    Uppercase,
    Empty,
}

impl PasswordVariant {
    pub const ORDER: [PasswordVariant; 5] = [
        PasswordVariant::Original,
        PasswordVariant::Trimmed,
        PasswordVariant::Lowercase,
        PasswordVariant::Uppercase,
        PasswordVariant::Empty,
    ];

    pub fn apply(self, password: &str) -> String {
        match self {
            Self::Original => password.to_owned(),
            Self::Trimmed => password.trim().to_owned(),
            Self::Lowercase => password.to_lowercase(),
            Self::Uppercase => password.to_uppercase(),
            Self::Empty => String::new(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Trimmed => "trimmed",
            Self::Lowercase => "lowercase",
            Self::Uppercase => "uppercase",
            Self::Empty => "empty",
        }
    }
}

impl fmt::Display for PasswordVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate passwords in retry order, skipping variants that repeat an earlier string.
pub fn password_variants(password: &str) -> Vec<(PasswordVariant, String)> {
    let mut out: Vec<(PasswordVariant, String)> = Vec::with_capacity(PasswordVariant::ORDER.len());
    for variant in PasswordVariant::ORDER {
        let candidate = variant.apply(password);
        if out.iter().all(|(_, seen)| *seen != candidate) {
            out.push((variant, candidate));
        }
    }
    out
}

/// Result of a successful signature.
#[derive(Debug, Clone)]
pub struct SignedPdf {
    pub bytes: Vec<u8>,
    /// Password variant that opened the container.
    pub variant: PasswordVariant,
    pub signer_subject: String,
    pub signed_at: DateTime<Utc>,
}

/// Signs PDFs with PKCS#12 material.
///
/// The engine is synchronous and holds no state besides its settings; callers run it on a
/// blocking thread and apply their own timeout.
#[derive(Debug, Clone)]
pub struct SigningEngine {
    reserve_bytes: usize,
    analyzer: CertificateAnalyzer,
}

impl Default for SigningEngine {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVE_BYTES)
    }
}

impl SigningEngine {
    /// Creates an engine reserving `reserve_bytes` for the CMS blob, clamped to
    /// [`MIN_RESERVE_BYTES`]..=[`MAX_RESERVE_BYTES`].
    pub fn new(reserve_bytes: usize) -> Self {
        Self {
            reserve_bytes: reserve_bytes.clamp(MIN_RESERVE_BYTES, MAX_RESERVE_BYTES),
            analyzer: CertificateAnalyzer::new(),
        }
    }

    pub fn reserve_bytes(&self) -> usize {
        self.reserve_bytes
    }

    /// Signs `pdf` with the certificate in `pkcs12`.
    ///
    /// Password variants are tried in order (original, trimmed, lower-cased, upper-cased,
    /// empty). The first variant that opens the container and completes the signature wins;
    /// there is no further attempt after a success.
    ///
    /// # Arguments
    ///
    /// * `pdf` - Unsigned PDF bytes.
    /// * `pkcs12` - Decrypted PKCS#12 container.
    /// * `password` - Stored container password.
    /// * `metadata` - Signer name, reason and location for the signature dictionary.
    ///
    /// # Returns
    ///
    /// The signed document and the variant that worked.
    ///
    /// # Errors
    ///
    /// - [`SigningError::Pdf`] if the input PDF cannot receive a placeholder. This does not
    ///   depend on the password, so no variant is attempted.
    /// - [`SigningError::AllVariantsFailed`] if every variant failed, carrying the last cause.
    pub fn sign(
        &self,
        pdf: &[u8],
        pkcs12: &[u8],
        password: &str,
        metadata: &SignerMetadata,
    ) -> SigningResult<SignedPdf> {
        let signed_at = Utc::now();
        let prepared = placeholder::prepare(pdf, metadata, self.reserve_bytes, signed_at)?;
        let digest = {
            let mut hasher = Sha256::new();
            for range in prepared.signed_ranges() {
                hasher.update(range);
            }
            hasher.finalize()
        };

        let variants = password_variants(password);
        let attempts = variants.len();
        let mut last_error = String::new();

        for (variant, candidate) in variants {
            let bundle = match self.analyzer.open(pkcs12, &candidate) {
                Ok(bundle) => bundle,
                Err(e) => {
                    tracing::debug!(variant = %variant, error = %e, "password variant rejected");
                    last_error = e.to_string();
                    continue;
                }
            };

            match sign_with(&bundle, &digest, signed_at) {
                Ok(cms) => {
                    let bytes = prepared.inject(&cms)?;
                    tracing::info!(
                        variant = %variant,
                        signer = %bundle.info.subject,
                        size = bytes.len(),
                        "PDF signed"
                    );
                    return Ok(SignedPdf {
                        bytes,
                        variant,
                        signer_subject: bundle.info.subject.clone(),
                        signed_at,
                    });
                }
                Err(e) => {
                    tracing::warn!(variant = %variant, error = %e, "signature failed with opened container");
                    last_error = e.to_string();
                }
            }
        }

        Err(SigningError::AllVariantsFailed {
            attempts,
            last: last_error,
        })
    }
}

fn sign_with(
    bundle: &CertificateBundle,
    digest: &[u8],
    signed_at: DateTime<Utc>,
) -> SigningResult<Vec<u8>> {
    let key = SignerKey::from_pkcs8_der(&bundle.private_key_der)?;
    cms::signed_data(&CmsInput {
        certificate_der: &bundle.certificate_der,
        chain: &bundle.chain,
        key: &key,
        content_digest: digest,
        signing_time: signed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect_signature;
    use chrono::NaiveDate;
    use laudo_certificates::DevCertificate;
    use laudo_render::{
        ClinicHeader, ExamSection, PatientSection, PhysicianSection, ReportDocument,
        ReportRenderer,
    };

    fn rendered_pdf() -> Vec<u8> {
        let doc = ReportDocument {
            clinic: ClinicHeader {
                name: "Clínica Coração".into(),
                address: None,
                phone: None,
            },
            patient: PatientSection {
                name: "Maria Silva".into(),
                birth_date: NaiveDate::from_ymd_opt(1980, 3, 1),
                sex: Some("F".into()),
            },
            exam: ExamSection {
                exam_type: "Eletrocardiograma".into(),
                ..ExamSection::default()
            },
            physician: PhysicianSection {
                name: "Dra. Ana Souza".into(),
                crm: Some("CRM-SP 123456".into()),
            },
            conclusion: "Ritmo sinusal normal.".into(),
            public_url: Some("https://laudos.example.com/publico/laudos/1".into()),
            digitally_signed: true,
            signed_at: Some(Utc::now()),
            verification_code: "ABCD****WXYZ".into(),
            generated_at: Utc::now(),
        };
        ReportRenderer::new().render(&doc).unwrap()
    }

    fn metadata() -> SignerMetadata {
        SignerMetadata {
            name: "Dra. Ana Souza".into(),
            reason: "Assinatura de laudo médico".into(),
            location: "São Paulo".into(),
            contact_info: None,
        }
    }

    fn container(password: &str) -> Vec<u8> {
        DevCertificate::valid_for_days("Dra. Ana Souza", "CRM-SP 123456", 365)
            .to_pkcs12(password)
            .unwrap()
    }

    #[test]
    fn variants_are_ordered_and_deduplicated() {
        let variants: Vec<_> = password_variants(" Senha ")
            .into_iter()
            .map(|(v, _)| v)
            .collect();
        assert_eq!(variants, PasswordVariant::ORDER.to_vec());

        assert_eq!(
            password_variants("abc"),
            vec![
                (PasswordVariant::Original, "abc".to_owned()),
                (PasswordVariant::Uppercase, "ABC".to_owned()),
                (PasswordVariant::Empty, String::new()),
            ]
        );
    }

    #[test]
    fn reserve_is_clamped() {
        assert_eq!(SigningEngine::new(1).reserve_bytes(), MIN_RESERVE_BYTES);
        assert_eq!(SigningEngine::new(usize::MAX).reserve_bytes(), MAX_RESERVE_BYTES);
    }

    #[test]
    fn signs_with_exact_password() {
        let pdf = rendered_pdf();
        let signed = SigningEngine::default()
            .sign(&pdf, &container("s3nha"), "s3nha", &metadata())
            .unwrap();

        assert_eq!(signed.variant, PasswordVariant::Original);
        assert_eq!(signed.signer_subject, "Dra. Ana Souza");
        assert!(signed.bytes.starts_with(b"%PDF"));

        let inspection = inspect_signature(&signed.bytes).unwrap();
        assert!(inspection.covers_whole_file);
        assert!(inspection.digest_matches());
        assert!(inspection.is_valid());
    }

    #[test]
    fn stored_password_with_whitespace_uses_trimmed_variant() {
        let pdf = rendered_pdf();
        let signed = SigningEngine::default()
            .sign(&pdf, &container("s3nha"), "  s3nha\n", &metadata())
            .unwrap();
        assert_eq!(signed.variant, PasswordVariant::Trimmed);
        assert!(inspect_signature(&signed.bytes).unwrap().is_valid());
    }

    #[test]
    fn lower_cased_variant_is_tried() {
        let pdf = rendered_pdf();
        let signed = SigningEngine::default()
            .sign(&pdf, &container("senha"), "SENHA", &metadata())
            .unwrap();
        assert_eq!(signed.variant, PasswordVariant::Lowercase);
    }

    #[test]
    fn wrong_password_fails_all_variants() {
        let pdf = rendered_pdf();
        let err = SigningEngine::default()
            .sign(&pdf, &container("s3nha"), "outra", &metadata())
            .unwrap_err();
        match err {
            SigningError::AllVariantsFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn invalid_pdf_fails_before_password_attempts() {
        let err = SigningEngine::default()
            .sign(b"not a pdf", &container("s3nha"), "s3nha", &metadata())
            .unwrap_err();
        assert!(matches!(err, SigningError::Pdf(_)));
    }

    #[test]
    fn tampering_breaks_the_digest() {
        let pdf = rendered_pdf();
        let mut signed = SigningEngine::default()
            .sign(&pdf, &container("s3nha"), "s3nha", &metadata())
            .unwrap()
            .bytes;
        // Flip a byte inside the first signed range, past the header.
        signed[20] ^= 0x01;
        let inspection = inspect_signature(&signed).unwrap();
        assert!(!inspection.digest_matches());
    }
}
