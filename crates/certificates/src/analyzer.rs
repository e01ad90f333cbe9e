use crate::{CertificateError, CertificateResult};
use chrono::{DateTime, Utc};
use laudo_types::Sha256Hex;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;
use zeroize::Zeroizing;

/// Descriptive metadata of a certificate's leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    /// Serial number as uppercase hex.
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// SHA-256 over the DER encoded leaf certificate.
    pub fingerprint: Sha256Hex,
    pub signature_algorithm: String,
    /// Public key size in bits, when the key type is recognised.
    pub key_size: Option<u32>,
}

impl CertificateInfo {
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.not_after < at
    }
}

/// Decrypted contents of a PKCS#12 container.
pub struct CertificateBundle {
    pub info: CertificateInfo,
    /// DER encoded leaf certificate.
    pub certificate_der: Vec<u8>,
    /// PKCS#8 DER private key of the leaf.
    pub private_key_der: Zeroizing<Vec<u8>>,
    /// Remaining certificates in the container (issuer chain).
    pub chain: Vec<Vec<u8>>,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("info", &self.info)
            .field("chain", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Opens PKCS#12 containers.
///
/// The analyzer only describes what it finds. Expiry and uniqueness rules belong to
/// [`crate::CertificateStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateAnalyzer;

impl CertificateAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Parses `pkcs12` with `password` and describes the leaf certificate.
    ///
    /// # Errors
    ///
    /// - [`CertificateError::InvalidCertificate`] if the bytes are not a PKCS#12 container or the
    ///   leaf cannot be parsed as X.509.
    /// - [`CertificateError::WrongPassword`] if the integrity check fails.
    /// - [`CertificateError::MissingCertificate`] / [`CertificateError::MissingKey`] if the
    ///   container lacks either part.
    pub fn analyze(&self, pkcs12: &[u8], password: &str) -> CertificateResult<CertificateInfo> {
        self.open(pkcs12, password).map(|bundle| bundle.info)
    }

    /// Parses `pkcs12` and returns the leaf certificate together with its private key.
    ///
    /// The leaf is the first certificate that is not a CA; containers holding only CA
    /// certificates fall back to the first one.
    pub fn open(&self, pkcs12: &[u8], password: &str) -> CertificateResult<CertificateBundle> {
        let pfx = p12::PFX::parse(pkcs12)
            .map_err(|e| CertificateError::InvalidCertificate(format!("PKCS#12: {e:?}")))?;

        if !pfx.verify_mac(password) {
            return Err(CertificateError::WrongPassword);
        }

        let certificates = pfx
            .cert_x509_bags(password)
            .map_err(|_| CertificateError::WrongPassword)?;
        let mut keys = pfx
            .key_bags(password)
            .map_err(|_| CertificateError::WrongPassword)?;

        if certificates.is_empty() {
            return Err(CertificateError::MissingCertificate);
        }
        if keys.is_empty() {
            return Err(CertificateError::MissingKey);
        }

        let leaf_index = leaf_index(&certificates)?;
        let mut chain = certificates;
        let certificate_der = chain.remove(leaf_index);
        let info = describe(&certificate_der)?;

        Ok(CertificateBundle {
            info,
            certificate_der,
            private_key_der: Zeroizing::new(keys.swap_remove(0)),
            chain,
        })
    }
}

fn leaf_index(certificates: &[Vec<u8>]) -> CertificateResult<usize> {
    for (index, der) in certificates.iter().enumerate() {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CertificateError::InvalidCertificate(e.to_string()))?;
        if !cert.is_ca() {
            return Ok(index);
        }
    }
    Ok(0)
}

/// Builds [`CertificateInfo`] from a DER certificate.
fn describe(der: &[u8]) -> CertificateResult<CertificateInfo> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| CertificateError::InvalidCertificate(e.to_string()))?;

    let key_size = match cert.public_key().parsed() {
        Ok(PublicKey::RSA(rsa)) => Some(rsa.key_size() as u32),
        Ok(PublicKey::EC(point)) => Some(point.key_size() as u32),
        _ => None,
    };

    Ok(CertificateInfo {
        subject: common_name(cert.subject()),
        issuer: common_name(cert.issuer()),
        serial_number: hex::encode_upper(cert.tbs_certificate.raw_serial()),
        not_before: to_utc(cert.validity().not_before.timestamp())?,
        not_after: to_utc(cert.validity().not_after.timestamp())?,
        fingerprint: Sha256Hex::digest(der),
        signature_algorithm: algorithm_name(&cert.signature_algorithm.algorithm.to_id_string()),
        key_size,
    })
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| name.to_string())
}

fn to_utc(timestamp: i64) -> CertificateResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).ok_or_else(|| {
        CertificateError::InvalidCertificate(format!("validity out of range: {timestamp}"))
    })
}

fn algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.5" => "sha1WithRSAEncryption",
        "1.2.840.113549.1.1.11" => "sha256WithRSAEncryption",
        "1.2.840.113549.1.1.12" => "sha384WithRSAEncryption",
        "1.2.840.113549.1.1.13" => "sha512WithRSAEncryption",
        "1.2.840.10045.4.3.2" => "ecdsa-with-SHA256",
        "1.2.840.10045.4.3.3" => "ecdsa-with-SHA384",
        other => other,
    }
    .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DevCertificate;

    #[test]
    fn analyze_extracts_metadata() {
        let der = DevCertificate::valid_for_days("Dra. Ana Souza", "CRM-SP 123456", 365)
            .to_pkcs12("senha")
            .unwrap();

        let info = CertificateAnalyzer::new().analyze(&der, "senha").unwrap();

        assert_eq!(info.subject, "Dra. Ana Souza");
        assert_eq!(info.issuer, "Dra. Ana Souza");
        assert_eq!(info.signature_algorithm, "ecdsa-with-SHA256");
        assert!(info.key_size.is_some());
        assert!(!info.serial_number.is_empty());
        assert!(info.not_before < info.not_after);
        assert!(!info.is_expired_at(Utc::now()));
    }

    #[test]
    fn fingerprint_is_over_leaf_der() {
        let der = DevCertificate::valid_for_days("Dr. Paulo", "CRM-SP 1", 10)
            .to_pkcs12("x")
            .unwrap();
        let bundle = CertificateAnalyzer::new().open(&der, "x").unwrap();

        assert_eq!(
            bundle.info.fingerprint,
            Sha256Hex::digest(&bundle.certificate_der)
        );
        assert!(bundle.chain.is_empty());
        assert!(!bundle.private_key_der.is_empty());
    }

    #[test]
    fn wrong_password_is_distinct() {
        let der = DevCertificate::valid_for_days("Dr. Paulo", "CRM-SP 1", 10)
            .to_pkcs12("certa")
            .unwrap();
        let result = CertificateAnalyzer::new().analyze(&der, "errada");
        assert!(matches!(result, Err(CertificateError::WrongPassword)));
    }

    #[test]
    fn garbage_is_invalid_certificate() {
        let result = CertificateAnalyzer::new().analyze(b"not a pkcs12 file", "x");
        assert!(matches!(result, Err(CertificateError::InvalidCertificate(_))));
    }

    #[test]
    fn analyzer_reports_expired_certificates_without_rejecting() {
        let der = DevCertificate::expired("Dr. Velho", "CRM-MG 9")
            .to_pkcs12("x")
            .unwrap();
        let info = CertificateAnalyzer::new().analyze(&der, "x").unwrap();
        assert!(info.is_expired_at(Utc::now()));
    }
}
