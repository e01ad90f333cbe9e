use crate::{CertificateError, CertificateResult};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, Ia5String, IsCa, KeyPair, KeyUsagePurpose,
    SanType, SerialNumber,
};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

/// Parameters for a self-signed physician certificate.
///
/// Production certificates come from an ICP-Brasil authority. This type exists so that
/// development environments and tests can produce PKCS#12 files with the same shape: a leaf
/// certificate carrying the physician's name and CRM plus a P-256 signing key.
#[derive(Debug, Clone)]
pub struct DevCertificate {
    /// Full name of the physician (Common Name of the subject).
    pub name: String,
    /// CRM registration, e.g. `CRM-SP 123456`.
    pub registration: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl DevCertificate {
    /// Certificate valid from now for `days` days.
    pub fn valid_for_days(name: &str, registration: &str, days: i64) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            name: name.to_owned(),
            registration: registration.to_owned(),
            not_before: now - Duration::minutes(5),
            not_after: now + Duration::days(days),
        }
    }

    /// Certificate whose validity window ended yesterday.
    pub fn expired(name: &str, registration: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            name: name.to_owned(),
            registration: registration.to_owned(),
            not_before: now - Duration::days(400),
            not_after: now - Duration::days(1),
        }
    }

    /// Generates a key pair and self-signed certificate.
    ///
    /// # Returns
    ///
    /// A tuple of (certificate DER, PKCS#8 private key DER).
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Generation`] if key or certificate generation fails.
    pub fn generate(&self) -> CertificateResult<(Vec<u8>, Vec<u8>)> {
        let mut params = CertificateParams::default();

        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, self.name.as_str());
        subject.push(DnType::OrganizationName, "Laudo Development CA");
        params.distinguished_name = subject;
        params.is_ca = IsCa::NoCa;

        let uri = format!("laudo://crm/{}", self.registration.replace(' ', "-"));
        let uri = Ia5String::try_from(uri)
            .map_err(|e| CertificateError::Generation(format!("registration URI: {e}")))?;
        params.subject_alt_names.push(SanType::URI(uri));

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::ContentCommitment,
        ];
        params.not_before = self.not_before;
        params.not_after = self.not_after;

        let key_pair =
            KeyPair::generate().map_err(|e| CertificateError::Generation(e.to_string()))?;

        // Serial derived from the public key keeps issued certificates distinct.
        let serial = Sha256::digest(key_pair.public_key_raw());
        params.serial_number = Some(SerialNumber::from(serial[..8].to_vec()));

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CertificateError::Generation(e.to_string()))?;

        Ok((cert.der().to_vec(), key_pair.serialize_der()))
    }

    /// Generates a certificate and packs it into a password-protected PKCS#12 container.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Generation`] if generation or packing fails.
    pub fn to_pkcs12(&self, password: &str) -> CertificateResult<Vec<u8>> {
        let (cert_der, key_der) = self.generate()?;
        let pfx = p12::PFX::new(&cert_der, &key_der, None, password, &self.name)
            .ok_or_else(|| CertificateError::Generation("PKCS#12 packing failed".into()))?;
        Ok(pfx.to_der())
    }
}
