//! Detached CMS `SignedData` (PKCS#7) for PDF signatures.
//!
//! The structure follows RFC 5652 with the signed attributes PAdES expects: content type,
//! signing time, message digest and an ESS `signingCertificateV2` binding the signer
//! certificate to the signature.

use crate::der;
use crate::{SigningError, SigningResult};
use chrono::{DateTime, Utc};
use rsa::signature::{SignatureEncoding, Signer};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

pub(crate) const OID_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01];
pub(crate) const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];
pub(crate) const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
pub(crate) const OID_CONTENT_TYPE: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x03];
pub(crate) const OID_MESSAGE_DIGEST: &[u8] =
    &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x04];
pub(crate) const OID_SIGNING_TIME: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x05];
pub(crate) const OID_SIGNING_CERTIFICATE_V2: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x02, 0x2F,
];
const OID_SHA256_WITH_RSA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0B];
const OID_ECDSA_WITH_SHA256: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02];

/// Private key usable for CMS signatures.
pub(crate) enum SignerKey {
    Rsa(rsa::pkcs1v15::SigningKey<Sha256>),
    P256(p256::ecdsa::SigningKey),
}

impl SignerKey {
    /// Decodes a PKCS#8 private key, trying RSA first and then P-256.
    pub fn from_pkcs8_der(der: &[u8]) -> SigningResult<Self> {
        if let Ok(key) = <rsa::RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_der(der)
        {
            return Ok(Self::Rsa(rsa::pkcs1v15::SigningKey::<Sha256>::new(key)));
        }
        <p256::ecdsa::SigningKey as p256::pkcs8::DecodePrivateKey>::from_pkcs8_der(der)
            .map(Self::P256)
            .map_err(|_| {
                SigningError::UnsupportedKey("expected an RSA or P-256 PKCS#8 key".into())
            })
    }

    fn algorithm(&self) -> Vec<u8> {
        match self {
            Self::Rsa(_) => der::algorithm(OID_SHA256_WITH_RSA, true),
            Self::P256(_) => der::algorithm(OID_ECDSA_WITH_SHA256, false),
        }
    }

    fn sign(&self, message: &[u8]) -> SigningResult<Vec<u8>> {
        match self {
            Self::Rsa(key) => {
                let signature: rsa::pkcs1v15::Signature = key
                    .try_sign(message)
                    .map_err(|e| SigningError::Crypto(e.to_string()))?;
                Ok(signature.to_vec())
            }
            Self::P256(key) => {
                let signature: p256::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|e| SigningError::Crypto(e.to_string()))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }
}

/// Inputs for one signature.
pub(crate) struct CmsInput<'a> {
    pub certificate_der: &'a [u8],
    pub chain: &'a [Vec<u8>],
    pub key: &'a SignerKey,
    /// SHA-256 over the PDF byte ranges.
    pub content_digest: &'a [u8],
    pub signing_time: DateTime<Utc>,
}

/// Builds the DER `ContentInfo` wrapping a detached `SignedData`.
///
/// # Errors
///
/// Returns [`SigningError::Certificate`] if the signer certificate cannot be parsed, or
/// [`SigningError::Crypto`] if the key refuses to sign.
pub(crate) fn signed_data(input: &CmsInput<'_>) -> SigningResult<Vec<u8>> {
    let (_, cert) = X509Certificate::from_der(input.certificate_der)
        .map_err(|e| SigningError::Certificate(e.to_string()))?;
    let issuer = cert.tbs_certificate.issuer.as_raw();
    let serial = der::tlv(der::TAG_INTEGER, cert.tbs_certificate.raw_serial());

    let attributes = vec![
        attribute(OID_CONTENT_TYPE, &der::oid(OID_DATA)),
        attribute(
            OID_SIGNING_TIME,
            &der::utc_time(&input.signing_time.format("%y%m%d%H%M%SZ").to_string()),
        ),
        attribute(OID_MESSAGE_DIGEST, &der::octet_string(input.content_digest)),
        attribute(
            OID_SIGNING_CERTIFICATE_V2,
            &signing_certificate_v2(input.certificate_der, issuer, &serial),
        ),
    ];

    // The signature covers the attributes encoded as a SET; the SignerInfo carries the same
    // bytes under the implicit [0] tag.
    let signed_attributes = der::set_of(&attributes);
    let signature = input.key.sign(&signed_attributes)?;
    let mut implicit_attributes = signed_attributes;
    implicit_attributes[0] = 0xA0;

    let sha256 = der::algorithm(OID_SHA256, false);
    let signer_info = der::sequence(&[
        &der::small_integer(1),
        &der::sequence(&[issuer, &serial]),
        &sha256,
        &implicit_attributes,
        &input.key.algorithm(),
        &der::octet_string(&signature),
    ]);

    let mut certificates = input.certificate_der.to_vec();
    for extra in input.chain {
        certificates.extend_from_slice(extra);
    }

    let signed_data = der::sequence(&[
        &der::small_integer(1),
        &der::set_of(&[sha256.clone()]),
        &der::sequence(&[&der::oid(OID_DATA)]),
        &der::context(0, &certificates),
        &der::set_of(&[signer_info]),
    ]);

    Ok(der::sequence(&[
        &der::oid(OID_SIGNED_DATA),
        &der::context(0, &signed_data),
    ]))
}

fn attribute(oid: &[u8], value: &[u8]) -> Vec<u8> {
    der::sequence(&[&der::oid(oid), &der::set_of(&[value.to_vec()])])
}

/// `SigningCertificateV2` with a single `ESSCertIDv2` (SHA-256 is the default hash and
/// therefore omitted).
fn signing_certificate_v2(certificate_der: &[u8], issuer: &[u8], serial: &[u8]) -> Vec<u8> {
    let hash = Sha256::digest(certificate_der);
    let directory_name = der::context(4, issuer);
    let issuer_serial = der::sequence(&[&der::sequence(&[&directory_name]), serial]);
    let cert_id = der::sequence(&[&der::octet_string(&hash), &issuer_serial]);
    der::sequence(&[&der::sequence(&[&cert_id])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use laudo_certificates::DevCertificate;

    fn fixture() -> (Vec<u8>, SignerKey) {
        let (cert, key) = DevCertificate::valid_for_days("Dra. Ana", "CRM-SP 1", 30)
            .generate()
            .unwrap();
        (cert, SignerKey::from_pkcs8_der(&key).unwrap())
    }

    #[test]
    fn rejects_garbage_key() {
        assert!(matches!(
            SignerKey::from_pkcs8_der(b"not a key"),
            Err(SigningError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn signed_data_embeds_digest_and_certificate() {
        let (cert, key) = fixture();
        let digest = Sha256::digest(b"pdf ranges");
        let cms = signed_data(&CmsInput {
            certificate_der: &cert,
            chain: &[],
            key: &key,
            content_digest: &digest,
            signing_time: Utc::now(),
        })
        .unwrap();

        assert_eq!(cms[0], der::TAG_SEQUENCE);
        let (header, len) = der::read_header(&cms).unwrap();
        assert_eq!(header + len, cms.len());

        let contains = |needle: &[u8]| cms.windows(needle.len()).any(|w| w == needle);
        assert!(contains(&digest));
        assert!(contains(&cert));
        assert!(contains(OID_SIGNED_DATA));
        assert!(contains(OID_ECDSA_WITH_SHA256));
    }
}
