use crate::cms::{OID_MESSAGE_DIGEST, OID_SIGNED_DATA};
use crate::der;
use crate::placeholder::{find_byte_range, rfind};
use crate::{SigningError, SigningResult};
use sha2::{Digest, Sha256};

/// What could be read back from a signed PDF.
#[derive(Debug, Clone)]
pub struct SignatureInspection {
    /// `[offset, length, offset, length]` as written in the document.
    pub byte_range: [usize; 4],
    /// DER CMS blob with the zero padding removed.
    pub cms: Vec<u8>,
    /// SHA-256 over the two signed ranges.
    pub computed_digest: [u8; 32],
    /// `messageDigest` signed attribute from the CMS.
    pub embedded_digest: Option<[u8; 32]>,
    /// Whether the ranges start at 0, meet the `/Contents` value and reach the end of file.
    pub covers_whole_file: bool,
}

impl SignatureInspection {
    pub fn digest_matches(&self) -> bool {
        self.embedded_digest == Some(self.computed_digest)
    }

    pub fn is_valid(&self) -> bool {
        self.covers_whole_file && self.digest_matches()
    }
}

/// Reads the last signature of `pdf` and checks that its message digest covers the byte ranges.
///
/// This does not verify the certificate chain or the signature value itself.
///
/// # Errors
///
/// - [`SigningError::NotSigned`] if no `/ByteRange` is present.
/// - [`SigningError::MalformedSignature`] if the byte range or CMS blob cannot be decoded.
pub fn inspect_signature(pdf: &[u8]) -> SigningResult<SignatureInspection> {
    let (open, close) = find_byte_range(pdf).ok_or(SigningError::NotSigned)?;
    let text = std::str::from_utf8(&pdf[open + 1..close])
        .map_err(|_| SigningError::MalformedSignature("byte range is not text".into()))?;
    let numbers = text
        .split_whitespace()
        .map(str::parse::<usize>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SigningError::MalformedSignature(format!("byte range: {e}")))?;
    let byte_range: [usize; 4] = numbers
        .try_into()
        .map_err(|_| SigningError::MalformedSignature("byte range needs four numbers".into()))?;

    let [first_start, first_len, second_start, second_len] = byte_range;
    let first_end = first_start
        .checked_add(first_len)
        .filter(|end| *end <= pdf.len());
    let second_end = second_start
        .checked_add(second_len)
        .filter(|end| *end <= pdf.len());
    let (Some(first_end), Some(second_end)) = (first_end, second_end) else {
        return Err(SigningError::MalformedSignature(
            "byte range exceeds the document".into(),
        ));
    };
    if second_start < first_end + 2 {
        return Err(SigningError::MalformedSignature(
            "byte ranges overlap".into(),
        ));
    }

    let slot = &pdf[first_end..second_start];
    if slot.first() != Some(&b'<') || slot.last() != Some(&b'>') {
        return Err(SigningError::MalformedSignature(
            "signature contents are not a hex string".into(),
        ));
    }
    let padded = hex::decode(&slot[1..slot.len() - 1])
        .map_err(|e| SigningError::MalformedSignature(format!("contents: {e}")))?;
    let (header, len) = der::read_header(&padded)
        .filter(|(header, len)| header + len <= padded.len())
        .ok_or_else(|| SigningError::MalformedSignature("contents are not DER".into()))?;
    let cms = padded[..header + len].to_vec();
    if rfind(&cms, OID_SIGNED_DATA).is_none() {
        return Err(SigningError::MalformedSignature(
            "contents are not CMS SignedData".into(),
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(&pdf[first_start..first_end]);
    hasher.update(&pdf[second_start..second_end]);
    let computed_digest: [u8; 32] = hasher.finalize().into();

    Ok(SignatureInspection {
        byte_range,
        embedded_digest: embedded_digest(&cms),
        computed_digest,
        covers_whole_file: first_start == 0 && second_end == pdf.len(),
        cms,
    })
}

/// `messageDigest` attribute value: `OID, SET { OCTET STRING (32) }`.
fn embedded_digest(cms: &[u8]) -> Option<[u8; 32]> {
    let oid = der::oid(OID_MESSAGE_DIGEST);
    let at = rfind(cms, &oid)? + oid.len();
    let value = cms.get(at..at + 4 + 32)?;
    if value[..4] != [der::TAG_SET, 34, der::TAG_OCTET_STRING, 32] {
        return None;
    }
    value[4..].try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_document_is_reported() {
        assert!(matches!(
            inspect_signature(b"%PDF-1.7\n%%EOF"),
            Err(SigningError::NotSigned)
        ));
    }

    #[test]
    fn out_of_bounds_range_is_malformed() {
        let pdf = b"%PDF /ByteRange [0 10 5000 10] /Contents <00>";
        assert!(matches!(
            inspect_signature(pdf),
            Err(SigningError::MalformedSignature(_))
        ));
    }

    #[test]
    fn digest_extraction_reads_attribute_value() {
        let digest = [7u8; 32];
        let attribute = der::sequence(&[
            &der::oid(OID_MESSAGE_DIGEST),
            &der::set_of(&[der::octet_string(&digest)]),
        ]);
        assert_eq!(embedded_digest(&attribute), Some(digest));
        assert_eq!(embedded_digest(b"nothing"), None);
    }
}
