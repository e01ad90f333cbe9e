//! Signature placeholder insertion.
//!
//! The whole PDF is re-serialized through `Document::save_to`; no incremental revision is
//! appended, so any earlier signatures in the input are not preserved. The output carries a
//! `/Sig` dictionary whose `/Contents` is a zero-filled hex string of
//! the reserved size and whose `/ByteRange` holds wide dummy numbers. After serialization the
//! real byte range is patched in place, so offsets never move between hashing and injection.

use crate::{SignerMetadata, SigningError, SigningResult};
use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};

const BYTE_RANGE_PLACEHOLDER: i64 = 9_999_999_999;

/// A serialized PDF with a located, still empty signature slot.
#[derive(Debug)]
pub(crate) struct PreparedPdf {
    pub bytes: Vec<u8>,
    /// Offset of the `<` opening the `/Contents` hex string.
    pub contents_start: usize,
    /// Offset just past the closing `>`.
    pub contents_end: usize,
}

impl PreparedPdf {
    /// The two signed ranges as `[offset, length, offset, length]`.
    pub fn byte_range(&self) -> [usize; 4] {
        [
            0,
            self.contents_start,
            self.contents_end,
            self.bytes.len() - self.contents_end,
        ]
    }

    /// Bytes covered by the signature, i.e. everything but the `/Contents` value.
    pub fn signed_ranges(&self) -> [&[u8]; 2] {
        [
            &self.bytes[..self.contents_start],
            &self.bytes[self.contents_end..],
        ]
    }

    /// Writes the CMS blob into the reserved slot, zero-padded.
    pub fn inject(mut self, cms: &[u8]) -> SigningResult<Vec<u8>> {
        let capacity = (self.contents_end - self.contents_start - 2) / 2;
        if cms.len() > capacity {
            return Err(SigningError::SignatureTooLarge {
                needed: cms.len(),
                reserved: capacity,
            });
        }
        let encoded = hex::encode_upper(cms);
        let start = self.contents_start + 1;
        self.bytes[start..start + encoded.len()].copy_from_slice(encoded.as_bytes());
        Ok(self.bytes)
    }
}

/// Adds an invisible signature field to the first page and serializes the result.
///
/// # Arguments
///
/// * `pdf` - Unsigned PDF bytes.
/// * `metadata` - Name, reason and location written into the signature dictionary.
/// * `reserve_bytes` - Size of the CMS slot in bytes.
/// * `signing_time` - Written as `/M`.
///
/// # Errors
///
/// Returns [`SigningError::Pdf`] if the document cannot be parsed, has no pages, or the
/// serialized output does not contain the expected placeholder.
pub(crate) fn prepare(
    pdf: &[u8],
    metadata: &SignerMetadata,
    reserve_bytes: usize,
    signing_time: DateTime<Utc>,
) -> SigningResult<PreparedPdf> {
    let mut doc = Document::load_mem(pdf).map_err(|e| SigningError::Pdf(e.to_string()))?;

    let page_id = doc
        .get_pages()
        .values()
        .next()
        .copied()
        .ok_or_else(|| SigningError::Pdf("document has no pages".into()))?;

    let mut signature = Dictionary::new();
    signature.set("Type", Object::Name(b"Sig".to_vec()));
    signature.set("Filter", Object::Name(b"Adobe.PPKLite".to_vec()));
    signature.set("SubFilter", Object::Name(b"adbe.pkcs7.detached".to_vec()));
    signature.set(
        "ByteRange",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(BYTE_RANGE_PLACEHOLDER),
            Object::Integer(BYTE_RANGE_PLACEHOLDER),
            Object::Integer(BYTE_RANGE_PLACEHOLDER),
        ]),
    );
    signature.set(
        "Contents",
        Object::String(vec![0u8; reserve_bytes], StringFormat::Hexadecimal),
    );
    signature.set("Name", text_string(&metadata.name));
    signature.set("Reason", text_string(&metadata.reason));
    signature.set("Location", text_string(&metadata.location));
    if let Some(contact) = &metadata.contact_info {
        signature.set("ContactInfo", text_string(contact));
    }
    signature.set("M", pdf_date(signing_time));
    let signature_id = doc.add_object(signature);

    let mut widget = Dictionary::new();
    widget.set("Type", Object::Name(b"Annot".to_vec()));
    widget.set("Subtype", Object::Name(b"Widget".to_vec()));
    widget.set("FT", Object::Name(b"Sig".to_vec()));
    widget.set(
        "Rect",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(0),
        ]),
    );
    // Print | Locked
    widget.set("F", Object::Integer(132));
    widget.set("T", text_string("Assinatura1"));
    widget.set("V", Object::Reference(signature_id));
    widget.set("P", Object::Reference(page_id));
    let widget_id = doc.add_object(widget);

    append_annotation(&mut doc, page_id, widget_id)?;
    register_field(&mut doc, widget_id)?;

    let mut bytes = Vec::with_capacity(pdf.len() + reserve_bytes * 2 + 1024);
    doc.save_to(&mut bytes)
        .map_err(|e| SigningError::Pdf(e.to_string()))?;

    locate(bytes, reserve_bytes)
}

fn append_annotation(doc: &mut Document, page_id: ObjectId, widget_id: ObjectId) -> SigningResult<()> {
    let existing = doc
        .get_dictionary(page_id)
        .map_err(|e| SigningError::Pdf(e.to_string()))?
        .get(b"Annots")
        .ok()
        .cloned();

    match existing {
        Some(Object::Reference(annots_id)) => {
            let annots = doc
                .get_object_mut(annots_id)
                .and_then(Object::as_array_mut)
                .map_err(|e| SigningError::Pdf(e.to_string()))?;
            annots.push(Object::Reference(widget_id));
        }
        Some(Object::Array(mut annots)) => {
            annots.push(Object::Reference(widget_id));
            page_dict_mut(doc, page_id)?.set("Annots", Object::Array(annots));
        }
        _ => {
            page_dict_mut(doc, page_id)?
                .set("Annots", Object::Array(vec![Object::Reference(widget_id)]));
        }
    }
    Ok(())
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> SigningResult<&mut Dictionary> {
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| SigningError::Pdf(e.to_string()))
}

/// Lists the widget in the catalog's `/AcroForm`, creating it when absent.
fn register_field(doc: &mut Document, widget_id: ObjectId) -> SigningResult<()> {
    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|e| SigningError::Pdf(format!("catalog: {e}")))?;

    let existing = doc
        .get_dictionary(root_id)
        .map_err(|e| SigningError::Pdf(e.to_string()))?
        .get(b"AcroForm")
        .ok()
        .cloned();

    let form_id = match existing {
        Some(Object::Reference(id)) => id,
        Some(Object::Dictionary(form)) => doc.add_object(form),
        _ => doc.add_object(Dictionary::new()),
    };

    let form = doc
        .get_object_mut(form_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| SigningError::Pdf(e.to_string()))?;
    let mut fields = form
        .get(b"Fields")
        .and_then(Object::as_array)
        .cloned()
        .unwrap_or_default();
    fields.push(Object::Reference(widget_id));
    form.set("Fields", Object::Array(fields));
    // SignaturesExist | AppendOnly
    form.set("SigFlags", Object::Integer(3));

    doc.get_object_mut(root_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| SigningError::Pdf(e.to_string()))?
        .set("AcroForm", Object::Reference(form_id));
    Ok(())
}

/// Finds the serialized placeholder and patches the real `/ByteRange`.
fn locate(mut bytes: Vec<u8>, reserve_bytes: usize) -> SigningResult<PreparedPdf> {
    let (contents_start, contents_end) = find_contents(&bytes, reserve_bytes * 2)
        .ok_or_else(|| SigningError::Pdf("signature contents placeholder not found".into()))?;

    let (range_open, range_close) = find_byte_range(&bytes)
        .ok_or_else(|| SigningError::Pdf("signature byte range placeholder not found".into()))?;

    let prepared_len = bytes.len();
    let actual = format!(
        "0 {} {} {}",
        contents_start,
        contents_end,
        prepared_len - contents_end
    );
    let slot = range_close - range_open - 1;
    if actual.len() > slot {
        return Err(SigningError::Pdf("byte range does not fit placeholder".into()));
    }
    let padded = format!("{actual:<slot$}");
    bytes[range_open + 1..range_close].copy_from_slice(padded.as_bytes());

    Ok(PreparedPdf {
        bytes,
        contents_start,
        contents_end,
    })
}

/// Last `/Contents <000…>` whose hex body has exactly `hex_len` zero digits.
fn find_contents(bytes: &[u8], hex_len: usize) -> Option<(usize, usize)> {
    let key = b"/Contents";
    let mut search_end = bytes.len();
    while let Some(at) = rfind(&bytes[..search_end], key) {
        search_end = at;
        let mut pos = at + key.len();
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if bytes.get(pos) != Some(&b'<') || bytes.get(pos + 1) == Some(&b'<') {
            continue;
        }
        let body_end = pos + 1 + hex_len;
        if bytes.get(body_end) != Some(&b'>') {
            continue;
        }
        if bytes[pos + 1..body_end].iter().all(|b| *b == b'0') {
            return Some((pos, body_end + 1));
        }
    }
    None
}

/// Offsets of `[` and `]` of the last `/ByteRange` array.
pub(crate) fn find_byte_range(bytes: &[u8]) -> Option<(usize, usize)> {
    let at = rfind(bytes, b"/ByteRange")?;
    let open = at + bytes[at..].iter().position(|b| *b == b'[')?;
    let close = open + bytes[open..].iter().position(|b| *b == b']')?;
    Some((open, close))
}

pub(crate) fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn text_string(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut encoded = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        encoded.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(encoded, StringFormat::Hexadecimal)
}

fn pdf_date(at: DateTime<Utc>) -> Object {
    Object::String(
        format!("D:{}Z", at.format("%Y%m%d%H%M%S")).into_bytes(),
        StringFormat::Literal,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfind_returns_last_match() {
        assert_eq!(rfind(b"abcabc", b"bc"), Some(4));
        assert_eq!(rfind(b"abc", b"x"), None);
        assert_eq!(rfind(b"a", b"abc"), None);
    }

    #[test]
    fn contents_lookup_skips_stream_references() {
        let data = b"/Contents 5 0 R /Contents <0000> /Contents<<>>";
        let (start, end) = find_contents(data, 4).unwrap();
        assert_eq!(&data[start..end], b"<0000>");
    }

    #[test]
    fn contents_lookup_requires_exact_size() {
        assert!(find_contents(b"/Contents <00>", 4).is_none());
        assert!(find_contents(b"/Contents <00AB>", 4).is_none());
    }

    #[test]
    fn byte_range_is_patched_in_place() {
        let data =
            b"/ByteRange [0 9999999999 9999999999 9999999999] /Contents <0000> trailer".to_vec();
        let original_len = data.len();
        let prepared = locate(data, 2).unwrap();

        assert_eq!(prepared.bytes.len(), original_len);
        let [_, a, b, c] = prepared.byte_range();
        assert_eq!(&prepared.bytes[a..b], b"<0000>");
        assert_eq!(b + c, original_len);

        let (open, close) = find_byte_range(&prepared.bytes).unwrap();
        let text = std::str::from_utf8(&prepared.bytes[open + 1..close]).unwrap();
        let numbers: Vec<usize> = text.split_whitespace().map(|n| n.parse().unwrap()).collect();
        assert_eq!(numbers, vec![0, a, b, c]);
    }

    #[test]
    fn inject_rejects_oversized_signature() {
        let prepared = locate(
            b"/ByteRange [0 9999999999 9999999999 9999999999] /Contents <0000>".to_vec(),
            2,
        )
        .unwrap();
        assert!(matches!(
            prepared.inject(&[1, 2, 3]),
            Err(SigningError::SignatureTooLarge { needed: 3, reserved: 2 })
        ));
    }

    #[test]
    fn non_ascii_text_uses_utf16() {
        match text_string("João") {
            Object::String(bytes, StringFormat::Hexadecimal) => {
                assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
                assert_eq!(bytes.len(), 2 + 4 * 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
