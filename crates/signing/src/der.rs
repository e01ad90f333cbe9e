//! Minimal DER encoding helpers for building CMS structures.

pub(crate) const TAG_INTEGER: u8 = 0x02;
pub(crate) const TAG_OCTET_STRING: u8 = 0x04;
pub(crate) const TAG_NULL: u8 = 0x05;
pub(crate) const TAG_OID: u8 = 0x06;
pub(crate) const TAG_UTC_TIME: u8 = 0x17;
pub(crate) const TAG_SEQUENCE: u8 = 0x30;
pub(crate) const TAG_SET: u8 = 0x31;

pub(crate) fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    encode_length(content.len(), &mut out);
    out.extend_from_slice(content);
    out
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

pub(crate) fn sequence(items: &[&[u8]]) -> Vec<u8> {
    tlv(TAG_SEQUENCE, &items.concat())
}

/// `SET OF` with elements sorted by their encoding, as DER requires.
pub(crate) fn set_of(items: &[Vec<u8>]) -> Vec<u8> {
    let mut sorted: Vec<&Vec<u8>> = items.iter().collect();
    sorted.sort();
    let content: Vec<u8> = sorted.into_iter().flatten().copied().collect();
    tlv(TAG_SET, &content)
}

pub(crate) fn oid(encoded: &[u8]) -> Vec<u8> {
    tlv(TAG_OID, encoded)
}

/// INTEGER from unsigned big-endian bytes.
pub(crate) fn unsigned_integer(value: &[u8]) -> Vec<u8> {
    let trimmed: &[u8] = match value.iter().position(|b| *b != 0) {
        Some(first) => &value[first..],
        None => &[0],
    };
    if trimmed[0] & 0x80 != 0 {
        let mut padded = Vec::with_capacity(trimmed.len() + 1);
        padded.push(0);
        padded.extend_from_slice(trimmed);
        tlv(TAG_INTEGER, &padded)
    } else {
        tlv(TAG_INTEGER, trimmed)
    }
}

pub(crate) fn small_integer(value: u8) -> Vec<u8> {
    unsigned_integer(&[value])
}

pub(crate) fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(TAG_OCTET_STRING, content)
}

pub(crate) fn utc_time(formatted: &str) -> Vec<u8> {
    tlv(TAG_UTC_TIME, formatted.as_bytes())
}

/// Constructed context-specific tag `[n]`.
pub(crate) fn context(tag: u8, content: &[u8]) -> Vec<u8> {
    tlv(0xA0 | tag, content)
}

/// AlgorithmIdentifier, with NULL parameters when `null_params` is set.
pub(crate) fn algorithm(encoded_oid: &[u8], null_params: bool) -> Vec<u8> {
    if null_params {
        sequence(&[&oid(encoded_oid), &[TAG_NULL, 0x00]])
    } else {
        sequence(&[&oid(encoded_oid)])
    }
}

/// Reads the tag and returns `(header_len, content_len)` of the element starting at `data[0]`.
pub(crate) fn read_header(data: &[u8]) -> Option<(usize, usize)> {
    let first = *data.get(1)?;
    if first < 0x80 {
        return Some((2, first as usize));
    }
    let count = (first & 0x7F) as usize;
    if count == 0 || count > std::mem::size_of::<usize>() {
        return None;
    }
    let bytes = data.get(2..2 + count)?;
    let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Some((2 + count, len))
}
