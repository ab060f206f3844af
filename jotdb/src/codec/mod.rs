//! Binary document codec.
//!
//! Encodes documents to a compact, length-prefixed binary form used for
//! every stored record and for every document crossing the handle facade.
//!
//! Wire format:
//!
//! ```text
//! document := total_size:u32le entry*
//! entry    := tag:u8 name_len:u16le name:bytes value
//! ```
//!
//! `total_size` covers the whole document including the prefix itself, so
//! [`document_size`] can read it without decoding. Strings and blobs are
//! length-prefixed rather than terminated, so strings may contain embedded
//! NUL bytes. Embedded documents carry their own prefix, which lets
//! [`extract`] skip over values without materialising them.
//!
//! Decoding is strict: truncated buffers, inconsistent length prefixes,
//! unknown tags and invalid UTF-8 all fail with
//! [`ErrorKind::MalformedDocument`]; nothing is silently coerced.

use crate::common::FIELD_SEPARATOR;
use crate::document::{Document, Oid, Value, OID_LENGTH};
use crate::errors::{ErrorKind, JotError, JotResult};

const TAG_NULL: u8 = 0x01;
const TAG_BOOL: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_DOUBLE: u8 = 0x04;
const TAG_STRING: u8 = 0x05;
const TAG_BYTES: u8 = 0x06;
const TAG_OBJECT_ID: u8 = 0x07;
const TAG_DATETIME: u8 = 0x08;
const TAG_DOCUMENT: u8 = 0x09;
const TAG_ARRAY: u8 = 0x0a;

/// Size of the document length prefix.
const PREFIX_LEN: usize = 4;

fn malformed(message: &str) -> JotError {
    log::error!("Document decode failed: {}", message);
    JotError::new(message, ErrorKind::MalformedDocument)
}

/// Encodes a document into its binary form.
pub fn encode(document: &Document) -> JotResult<Vec<u8>> {
    let mut out = vec![0u8; PREFIX_LEN];
    for (name, value) in document.iter() {
        write_entry(&mut out, name, value)?;
    }
    let total = out.len();
    if total > u32::MAX as usize {
        return Err(JotError::new(
            "Encoded document exceeds the 4 GiB format limit",
            ErrorKind::MalformedDocument,
        ));
    }
    out[0..PREFIX_LEN].copy_from_slice(&(total as u32).to_le_bytes());
    Ok(out)
}

/// Decodes a complete encoded document.
pub fn decode(bytes: &[u8]) -> JotResult<Document> {
    let total = document_size(bytes)?;
    if total != bytes.len() {
        return Err(malformed(&format!(
            "Length prefix {} does not match buffer length {}",
            total,
            bytes.len()
        )));
    }

    let mut document = Document::new();
    let mut reader = Reader::new(&bytes[PREFIX_LEN..total]);
    while !reader.is_done() {
        let (name, value) = reader.read_entry()?;
        document.put(&name, value).map_err(|e| {
            JotError::new_with_cause("Decoded field is not storable", ErrorKind::MalformedDocument, e)
        })?;
    }
    Ok(document)
}

/// Reads the total encoded size from the length prefix without decoding.
pub fn document_size(bytes: &[u8]) -> JotResult<usize> {
    if bytes.len() < PREFIX_LEN {
        return Err(malformed("Buffer too short for a length prefix"));
    }
    let total = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if total < PREFIX_LEN || total > bytes.len() {
        return Err(malformed(&format!("Invalid length prefix {}", total)));
    }
    Ok(total)
}

/// Extracts the value at a dot-separated field path from an encoded
/// document without materialising the whole document.
///
/// Walks entries at each level, skipping values by their encoded sizes,
/// descending into embedded documents by field name and into arrays by
/// numeric segment (`"tags.0"`), matching [`Document::get`]. Returns
/// `Ok(None)` when the path does not resolve. The collection uses this
/// for indexed field extraction on raw stored bytes.
pub fn extract(bytes: &[u8], path: &str) -> JotResult<Option<Value>> {
    let total = document_size(bytes)?;
    let body = &bytes[PREFIX_LEN..total];

    // a top-level field whose name contains the separator wins over
    // path traversal, matching Document::get
    if let Some((tag, value_bytes)) = find_entry(body, path)? {
        let mut reader = Reader::new(value_bytes);
        return reader.read_value(tag).map(Some);
    }
    if !path.contains(FIELD_SEPARATOR) {
        return Ok(None);
    }

    let mut segments = path.split(FIELD_SEPARATOR);
    let first = match segments.next() {
        Some(segment) => segment,
        None => return Ok(None),
    };
    let mut current = match find_entry(body, first)? {
        Some(hit) => hit,
        None => return Ok(None),
    };

    for segment in segments {
        current = match current {
            (TAG_DOCUMENT, value_bytes) => {
                let inner_total = document_size(value_bytes)?;
                match find_entry(&value_bytes[PREFIX_LEN..inner_total], segment)? {
                    Some(hit) => hit,
                    None => return Ok(None),
                }
            }
            (TAG_ARRAY, value_bytes) => {
                let index: usize = match segment.parse() {
                    Ok(index) => index,
                    Err(_) => return Ok(None),
                };
                match array_item(value_bytes, index)? {
                    Some(hit) => hit,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
    }

    let (tag, value_bytes) = current;
    let mut reader = Reader::new(value_bytes);
    reader.read_value(tag).map(Some)
}

/// Scans one level of entries for a field, returning its tag and raw
/// value bytes.
fn find_entry<'a>(body: &'a [u8], name: &str) -> JotResult<Option<(u8, &'a [u8])>> {
    let mut reader = Reader::new(body);
    while !reader.is_done() {
        let (tag, field, value_bytes) = reader.read_raw_entry()?;
        if field == name {
            return Ok(Some((tag, value_bytes)));
        }
    }
    Ok(None)
}

/// Locates the element at `index` inside a raw array payload, returning
/// its tag and raw value bytes.
fn array_item(bytes: &[u8], index: usize) -> JotResult<Option<(u8, &[u8])>> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_u32()? as usize;
    if index >= count {
        return Ok(None);
    }
    for _ in 0..index {
        let tag = reader.read_u8()?;
        reader.skip_value(tag)?;
    }
    let tag = reader.read_u8()?;
    let start = reader.pos;
    reader.skip_value(tag)?;
    Ok(Some((tag, &reader.bytes[start..reader.pos])))
}

fn write_entry(out: &mut Vec<u8>, name: &str, value: &Value) -> JotResult<()> {
    if name.len() > u16::MAX as usize {
        return Err(JotError::new(
            &format!("Field name exceeds {} bytes", u16::MAX),
            ErrorKind::MalformedDocument,
        ));
    }
    out.push(tag_of(value));
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    write_value(out, value)
}

fn tag_of(value: &Value) -> u8 {
    match value {
        Value::Null => TAG_NULL,
        Value::Bool(_) => TAG_BOOL,
        Value::Int(_) => TAG_INT,
        Value::Double(_) => TAG_DOUBLE,
        Value::String(_) => TAG_STRING,
        Value::Bytes(_) => TAG_BYTES,
        Value::ObjectId(_) => TAG_OBJECT_ID,
        Value::DateTime(_) => TAG_DATETIME,
        Value::Document(_) => TAG_DOCUMENT,
        Value::Array(_) => TAG_ARRAY,
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> JotResult<()> {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push(*b as u8),
        Value::Int(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Double(d) => out.extend_from_slice(&d.to_bits().to_le_bytes()),
        Value::String(s) => {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out.extend_from_slice(&(b.len() as u32).to_le_bytes());
            out.extend_from_slice(b);
        }
        Value::ObjectId(oid) => out.extend_from_slice(oid.as_bytes()),
        Value::DateTime(ts) => out.extend_from_slice(&ts.to_le_bytes()),
        Value::Document(doc) => {
            let encoded = encode(doc)?;
            out.extend_from_slice(&encoded);
        }
        Value::Array(items) => {
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                out.push(tag_of(item));
                write_value(out, item)?;
            }
        }
    }
    Ok(())
}

/// Cursor over an encoded entry sequence.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, count: usize) -> JotResult<&'a [u8]> {
        if self.pos + count > self.bytes.len() {
            return Err(malformed("Truncated buffer"));
        }
        let slice = &self.bytes[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn read_u8(&mut self) -> JotResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> JotResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> JotResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> JotResult<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_entry(&mut self) -> JotResult<(String, Value)> {
        let tag = self.read_u8()?;
        let name_len = self.read_u16()? as usize;
        let name = std::str::from_utf8(self.take(name_len)?)
            .map_err(|_| malformed("Field name is not valid UTF-8"))?
            .to_string();
        let value = self.read_value(tag)?;
        Ok((name, value))
    }

    /// Reads one entry header and the raw bytes of its value, without
    /// decoding the value.
    fn read_raw_entry(&mut self) -> JotResult<(u8, &'a str, &'a [u8])> {
        let tag = self.read_u8()?;
        let name_len = self.read_u16()? as usize;
        let name = std::str::from_utf8(self.take(name_len)?)
            .map_err(|_| malformed("Field name is not valid UTF-8"))?;
        let start = self.pos;
        self.skip_value(tag)?;
        Ok((tag, name, &self.bytes[start..self.pos]))
    }

    fn read_value(&mut self, tag: u8) -> JotResult<Value> {
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => match self.read_u8()? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(malformed(&format!("Invalid boolean byte {}", other))),
            },
            TAG_INT => Ok(Value::Int(self.read_i64()?)),
            TAG_DOUBLE => {
                let bits = self.read_i64()? as u64;
                Ok(Value::Double(f64::from_bits(bits)))
            }
            TAG_STRING => {
                let len = self.read_u32()? as usize;
                let text = std::str::from_utf8(self.take(len)?)
                    .map_err(|_| malformed("String value is not valid UTF-8"))?;
                Ok(Value::String(text.to_string()))
            }
            TAG_BYTES => {
                let len = self.read_u32()? as usize;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            TAG_OBJECT_ID => {
                let raw = self.take(OID_LENGTH)?;
                let oid = Oid::from_bytes(raw).map_err(|e| {
                    JotError::new_with_cause(
                        "Invalid object id bytes",
                        ErrorKind::MalformedDocument,
                        e,
                    )
                })?;
                Ok(Value::ObjectId(oid))
            }
            TAG_DATETIME => Ok(Value::DateTime(self.read_i64()?)),
            TAG_DOCUMENT => {
                let start = self.pos;
                let remaining = &self.bytes[start..];
                let total = document_size(remaining)?;
                let slice = self.take(total)?;
                decode(slice).map(Value::Document)
            }
            TAG_ARRAY => {
                let count = self.read_u32()? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let item_tag = self.read_u8()?;
                    items.push(self.read_value(item_tag)?);
                }
                Ok(Value::Array(items))
            }
            other => Err(malformed(&format!("Unknown type tag {:#04x}", other))),
        }
    }

    /// Advances past one value of the given tag without decoding it.
    fn skip_value(&mut self, tag: u8) -> JotResult<()> {
        match tag {
            TAG_NULL => Ok(()),
            TAG_BOOL => self.take(1).map(|_| ()),
            TAG_INT | TAG_DOUBLE | TAG_DATETIME => self.take(8).map(|_| ()),
            TAG_STRING | TAG_BYTES => {
                let len = self.read_u32()? as usize;
                self.take(len).map(|_| ())
            }
            TAG_OBJECT_ID => self.take(OID_LENGTH).map(|_| ()),
            TAG_DOCUMENT => {
                let remaining = &self.bytes[self.pos..];
                let total = document_size(remaining)?;
                self.take(total).map(|_| ())
            }
            TAG_ARRAY => {
                let count = self.read_u32()? as usize;
                for _ in 0..count {
                    let item_tag = self.read_u8()?;
                    self.skip_value(item_tag)?;
                }
                Ok(())
            }
            other => Err(malformed(&format!("Unknown type tag {:#04x}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn sample() -> Document {
        doc! {
            "name": "observatory",
            "visitors": 48213,
            "rating": 4.7,
            "open": true,
            "closed_on": (Value::Null),
            "location": {
                "city": "Quito",
                "elevation": 2850,
                "geo": { "lat": (-0.22), "lon": (-78.51) }
            },
            "tags": ["science", "tourism", 9]
        }
    }

    #[test]
    fn test_round_trip() {
        let doc = sample();
        let bytes = encode(&doc).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(doc, decoded);
    }

    #[test]
    fn test_round_trip_empty() {
        let doc = Document::new();
        let bytes = encode(&doc).unwrap();
        assert_eq!(bytes.len(), 4);
        assert_eq!(decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_round_trip_embedded_nul() {
        let doc = doc! { "text": "before\u{0}after" };
        let bytes = encode(&doc).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.get("text"), Value::from("before\u{0}after"));
    }

    #[test]
    fn test_round_trip_numeric_extremes() {
        let doc = doc! {
            "min": (i64::MIN),
            "max": (i64::MAX),
            "tiny": (f64::MIN_POSITIVE),
            "neg": (-0.0f64)
        };
        let decoded = decode(&encode(&doc).unwrap()).unwrap();
        assert_eq!(decoded.get("min"), Value::Int(i64::MIN));
        assert_eq!(decoded.get("max"), Value::Int(i64::MAX));
        assert_eq!(decoded.get("tiny").as_f64(), Some(f64::MIN_POSITIVE));
        assert_eq!(decoded.get("neg").as_f64().unwrap().to_bits(), (-0.0f64).to_bits());
    }

    #[test]
    fn test_round_trip_oid_and_bytes() {
        let oid = Oid::generate();
        let mut doc = Document::new();
        doc.put("ref", oid).unwrap();
        doc.put("blob", Value::Bytes(vec![0, 255, 17, 0])).unwrap();
        doc.put("ts", Value::DateTime(1714000000123)).unwrap();

        let decoded = decode(&encode(&doc).unwrap()).unwrap();
        assert_eq!(decoded.get("ref").as_object_id(), Some(&oid));
        assert_eq!(decoded.get("blob").as_bytes(), Some(&[0u8, 255, 17, 0][..]));
        assert_eq!(decoded.get("ts"), Value::DateTime(1714000000123));
    }

    #[test]
    fn test_document_size_reads_prefix_only() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(document_size(&bytes).unwrap(), bytes.len());

        // a longer buffer is fine, the prefix rules
        let mut padded = bytes.clone();
        padded.extend_from_slice(&[0xde, 0xad]);
        assert_eq!(document_size(&padded).unwrap(), bytes.len());
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MalformedDocument);
    }

    #[test]
    fn test_decode_rejects_bad_prefix() {
        assert!(document_size(&[1, 2]).is_err());
        assert!(document_size(&[0, 0, 0, 0]).is_err());

        let mut bytes = encode(&doc! { "a": 1 }).unwrap();
        bytes[0] = bytes[0].wrapping_add(7);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let mut bytes = encode(&doc! { "a": 1 }).unwrap();
        bytes[4] = 0x7f; // first entry tag
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MalformedDocument);
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let mut bytes = encode(&doc! { "s": "ascii" }).unwrap();
        let pos = bytes.len() - 5; // inside the string payload
        bytes[pos] = 0xff;
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MalformedDocument);
    }

    #[test]
    fn test_extract_top_level() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(
            extract(&bytes, "name").unwrap(),
            Some(Value::from("observatory"))
        );
        assert_eq!(extract(&bytes, "visitors").unwrap(), Some(Value::Int(48213)));
        assert_eq!(extract(&bytes, "missing").unwrap(), None);
    }

    #[test]
    fn test_extract_nested() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(
            extract(&bytes, "location.city").unwrap(),
            Some(Value::from("Quito"))
        );
        assert_eq!(
            extract(&bytes, "location.geo.lat").unwrap(),
            Some(Value::Double(-0.22))
        );
        assert_eq!(extract(&bytes, "location.geo.nope").unwrap(), None);
        // descending through a scalar resolves to nothing
        assert_eq!(extract(&bytes, "name.inner").unwrap(), None);
    }

    #[test]
    fn test_extract_array_value() {
        let bytes = encode(&sample()).unwrap();
        let tags = extract(&bytes, "tags").unwrap().unwrap();
        let tags = tags.as_array().unwrap();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0], Value::from("science"));
        assert_eq!(tags[2], Value::Int(9));
    }

    #[test]
    fn test_extract_array_element_by_index() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(
            extract(&bytes, "tags.0").unwrap(),
            Some(Value::from("science"))
        );
        assert_eq!(extract(&bytes, "tags.2").unwrap(), Some(Value::Int(9)));
        assert_eq!(extract(&bytes, "tags.3").unwrap(), None);
        assert_eq!(extract(&bytes, "tags.x").unwrap(), None);
    }

    #[test]
    fn test_extract_descends_through_array_elements() {
        let doc = doc! {
            "rows": [{ "cells": ["a", "b"] }, { "cells": ["c"] }]
        };
        let bytes = encode(&doc).unwrap();
        assert_eq!(
            extract(&bytes, "rows.1.cells.0").unwrap(),
            Some(Value::from("c"))
        );
        assert_eq!(extract(&bytes, "rows.2.cells.0").unwrap(), None);
    }

    #[test]
    fn test_extract_prefers_literal_dotted_field() {
        let mut doc = Document::new();
        doc.put("a.b", 1).unwrap();
        doc.put("a", doc! { "b": 2 }).unwrap();
        let bytes = encode(&doc).unwrap();
        assert_eq!(extract(&bytes, "a.b").unwrap(), Some(Value::Int(1)));
        assert_eq!(extract(&bytes, "a.b").unwrap(), Some(doc.get("a.b")));
    }

    #[test]
    fn test_extract_matches_decoded_get_on_array_paths() {
        let doc = sample();
        let bytes = encode(&doc).unwrap();
        for path in ["tags.0", "tags.2", "tags.9", "location.geo.lat"] {
            let streamed = extract(&bytes, path).unwrap().unwrap_or(Value::Null);
            assert_eq!(streamed, doc.get(path), "path {}", path);
        }
    }

    #[test]
    fn test_extract_null_is_present() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(extract(&bytes, "closed_on").unwrap(), Some(Value::Null));
    }
}
