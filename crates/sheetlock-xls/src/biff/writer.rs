//! Record-level BIFF8 output.

use super::records;
use super::strings::EncodedString;
use super::MAX_RECORD_BODY;
use crate::error::{XlsError, XlsResult};

/// A growing BIFF8 record stream.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    bytes: Vec<u8>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current length, i.e. the offset the next record will start at.
    pub fn position(&self) -> usize {
        self.bytes.len()
    }

    /// Append one record. Bodies above the record limit are rejected.
    pub fn record(&mut self, record_type: u16, body: &[u8]) -> XlsResult<()> {
        let len = u16::try_from(body.len())
            .ok()
            .filter(|&len| len as usize <= MAX_RECORD_BODY)
            .ok_or_else(|| {
                XlsError::Unrepresentable(format!(
                    "record 0x{record_type:04X} body of {} bytes",
                    body.len()
                ))
            })?;
        self.bytes.extend_from_slice(&record_type.to_le_bytes());
        self.bytes.extend_from_slice(&len.to_le_bytes());
        self.bytes.extend_from_slice(body);
        Ok(())
    }

    /// Overwrite a little-endian `u32` written earlier.
    pub fn patch_u32(&mut self, at: usize, value: u32) -> XlsResult<()> {
        let slot = self
            .bytes
            .get_mut(at..at + 4)
            .ok_or_else(|| XlsError::InvalidFormat(format!("patch offset {at} out of range")))?;
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Append another buffer's records.
    pub fn append(&mut self, other: RecordBuffer) {
        self.bytes.extend(other.bytes);
    }

    /// Pad with zero bytes up to `len`.
    pub fn pad_to(&mut self, len: usize) {
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Write an SST record followed by as many CONTINUE records as needed.
///
/// A string header never straddles two records. Character data that does is
/// split on a UTF-16 unit and the continuation starts with a flags byte.
pub fn write_sst(
    out: &mut RecordBuffer,
    total_refs: u32,
    strings: &[EncodedString],
) -> XlsResult<()> {
    let mut bodies: Vec<Vec<u8>> = Vec::new();
    let mut body = Vec::with_capacity(MAX_RECORD_BODY);
    body.extend_from_slice(&total_refs.to_le_bytes());
    body.extend_from_slice(&(strings.len() as u32).to_le_bytes());

    for s in strings {
        // Header plus at least one character must fit
        let needed = s.header.len() + s.chars.len().min(2);
        if MAX_RECORD_BODY - body.len() < needed {
            bodies.push(std::mem::replace(&mut body, Vec::with_capacity(MAX_RECORD_BODY)));
        }
        body.extend_from_slice(&s.header);

        let mut chars = s.chars.as_slice();
        loop {
            let room = (MAX_RECORD_BODY - body.len()) & !1;
            let take = room.min(chars.len());
            body.extend_from_slice(&chars[..take]);
            chars = &chars[take..];
            if chars.is_empty() {
                break;
            }
            bodies.push(std::mem::replace(&mut body, Vec::with_capacity(MAX_RECORD_BODY)));
            body.push(s.header[2]);
        }
    }
    bodies.push(body);

    let mut bodies = bodies.into_iter();
    if let Some(first) = bodies.next() {
        out.record(records::SST, &first)?;
    }
    for continued in bodies {
        out.record(records::CONTINUE, &continued)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biff::read_all_records;
    use crate::biff::strings::{encode_unicode_string, parse_sst};
    use std::io::Cursor;

    #[test]
    fn test_record_layout() {
        let mut buf = RecordBuffer::new();
        buf.record(records::EOF, &[]).unwrap();
        buf.record(0x1234, &[0xAA, 0xBB]).unwrap();
        assert_eq!(
            buf.into_bytes(),
            vec![0x0A, 0x00, 0x00, 0x00, 0x34, 0x12, 0x02, 0x00, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_oversized_record_is_rejected() {
        let mut buf = RecordBuffer::new();
        let body = vec![0u8; MAX_RECORD_BODY + 1];
        assert!(matches!(
            buf.record(records::NUMBER, &body),
            Err(XlsError::Unrepresentable(_))
        ));
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_patch_u32() {
        let mut buf = RecordBuffer::new();
        buf.record(records::BOUNDSHEET, &[0, 0, 0, 0, 0, 0]).unwrap();
        buf.patch_u32(4, 0xDEAD_BEEF).unwrap();
        assert_eq!(&buf.into_bytes()[4..8], &0xDEAD_BEEFu32.to_le_bytes());
    }

    #[test]
    fn test_large_sst_spans_continue_records() {
        let texts: Vec<String> = (0..40)
            .map(|i| format!("{i}:{}", "é".repeat(300 + i)))
            .chain(std::iter::once("z".repeat(20_000)))
            .collect();
        let encoded: Vec<EncodedString> = texts
            .iter()
            .map(|t| encode_unicode_string(t).unwrap())
            .collect();

        let mut buf = RecordBuffer::new();
        write_sst(&mut buf, texts.len() as u32, &encoded).unwrap();

        let recs = read_all_records(&mut Cursor::new(buf.into_bytes())).unwrap();
        assert_eq!(recs.len(), 1);
        assert!(!recs[0].continue_breaks.is_empty());

        let parsed = parse_sst(&recs[0].data, &recs[0].continue_breaks).unwrap();
        assert_eq!(parsed, texts);
    }
}
