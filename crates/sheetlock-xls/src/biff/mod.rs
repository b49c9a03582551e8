//! BIFF8 (Binary Interchange File Format) handling.
//!
//! This module provides the record-level abstraction for reading and writing
//! BIFF8 streams. A BIFF8 stream is a sequence of records, each with a 4-byte
//! header (2 bytes record type + 2 bytes body length) followed by the body.
//!
//! CONTINUE records (type 0x003C) extend the body of the preceding record
//! beyond the 8224-byte per-record limit.

pub mod parser;
pub mod records;
pub mod strings;
pub mod writer;

use crate::error::{XlsError, XlsResult};
use std::io::{Read, Seek};

/// Largest record body BIFF8 allows.
pub const MAX_RECORD_BODY: usize = 8224;

/// A single BIFF8 record (with CONTINUE bodies already merged).
#[derive(Debug)]
pub struct BiffRecord {
    /// Record type ID (e.g. `records::SST`, `records::NUMBER`).
    pub record_type: u16,
    /// Record body bytes (CONTINUE records have been concatenated).
    pub data: Vec<u8>,
    /// Offsets into `data` where each merged CONTINUE body starts.
    pub continue_breaks: Vec<usize>,
    /// Byte offset of this record's header in the stream (for debugging).
    pub stream_offset: u64,
}

/// Reads all BIFF8 records from a byte stream, merging CONTINUE records
/// into their parent.
///
/// Returns the records in order. Each record's `data` field contains the
/// full body (including any CONTINUE extensions).
pub fn read_all_records<R: Read + Seek>(stream: &mut R) -> XlsResult<Vec<BiffRecord>> {
    let mut records: Vec<BiffRecord> = Vec::new();
    let mut header_buf = [0u8; 4];

    loop {
        let stream_offset = stream.stream_position()?;

        // Read 4-byte record header
        match stream.read_exact(&mut header_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(XlsError::Io(e)),
        }

        let record_type = u16::from_le_bytes([header_buf[0], header_buf[1]]);
        let body_len = u16::from_le_bytes([header_buf[2], header_buf[3]]) as usize;

        // Read body
        let mut body = vec![0u8; body_len];
        if body_len > 0 {
            stream.read_exact(&mut body).map_err(|e| {
                XlsError::Parse(format!(
                    "record 0x{record_type:04X} at offset {stream_offset} is truncated: {e}"
                ))
            })?;
        }

        if record_type == records::CONTINUE {
            // Append to the previous record's data
            if let Some(prev) = records.last_mut() {
                prev.continue_breaks.push(prev.data.len());
                prev.data.extend_from_slice(&body);
            }
            // If there's no previous record, we just drop the orphaned CONTINUE
        } else {
            records.push(BiffRecord {
                record_type,
                data: body,
                continue_breaks: Vec::new(),
                stream_offset,
            });
        }
    }

    Ok(records)
}

/// Extract the BOF record fields from a record body.
///
/// Returns `(version, substream_type)`.
/// - `version` should be `0x0600` for BIFF8
/// - `substream_type`: 0x0005 = workbook globals, 0x0010 = worksheet, etc.
pub fn parse_bof(data: &[u8]) -> XlsResult<(u16, u16)> {
    if data.len() < 4 {
        return Err(XlsError::InvalidFormat("BOF record too short".into()));
    }
    let version = u16::from_le_bytes([data[0], data[1]]);
    let dt = u16::from_le_bytes([data[2], data[3]]);
    Ok((version, dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn raw(record_type: u16, body: &[u8]) -> Vec<u8> {
        let mut out = record_type.to_le_bytes().to_vec();
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_continue_bodies_are_merged() {
        let mut stream = raw(records::SST, &[1, 2, 3]);
        stream.extend(raw(records::CONTINUE, &[4, 5]));
        stream.extend(raw(records::CONTINUE, &[6]));
        stream.extend(raw(records::EOF, &[]));

        let recs = read_all_records(&mut Cursor::new(stream)).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].data, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(recs[0].continue_breaks, vec![3, 5]);
        assert_eq!(recs[1].record_type, records::EOF);
        assert_eq!(recs[1].stream_offset, 4 + 3 + 4 + 2 + 4 + 1);
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let mut stream = raw(records::NUMBER, &[0; 14]);
        stream.truncate(10);
        assert!(matches!(
            read_all_records(&mut Cursor::new(stream)),
            Err(XlsError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_bof() {
        let body = [0x00, 0x06, 0x10, 0x00];
        assert_eq!(parse_bof(&body).unwrap(), (0x0600, 0x0010));
        assert!(parse_bof(&body[..3]).is_err());
    }
}
