//! BIFF8 Unicode string encoding and decoding.
//!
//! BIFF8 strings have a complex encoding:
//! - Header: char_count (2 bytes) + flags (1 byte)
//! - Flags bit 0 (`fHighByte`): 0 = compressed Latin-1, 1 = uncompressed UTF-16LE
//! - Flags bit 2 (`fExtSt`): extended string data follows (Asian phonetic)
//! - Flags bit 3 (`fRichSt`): rich text run array follows
//! - If fRichSt: 2-byte run count follows the flags
//! - If fExtSt: 4-byte extended data size follows
//! - Then the character data
//! - Then the rich text runs (4 bytes each) if fRichSt
//! - Then the extended data if fExtSt
//!
//! In SST records, strings can span CONTINUE records. The CONTINUE record
//! can change the encoding (compressed ↔ uncompressed) mid-string via a
//! new flags byte at the start of the continuation.

use super::parser::{read_u16, read_u32, read_u8};
use crate::error::{XlsError, XlsResult};

const FLAG_WIDE: u8 = 0x01;
const FLAG_EXT: u8 = 0x04;
const FLAG_RICH: u8 = 0x08;

/// Longest string a BIFF8 cell can hold, in UTF-16 code units.
pub const MAX_STRING_UNITS: usize = 32_767;

/// Read a BIFF8 "short" string (1-byte length prefix, used in BOUNDSHEET etc.).
pub fn read_short_string(data: &[u8], offset: &mut usize) -> XlsResult<String> {
    let char_count = read_u8(data, offset)? as u16;
    let flags = read_u8(data, offset)?;
    read_character_data(data, offset, char_count, flags, &[])
}

/// Read a BIFF8 Unicode string with a 2-byte length prefix (used in SST, LABEL, etc.).
pub fn read_unicode_string(data: &[u8], offset: &mut usize) -> XlsResult<String> {
    read_continued_string(data, offset, &[])
}

/// Read a 2-byte-length string whose character data may cross the
/// CONTINUE boundaries in `breaks`.
fn read_continued_string(data: &[u8], offset: &mut usize, breaks: &[usize]) -> XlsResult<String> {
    let char_count = read_u16(data, offset)?;
    let flags = read_u8(data, offset)?;

    let is_rich = (flags & FLAG_RICH) != 0;
    let has_ext = (flags & FLAG_EXT) != 0;

    let run_count = if is_rich { read_u16(data, offset)? } else { 0 };
    let ext_size = if has_ext { read_u32(data, offset)? } else { 0 };

    let text = read_character_data(data, offset, char_count, flags, breaks)?;

    // Skip rich text runs (4 bytes each: char_pos u16 + font_idx u16)
    if is_rich {
        *offset += run_count as usize * 4;
    }
    // Skip extended string data
    if has_ext {
        *offset += ext_size as usize;
    }

    Ok(text)
}

/// Read character data (no header) given char_count and flags byte.
///
/// When the data reaches an offset listed in `breaks` with characters still
/// outstanding, a fresh flags byte selects the width of the remainder.
fn read_character_data(
    data: &[u8],
    offset: &mut usize,
    char_count: u16,
    flags: u8,
    breaks: &[usize],
) -> XlsResult<String> {
    let mut is_wide = (flags & FLAG_WIDE) != 0;
    let mut remaining = char_count as usize;
    let mut units: Vec<u16> = Vec::with_capacity(remaining);

    while remaining > 0 {
        if breaks.binary_search(offset).is_ok() {
            is_wide = (read_u8(data, offset)? & FLAG_WIDE) != 0;
        }

        // Characters available before the next CONTINUE boundary
        let limit = breaks
            .iter()
            .copied()
            .find(|&b| b > *offset)
            .unwrap_or(data.len())
            .min(data.len());
        let width = if is_wide { 2 } else { 1 };
        let available = limit.saturating_sub(*offset) / width;
        if available == 0 {
            return Err(XlsError::Parse(format!(
                "string data too short: need {} more characters at offset {}",
                remaining, *offset
            )));
        }

        let take = available.min(remaining);
        let chunk = &data[*offset..*offset + take * width];
        if is_wide {
            units.extend(chunk.chunks_exact(2).map(|p| u16::from_le_bytes([p[0], p[1]])));
        } else {
            // Compressed Latin-1: 1 byte per character
            units.extend(chunk.iter().map(|&b| b as u16));
        }
        *offset += take * width;
        remaining -= take;
    }

    String::from_utf16(&units).map_err(|e| XlsError::Parse(format!("invalid UTF-16 string: {e}")))
}

/// Parse the entire SST (Shared String Table) from a concatenated buffer
/// (SST body + all CONTINUE bodies already joined).
///
/// The SST body starts with:
/// - `total_strings` (4 bytes, u32): total string refs in workbook
/// - `unique_strings` (4 bytes, u32): number of unique strings in this table
/// - Then `unique_strings` Unicode string entries
pub fn parse_sst(data: &[u8], breaks: &[usize]) -> XlsResult<Vec<String>> {
    let mut offset = 0;

    let _total_strings = read_u32(data, &mut offset)?;
    let unique_count = read_u32(data, &mut offset)? as usize;

    let mut strings = Vec::with_capacity(unique_count.min(data.len()));

    for i in 0..unique_count {
        match read_continued_string(data, &mut offset, breaks) {
            Ok(s) => strings.push(s),
            Err(e) => {
                // If we hit a parse error near the end, log and stop.
                // Some XLS files have SST padding or truncation issues.
                log::warn!("SST parse error at string {i}/{unique_count}: {e}");
                break;
            }
        }
    }

    Ok(strings)
}

/// Encode a short string (1-byte length) as uncompressed UTF-16.
pub fn encode_short_string(s: &str) -> XlsResult<Vec<u8>> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = u8::try_from(units.len())
        .map_err(|_| XlsError::Unrepresentable(format!("name {s:?} is too long")))?;
    let mut out = Vec::with_capacity(2 + units.len() * 2);
    out.push(len);
    out.push(FLAG_WIDE);
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    Ok(out)
}

/// A string ready to be laid out in an SST: header plus UTF-16LE characters.
#[derive(Debug)]
pub struct EncodedString {
    pub header: [u8; 3],
    pub chars: Vec<u8>,
}

/// Encode a cell string as an uncompressed BIFF8 Unicode string.
pub fn encode_unicode_string(s: &str) -> XlsResult<EncodedString> {
    let units: Vec<u16> = s.encode_utf16().collect();
    if units.len() > MAX_STRING_UNITS {
        return Err(XlsError::Unrepresentable(format!(
            "string of {} characters exceeds the {MAX_STRING_UNITS} character cell limit",
            units.len()
        )));
    }
    let count = (units.len() as u16).to_le_bytes();
    let mut chars = Vec::with_capacity(units.len() * 2);
    for unit in units {
        chars.extend_from_slice(&unit.to_le_bytes());
    }
    Ok(EncodedString {
        header: [count[0], count[1], FLAG_WIDE],
        chars,
    })
}
