//! XLS (BIFF8) reader.
//!
//! Opens a Compound File Binary (CFB/OLE2) container, reads the `Workbook`
//! stream, parses BIFF8 records, and populates a `sheetlock_core::Workbook`
//! with cell values. Formatting records are skipped and formulas keep only
//! their cached result.

use std::io::{Cursor, Read, Seek};
use std::path::Path;

use log::{debug, warn};
use sheetlock_core::{CellValue, Workbook, Worksheet};

use crate::biff::parser::{read_f64, read_u16, read_u32, Rk};
use crate::biff::records;
use crate::biff::strings::{parse_sst, read_short_string, read_unicode_string};
use crate::biff::{self, BiffRecord};
use crate::error::{XlsError, XlsResult};

/// Names of the stream that holds BIFF records, newest first.
pub const WORKBOOK_STREAMS: [&str; 2] = ["/Workbook", "/Book"];

/// XLS file reader.
pub struct XlsReader;

/// Metadata for a sheet parsed from the BOUNDSHEET record.
#[derive(Debug)]
struct SheetInfo {
    /// Sheet type: 0 = worksheet, 2 = chart, 6 = macro/VBA.
    sheet_type: u8,
    /// Sheet name.
    name: String,
}

/// Text Excel shows for a BOOLERR / FORMULA error code.
pub fn error_text(code: u8) -> &'static str {
    match code {
        0x00 => "#NULL!",
        0x07 => "#DIV/0!",
        0x0F => "#VALUE!",
        0x17 => "#REF!",
        0x1D => "#NAME?",
        0x24 => "#NUM!",
        0x2A => "#N/A",
        _ => "#VALUE!",
    }
}

impl XlsReader {
    /// Read an XLS file from a filesystem path.
    pub fn read_file<P: AsRef<Path>>(path: P) -> XlsResult<Workbook> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::read(file)
    }

    /// Read an XLS file from any `Read + Seek` source.
    pub fn read<R: Read + Seek>(reader: R) -> XlsResult<Workbook> {
        let mut cfb = cfb::CompoundFile::open(reader)?;
        let stream_data = Self::workbook_stream(&mut cfb)?;
        Self::read_workbook_stream(&stream_data)
    }

    /// Copy the BIFF stream (`Workbook`, or `Book` in older files) out of a
    /// compound file.
    pub fn workbook_stream<F: Read + Seek>(cfb: &mut cfb::CompoundFile<F>) -> XlsResult<Vec<u8>> {
        let stream_path = WORKBOOK_STREAMS
            .into_iter()
            .find(|path| cfb.is_stream(path))
            .ok_or_else(|| {
                XlsError::InvalidFormat("no Workbook or Book stream found in CFB".into())
            })?;

        let mut stream_data = Vec::new();
        let mut stream = cfb.open_stream(stream_path)?;
        stream.read_to_end(&mut stream_data)?;
        Ok(stream_data)
    }

    /// Parse an unencrypted BIFF8 workbook stream.
    pub fn read_workbook_stream(stream_data: &[u8]) -> XlsResult<Workbook> {
        let mut cursor = Cursor::new(stream_data);
        let all_records = biff::read_all_records(&mut cursor)?;

        // Phase 1: Parse workbook globals
        let mut sst: Vec<String> = Vec::new();
        let mut sheets: Vec<SheetInfo> = Vec::new();
        let mut in_globals = false;
        let mut globals_end_idx = None;

        for (idx, rec) in all_records.iter().enumerate() {
            match rec.record_type {
                records::BOF if !in_globals => {
                    let (version, dt) = biff::parse_bof(&rec.data)?;
                    if dt != records::BOF_WORKBOOK_GLOBALS {
                        return Err(XlsError::InvalidFormat(format!(
                            "stream starts with substream type 0x{dt:04X}, not workbook globals"
                        )));
                    }
                    if version != records::BIFF8_VERSION {
                        return Err(XlsError::UnsupportedVersion(format!(
                            "expected BIFF8 (0x0600), got 0x{version:04X}"
                        )));
                    }
                    in_globals = true;
                }
                records::EOF if in_globals => {
                    globals_end_idx = Some(idx);
                    break;
                }
                records::FILEPASS if in_globals => return Err(XlsError::Encrypted),
                records::SST if in_globals => {
                    sst = parse_sst(&rec.data, &rec.continue_breaks)?;
                }
                records::BOUNDSHEET if in_globals => {
                    sheets.push(Self::parse_boundsheet(&rec.data)?);
                }
                _ => {}
            }
        }

        let globals_end_idx = globals_end_idx.ok_or_else(|| {
            XlsError::InvalidFormat("no complete workbook globals substream found".into())
        })?;

        let mut workbook = Workbook::empty();

        // Phase 2: Parse each worksheet substream
        // The records after globals_end_idx contain per-sheet substreams
        // (BOF..EOF pairs). We match them to SheetInfo entries in order.
        let remaining_records = &all_records[globals_end_idx + 1..];
        let sheet_record_groups = Self::split_sheet_records(remaining_records);

        for (biff_idx, info) in sheets.iter().enumerate() {
            // Only handle worksheets (type 0), skip charts/macros
            if info.sheet_type != 0 {
                debug!("skipping sheet {:?} of type {}", info.name, info.sheet_type);
                continue;
            }

            let sheet_idx = workbook.add_worksheet_with_name(&info.name)?;
            let ws = workbook.worksheet_mut(sheet_idx).ok_or_else(|| {
                XlsError::InvalidFormat(format!("sheet {:?} vanished", info.name))
            })?;

            // Get this sheet's records (indexed by BIFF order, not wb order)
            match sheet_record_groups.get(biff_idx) {
                Some(sheet_records) => Self::parse_sheet_records(sheet_records, ws, &sst)?,
                None => warn!("sheet {:?} has no substream", info.name),
            }
        }

        if workbook.is_empty() {
            workbook.add_worksheet_with_name("Sheet1")?;
        }

        debug!(
            "read BIFF8 workbook: {} sheets, {} shared strings",
            workbook.sheet_count(),
            sst.len()
        );
        Ok(workbook)
    }

    /// Parse a BOUNDSHEET record body.
    fn parse_boundsheet(data: &[u8]) -> XlsResult<SheetInfo> {
        let mut offset = 0;
        let _stream_offset = read_u32(data, &mut offset)?;
        let _visibility = data.get(offset).copied().unwrap_or(0);
        offset += 1;
        let sheet_type = data.get(offset).copied().unwrap_or(0);
        offset += 1;
        let name = read_short_string(data, &mut offset)?;

        Ok(SheetInfo { sheet_type, name })
    }

    /// Split remaining records into per-sheet groups (each BOF..EOF pair is one sheet).
    fn split_sheet_records(records: &[BiffRecord]) -> Vec<Vec<&BiffRecord>> {
        let mut groups: Vec<Vec<&BiffRecord>> = Vec::new();
        let mut current: Option<Vec<&BiffRecord>> = None;
        let mut depth = 0usize;

        for rec in records {
            match rec.record_type {
                records::BOF => {
                    if depth == 0 {
                        current = Some(Vec::new());
                    }
                    depth += 1;
                    // Don't include the BOF itself in the records we process
                }
                records::EOF if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                    }
                }
                _ => {
                    if let Some(ref mut group) = current {
                        group.push(rec);
                    }
                }
            }
        }

        groups
    }

    /// Parse cell records from a sheet's record group.
    fn parse_sheet_records(
        records: &[&BiffRecord],
        ws: &mut Worksheet,
        sst: &[String],
    ) -> XlsResult<()> {
        // We need to track the last FORMULA record to associate a STRING record
        let mut pending_formula_cell: Option<(u32, u16)> = None;
        let mut formulas = 0usize;

        for rec in records {
            let data = rec.data.as_slice();
            match rec.record_type {
                records::ROW => Self::parse_row(data, ws)?,
                records::LABELSST => Self::parse_labelsst(data, ws, sst)?,
                records::LABEL | records::RSTRING => Self::parse_label(data, ws)?,
                records::NUMBER => Self::parse_number(data, ws)?,
                records::RK => Self::parse_rk(data, ws)?,
                records::MULRK => Self::parse_mulrk(data, ws)?,
                records::BLANK => Self::parse_blank(data, ws)?,
                records::MULBLANK => Self::parse_mulblank(data, ws)?,
                records::BOOLERR => Self::parse_boolerr(data, ws)?,
                records::FORMULA => {
                    formulas += 1;
                    pending_formula_cell = Self::parse_formula(data, ws)?;
                    continue;
                }
                records::STRING => {
                    // Cached string value for the preceding FORMULA
                    if let Some((row, col)) = pending_formula_cell.take() {
                        let mut off = 0;
                        let text = read_unicode_string(data, &mut off)?;
                        ws.set_cell_value_at(row, col, CellValue::text(text))?;
                    }
                    continue;
                }
                _ => {
                    // Skip unknown/unhandled records
                    continue;
                }
            }
            pending_formula_cell = None;
        }

        if formulas > 0 {
            warn!(
                "sheet {:?}: {formulas} formulas replaced by their cached values",
                ws.name()
            );
        }
        Ok(())
    }

    // ── Cell record parsers ──────────────────────────────────────────────

    /// Row and column of a cell record, skipping the XF index.
    fn cell_position(data: &[u8], off: &mut usize) -> XlsResult<(u32, u16)> {
        let row = read_u16(data, off)? as u32;
        let col = read_u16(data, off)?;
        let _xf_idx = read_u16(data, off)?;
        Ok((row, col))
    }

    /// ROW: row_index(2) + first_col(2) + last_col_plus1(2) + height(2) + ...
    fn parse_row(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let row_index = read_u16(data, &mut off)? as u32;
        ws.ensure_row(row_index)?;
        Ok(())
    }

    /// LABELSST: row(2) + col(2) + xf(2) + sst_index(4)
    fn parse_labelsst(data: &[u8], ws: &mut Worksheet, sst: &[String]) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::cell_position(data, &mut off)?;
        let sst_idx = read_u32(data, &mut off)? as usize;

        match sst.get(sst_idx) {
            Some(s) => ws.set_cell_value_at(row, col, CellValue::text(s))?,
            None => {
                warn!("SST index {sst_idx} out of bounds ({} strings)", sst.len());
                ws.cell_or_blank_at(row, col)?;
            }
        }
        Ok(())
    }

    /// LABEL: row(2) + col(2) + xf(2) + unicode_string
    fn parse_label(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::cell_position(data, &mut off)?;
        let text = read_unicode_string(data, &mut off)?;

        ws.set_cell_value_at(row, col, CellValue::text(text))?;
        Ok(())
    }

    /// NUMBER: row(2) + col(2) + xf(2) + f64(8)
    fn parse_number(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::cell_position(data, &mut off)?;
        let value = read_f64(data, &mut off)?;

        ws.set_cell_value_at(row, col, CellValue::Number(value))?;
        Ok(())
    }

    /// Plain RK integers become `Integer`; scaled or float RKs become `Number`.
    fn rk_value(rk: Rk) -> CellValue {
        match rk.as_integer() {
            Some(i) => CellValue::Integer(i),
            None => CellValue::Number(rk.to_f64()),
        }
    }

    /// RK: row(2) + col(2) + xf(2) + rk(4)
    fn parse_rk(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::cell_position(data, &mut off)?;
        let rk = Rk::read(data, &mut off)?;

        ws.set_cell_value_at(row, col, Self::rk_value(rk))?;
        Ok(())
    }

    /// MULRK: row(2) + first_col(2) + [xf(2) + rk(4)]* + last_col(2)
    fn parse_mulrk(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        if data.len() < 6 {
            return Err(XlsError::Parse("MULRK record too short".into()));
        }
        let mut off = 0;
        let row = read_u16(data, &mut off)? as u32;
        let first_col = read_u16(data, &mut off)?;

        // last_col is the last 2 bytes of the record
        let last_col = u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]);
        let rk_data_end = data.len() - 2; // exclude the trailing last_col field

        let mut col = first_col;
        while off + 6 <= rk_data_end && col <= last_col {
            let _xf_idx = read_u16(data, &mut off)?;
            let rk = Rk::read(data, &mut off)?;
            ws.set_cell_value_at(row, col, Self::rk_value(rk))?;
            col += 1;
        }

        Ok(())
    }

    /// BLANK: row(2) + col(2) + xf(2)
    fn parse_blank(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::cell_position(data, &mut off)?;
        ws.cell_or_blank_at(row, col)?;
        Ok(())
    }

    /// MULBLANK: row(2) + first_col(2) + [xf(2)]* + last_col(2)
    fn parse_mulblank(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        if data.len() < 6 {
            return Ok(());
        }
        let mut off = 0;
        let row = read_u16(data, &mut off)? as u32;
        let first_col = read_u16(data, &mut off)?;
        let last_col = u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]);
        let xf_data_end = data.len() - 2;

        let mut col = first_col;
        while off + 2 <= xf_data_end && col <= last_col {
            let _xf_idx = read_u16(data, &mut off)?;
            ws.cell_or_blank_at(row, col)?;
            col += 1;
        }
        Ok(())
    }

    /// BOOLERR: row(2) + col(2) + xf(2) + value(1) + is_error(1)
    fn parse_boolerr(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::cell_position(data, &mut off)?;
        let val = data.get(off).copied().unwrap_or(0);
        let is_error = data.get(off + 1).copied().unwrap_or(0);

        let cell_value = if is_error != 0 {
            CellValue::text(error_text(val))
        } else {
            CellValue::Boolean(val != 0)
        };

        ws.set_cell_value_at(row, col, cell_value)?;
        Ok(())
    }

    /// FORMULA: row(2) + col(2) + xf(2) + result(8) + options(2) + reserved(4) + formula_data(...)
    ///
    /// Returns the (row, col) if the cached result is a string (meaning a
    /// STRING record should follow).
    fn parse_formula(data: &[u8], ws: &mut Worksheet) -> XlsResult<Option<(u32, u16)>> {
        if data.len() < 20 {
            return Err(XlsError::Parse("FORMULA record too short".into()));
        }

        let mut off = 0;
        let (row, col) = Self::cell_position(data, &mut off)?;
        let result_bytes = &data[off..off + 8];

        // Check if result is a special type (bytes 6-7 == 0xFFFF)
        if result_bytes[6] != 0xFF || result_bytes[7] != 0xFF {
            let value = read_f64(data, &mut off)?;
            ws.set_cell_value_at(row, col, CellValue::Number(value))?;
            return Ok(None);
        }

        match result_bytes[0] {
            // String: the actual string follows in a STRING record
            0x00 => {
                ws.cell_or_blank_at(row, col)?;
                Ok(Some((row, col)))
            }
            0x01 => {
                ws.set_cell_value_at(row, col, CellValue::Boolean(result_bytes[2] != 0))?;
                Ok(None)
            }
            0x02 => {
                ws.set_cell_value_at(row, col, CellValue::text(error_text(result_bytes[2])))?;
                Ok(None)
            }
            // Empty string result
            0x03 => {
                ws.set_cell_value_at(row, col, CellValue::text(""))?;
                Ok(None)
            }
            _ => {
                ws.cell_or_blank_at(row, col)?;
                Ok(None)
            }
        }
    }
}
