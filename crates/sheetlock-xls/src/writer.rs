//! XLS (BIFF8) writer.
//!
//! Produces a compound file with a single `Workbook` stream holding cell
//! values. Every cell uses one default cell format, strings go through the
//! shared string table and allocated rows without cells get a ROW record so
//! they survive a round trip.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use log::{debug, warn};
use sheetlock_core::{CellValue, Workbook, Worksheet};

use crate::biff::parser::Rk;
use crate::biff::records;
use crate::biff::strings::{encode_short_string, encode_unicode_string, EncodedString};
use crate::biff::writer::{write_sst, RecordBuffer};
use crate::error::{XlsError, XlsResult};
use crate::{MAX_COLS, MAX_ROWS};

/// XF index of the cell format every written cell uses.
const CELL_XF: u16 = 15;

/// Workbook streams are kept out of the compound file mini stream.
const MIN_STREAM_LEN: usize = 4096;

const ERROR_NUM: u8 = 0x24;

/// Style XF: parent 0xFFF, locked, style flag set.
const STYLE_XF: [u8; 20] = [
    0x00, 0x00, 0x00, 0x00, 0xF5, 0xFF, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0xC0, 0x20,
];

/// Cell XF: parent style 0, locked.
const DEFAULT_CELL_XF: [u8; 20] = [
    0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0xC0, 0x20,
];

/// XLS file writer.
pub struct XlsWriter;

/// Workbook-wide shared string table under construction.
#[derive(Default)]
struct SharedStrings {
    index: HashMap<String, u32>,
    strings: Vec<EncodedString>,
    total_refs: u32,
}

impl SharedStrings {
    fn intern(&mut self, s: &str) -> XlsResult<u32> {
        self.total_refs = self.total_refs.saturating_add(1);
        if let Some(&idx) = self.index.get(s) {
            return Ok(idx);
        }
        let idx = self.strings.len() as u32;
        self.strings.push(encode_unicode_string(s)?);
        self.index.insert(s.to_string(), idx);
        Ok(idx)
    }
}

impl XlsWriter {
    /// Write a workbook to a file path.
    pub fn write_file<P: AsRef<Path>>(workbook: &Workbook, path: P) -> XlsResult<()> {
        let bytes = Self::write_bytes(workbook)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Write a workbook as compound-file bytes.
    pub fn write_bytes(workbook: &Workbook) -> XlsResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        Self::write(workbook, &mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Write a workbook into a compound file on `writer`.
    pub fn write<W: Read + Write + Seek>(workbook: &Workbook, writer: W) -> XlsResult<()> {
        let stream = Self::workbook_stream(workbook)?;

        let mut cfb = cfb::CompoundFile::create(writer)?;
        {
            let mut out = cfb.create_stream("/Workbook")?;
            out.write_all(&stream)?;
        }
        cfb.flush()?;
        Ok(())
    }

    /// Serialize a workbook into a BIFF8 `Workbook` stream.
    pub fn workbook_stream(workbook: &Workbook) -> XlsResult<Vec<u8>> {
        let mut sst = SharedStrings::default();

        // Sheets first so the SST is complete before the globals are laid out
        let mut substreams = Vec::with_capacity(workbook.sheet_count());
        for sheet in workbook.worksheets() {
            substreams.push(Self::write_sheet(sheet, &mut sst, substreams.is_empty())?);
        }

        let mut globals = RecordBuffer::new();
        globals.record(records::BOF, &Self::bof(records::BOF_WORKBOOK_GLOBALS))?;
        globals.record(records::CODEPAGE, &records::CODEPAGE_UTF16.to_le_bytes())?;
        globals.record(records::WINDOW1, &Self::window1(workbook.sheet_count()))?;
        for _ in 0..4 {
            globals.record(records::FONT, &Self::default_font())?;
        }
        for _ in 0..CELL_XF {
            globals.record(records::XF, &STYLE_XF)?;
        }
        globals.record(records::XF, &DEFAULT_CELL_XF)?;
        // Built-in "Normal" style bound to XF 0
        globals.record(records::STYLE, &[0x00, 0x80, 0x00, 0xFF])?;

        let mut ply_slots = Vec::with_capacity(workbook.sheet_count());
        for sheet in workbook.worksheets() {
            ply_slots.push(globals.position() + 4);
            let mut body = vec![0u8; 4];
            body.extend_from_slice(&[0x00, 0x00]); // visible worksheet
            body.extend(encode_short_string(sheet.name())?);
            globals.record(records::BOUNDSHEET, &body)?;
        }

        write_sst(&mut globals, sst.total_refs, &sst.strings)?;
        globals.record(records::EOF, &[])?;

        // Each BOUNDSHEET points at its sheet's BOF
        let mut offset = globals.position();
        for (slot, substream) in ply_slots.into_iter().zip(&substreams) {
            let ply_pos = u32::try_from(offset)
                .map_err(|_| XlsError::Unrepresentable("workbook stream exceeds 4 GiB".into()))?;
            globals.patch_u32(slot, ply_pos)?;
            offset += substream.position();
        }

        for substream in substreams {
            globals.append(substream);
        }
        globals.pad_to(MIN_STREAM_LEN);

        debug!(
            "wrote BIFF8 workbook: {} sheets, {} shared strings",
            workbook.sheet_count(),
            sst.strings.len()
        );
        Ok(globals.into_bytes())
    }

    fn write_sheet(
        sheet: &Worksheet,
        sst: &mut SharedStrings,
        selected: bool,
    ) -> XlsResult<RecordBuffer> {
        let mut out = RecordBuffer::new();
        out.record(records::BOF, &Self::bof(records::BOF_WORKSHEET))?;
        out.record(records::DIMENSION, &Self::dimensions(sheet)?)?;

        for row in sheet.row_indices() {
            Self::check_position(row, 0)?;
            let cols: Vec<u16> = sheet.iter_row(row).map(|(col, _)| col).collect();
            out.record(records::ROW, &Self::row_record(row, &cols))?;
        }

        for (row, col, cell) in sheet.iter_cells() {
            Self::check_position(row, col)?;
            Self::write_cell(&mut out, row as u16, col, &cell.value, sst)?;
        }

        out.record(records::WINDOW2, &Self::window2(selected))?;
        out.record(records::EOF, &[])?;
        Ok(out)
    }

    fn write_cell(
        out: &mut RecordBuffer,
        row: u16,
        col: u16,
        value: &CellValue,
        sst: &mut SharedStrings,
    ) -> XlsResult<()> {
        let mut body = Vec::with_capacity(14);
        body.extend_from_slice(&row.to_le_bytes());
        body.extend_from_slice(&col.to_le_bytes());
        body.extend_from_slice(&CELL_XF.to_le_bytes());

        let record_type = match value {
            CellValue::Empty => records::BLANK,
            CellValue::Text(s) => {
                body.extend_from_slice(&sst.intern(s.as_str())?.to_le_bytes());
                records::LABELSST
            }
            CellValue::Integer(i) => match Rk::from_integer(*i) {
                Some(Rk(rk)) => {
                    body.extend_from_slice(&rk.to_le_bytes());
                    records::RK
                }
                None => {
                    body.extend_from_slice(&(*i as f64).to_le_bytes());
                    records::NUMBER
                }
            },
            CellValue::Number(n) if n.is_finite() => {
                body.extend_from_slice(&n.to_le_bytes());
                records::NUMBER
            }
            CellValue::Number(n) => {
                warn!("cell ({row}, {col}): {n} cannot be stored, writing #NUM!");
                body.extend_from_slice(&[ERROR_NUM, 1]);
                records::BOOLERR
            }
            CellValue::Boolean(b) => {
                body.extend_from_slice(&[u8::from(*b), 0]);
                records::BOOLERR
            }
        };
        out.record(record_type, &body)
    }

    fn check_position(row: u32, col: u16) -> XlsResult<()> {
        if row >= MAX_ROWS || col >= MAX_COLS {
            return Err(XlsError::OutOfRange { row, col });
        }
        Ok(())
    }

    fn bof(substream: u16) -> [u8; 16] {
        let mut body = [0u8; 16];
        body[0..2].copy_from_slice(&records::BIFF8_VERSION.to_le_bytes());
        body[2..4].copy_from_slice(&substream.to_le_bytes());
        body[4..6].copy_from_slice(&0x0DBBu16.to_le_bytes()); // build
        body[6..8].copy_from_slice(&0x07CCu16.to_le_bytes()); // year
        body[12..16].copy_from_slice(&0x0000_0006u32.to_le_bytes()); // lowest BIFF version
        body
    }

    fn window1(sheet_count: usize) -> [u8; 18] {
        let mut body = [0u8; 18];
        body[4..6].copy_from_slice(&0x3A5Cu16.to_le_bytes()); // width
        body[6..8].copy_from_slice(&0x23BEu16.to_le_bytes()); // height
        body[8..10].copy_from_slice(&0x0038u16.to_le_bytes()); // scroll bars and tabs
        body[14..16].copy_from_slice(&(sheet_count.min(1) as u16).to_le_bytes()); // selected tabs
        body[16..18].copy_from_slice(&0x0258u16.to_le_bytes()); // tab ratio
        body
    }

    fn default_font() -> Vec<u8> {
        let mut body = Vec::with_capacity(22);
        body.extend_from_slice(&200u16.to_le_bytes()); // 10pt in twips
        body.extend_from_slice(&0u16.to_le_bytes()); // attributes
        body.extend_from_slice(&0x7FFFu16.to_le_bytes()); // automatic colour
        body.extend_from_slice(&400u16.to_le_bytes()); // normal weight
        body.extend_from_slice(&[0, 0, 0, 0, 0, 0]); // escapement, underline, family, charset
        body.push(5);
        body.push(0); // compressed
        body.extend_from_slice(b"Arial");
        body
    }

    fn dimensions(sheet: &Worksheet) -> XlsResult<[u8; 14]> {
        let mut body = [0u8; 14];
        if let Some(range) = sheet.used_range() {
            Self::check_position(range.end.row, range.end.col)?;
            body[0..4].copy_from_slice(&range.start.row.to_le_bytes());
            body[4..8].copy_from_slice(&(range.end.row + 1).to_le_bytes());
            body[8..10].copy_from_slice(&range.start.col.to_le_bytes());
            body[10..12].copy_from_slice(&(range.end.col + 1).to_le_bytes());
        }
        Ok(body)
    }

    fn row_record(row: u32, cols: &[u16]) -> [u8; 16] {
        let first = cols.first().copied().unwrap_or(0);
        let last_plus_one = cols.last().map_or(0, |c| c + 1);
        let mut body = [0u8; 16];
        body[0..2].copy_from_slice(&(row as u16).to_le_bytes());
        body[2..4].copy_from_slice(&first.to_le_bytes());
        body[4..6].copy_from_slice(&last_plus_one.to_le_bytes());
        body[6..8].copy_from_slice(&0x00FFu16.to_le_bytes()); // default height
        body[12..16].copy_from_slice(&0x000F_0100u32.to_le_bytes());
        body
    }

    fn window2(selected: bool) -> [u8; 18] {
        let flags: u16 = if selected { 0x06B6 } else { 0x00B6 };
        let mut body = [0u8; 18];
        body[0..2].copy_from_slice(&flags.to_le_bytes());
        body[6..8].copy_from_slice(&0x0040u16.to_le_bytes()); // gridline colour
        body
    }
}
