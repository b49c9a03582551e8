//! XLSX reader

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{XlsxError, XlsxResult};
use sheetlock_core::{CellAddress, CellValue, Workbook, Worksheet};

/// Decode Excel's `_xHHHH_` escape sequences in strings.
///
/// Excel uses this format to encode special characters in XML:
/// - `_x000d_` = CR (carriage return)
/// - `_x000a_` = LF (line feed)
/// - `_x0009_` = Tab
/// - `_x005f_` = Underscore (escaped underscore)
pub(crate) fn decode_excel_escapes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '_' {
            result.push(c);
            continue;
        }

        let mut hex_chars = String::new();
        let mut is_escape = false;
        let mut saw_x = false;
        let mut saw_closing = false;

        if chars.peek() == Some(&'x') {
            chars.next();
            saw_x = true;

            for _ in 0..4 {
                match chars.peek() {
                    Some(&ch) if ch.is_ascii_hexdigit() => {
                        hex_chars.push(ch);
                        chars.next();
                    }
                    _ => break,
                }
            }

            if hex_chars.len() == 4 && chars.peek() == Some(&'_') {
                chars.next();
                saw_closing = true;
                if let Some(decoded) =
                    u32::from_str_radix(&hex_chars, 16).ok().and_then(char::from_u32)
                {
                    result.push(decoded);
                    is_escape = true;
                }
            }
        }

        if !is_escape {
            // Not an escape sequence, output what we consumed
            result.push('_');
            if saw_x {
                result.push('x');
            }
            result.push_str(&hex_chars);
            if saw_closing {
                result.push('_');
            }
        }
    }

    result
}

/// Parse the numeric text of a `<v>` element.
///
/// Text without a fraction or exponent that fits an `i64` is an integer.
pub(crate) fn parse_number(text: &str) -> Option<CellValue> {
    let text = text.trim();
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(i) = text.parse::<i64>() {
            return Some(CellValue::Integer(i));
        }
    }
    text.parse::<f64>().ok().map(CellValue::Number)
}

/// XLSX file reader
pub struct XlsxReader;

impl XlsxReader {
    /// Read a workbook from a file path
    pub fn read_file<P: AsRef<Path>>(path: P) -> XlsxResult<Workbook> {
        let file = File::open(path)?;
        Self::read(BufReader::new(file))
    }

    /// Read a workbook from an in-memory package
    pub fn read_bytes(bytes: &[u8]) -> XlsxResult<Workbook> {
        Self::read(Cursor::new(bytes))
    }

    /// Read a workbook from a reader
    pub fn read<R: Read + Seek>(reader: R) -> XlsxResult<Workbook> {
        let mut archive = zip::ZipArchive::new(reader)?;

        // Verify this is an XLSX file
        if archive.by_name("[Content_Types].xml").is_err() {
            return Err(XlsxError::InvalidFormat(
                "Missing [Content_Types].xml".into(),
            ));
        }

        let shared_strings = Self::read_shared_strings(&mut archive)?;
        let sheet_info = Self::read_workbook_xml(&mut archive)?;
        let sheet_paths = Self::read_workbook_rels(&mut archive)?;

        let mut workbook = Workbook::empty();

        for (name, r_id) in &sheet_info {
            let Some(path) = sheet_paths.get(r_id) else {
                warn!("sheet {name:?} has no worksheet relationship, skipping");
                continue;
            };
            let sheet_idx = workbook.add_worksheet_with_name(name)?;
            let worksheet = workbook
                .worksheet_mut(sheet_idx)
                .ok_or_else(|| XlsxError::InvalidFormat(format!("sheet {name:?} vanished")))?;
            Self::read_worksheet(&mut archive, path, worksheet, &shared_strings)?;
        }

        // Ensure at least one sheet exists
        if workbook.is_empty() {
            workbook.add_worksheet_with_name("Sheet1")?;
        }

        debug!(
            "read xlsx package: {} sheets, {} shared strings",
            workbook.sheet_count(),
            shared_strings.len()
        );
        Ok(workbook)
    }

    /// Read the shared strings table
    fn read_shared_strings<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
    ) -> XlsxResult<Vec<String>> {
        let mut strings = Vec::new();

        let file = match archive.by_name("xl/sharedStrings.xml") {
            Ok(f) => f,
            Err(_) => return Ok(strings), // No shared strings is valid
        };

        let mut xml_reader = Reader::from_reader(BufReader::new(file));

        let mut buf = Vec::new();
        let mut current_string = String::new();
        let mut in_si = false;
        let mut in_t = false;
        // Phonetic runs repeat the text in another script
        let mut in_rph = false;

        loop {
            match xml_reader.read_event_into(&mut buf)? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"si" => {
                        in_si = true;
                        current_string.clear();
                    }
                    b"rPh" => in_rph = true,
                    b"t" if in_si && !in_rph => in_t = true,
                    _ => {}
                },
                Event::Empty(e) if e.local_name().as_ref() == b"si" => {
                    strings.push(String::new());
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"si" => {
                        strings.push(decode_excel_escapes(&current_string));
                        current_string.clear();
                        in_si = false;
                    }
                    b"rPh" => in_rph = false,
                    b"t" => in_t = false,
                    _ => {}
                },
                Event::Text(e) if in_t => {
                    current_string.push_str(&e.unescape()?);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(strings)
    }

    /// Read workbook.xml to get sheet names and rIds
    fn read_workbook_xml<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
    ) -> XlsxResult<Vec<(String, String)>> {
        let file = archive
            .by_name("xl/workbook.xml")
            .map_err(|_| XlsxError::MissingPart("xl/workbook.xml".into()))?;

        let mut xml_reader = Reader::from_reader(BufReader::new(file));
        xml_reader.trim_text(true);

        let mut buf = Vec::new();
        let mut sheets = Vec::new();

        loop {
            match xml_reader.read_event_into(&mut buf)? {
                Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"sheet" => {
                    let mut name = None;
                    let mut r_id = None;

                    for attr in e.attributes().flatten() {
                        match attr.key.local_name().as_ref() {
                            b"name" => name = Some(attr.unescape_value()?.into_owned()),
                            b"id" => r_id = Some(attr.unescape_value()?.into_owned()),
                            _ => {}
                        }
                    }

                    if let (Some(name), Some(r_id)) = (name, r_id) {
                        sheets.push((name, r_id));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(sheets)
    }

    /// Read workbook.xml.rels to get sheet file paths
    fn read_workbook_rels<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
    ) -> XlsxResult<HashMap<String, String>> {
        let file = archive
            .by_name("xl/_rels/workbook.xml.rels")
            .map_err(|_| XlsxError::MissingPart("xl/_rels/workbook.xml.rels".into()))?;

        let mut xml_reader = Reader::from_reader(BufReader::new(file));
        xml_reader.trim_text(true);

        let mut buf = Vec::new();
        let mut rels = HashMap::new();

        loop {
            match xml_reader.read_event_into(&mut buf)? {
                Event::Empty(e) | Event::Start(e)
                    if e.local_name().as_ref() == b"Relationship" =>
                {
                    let mut id = None;
                    let mut target = None;
                    let mut rel_type = None;

                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"Id" => id = Some(attr.unescape_value()?.into_owned()),
                            b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                            b"Type" => rel_type = Some(attr.unescape_value()?.into_owned()),
                            _ => {}
                        }
                    }

                    // Only include worksheet relationships
                    if let (Some(id), Some(target), Some(rel_type)) = (id, target, rel_type) {
                        if rel_type.ends_with("/worksheet") {
                            rels.insert(id, resolve_part_path(&target));
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(rels)
    }

    /// Read the values of a worksheet part
    fn read_worksheet<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
        path: &str,
        worksheet: &mut Worksheet,
        shared_strings: &[String],
    ) -> XlsxResult<()> {
        let file = archive
            .by_name(path)
            .map_err(|_| XlsxError::MissingPart(path.to_string()))?;

        let mut xml_reader = Reader::from_reader(BufReader::new(file));

        let mut buf = Vec::new();
        let mut cell = PendingCell::default();
        let mut current_row: Option<u32> = None;
        let mut next_col: u16 = 0;
        let mut in_cell = false;
        let mut in_value = false;
        let mut in_inline_str = false;
        let mut in_inline_text = false;
        let mut formulas = 0usize;

        loop {
            match xml_reader.read_event_into(&mut buf)? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"row" => {
                        current_row = Self::start_row(&e, current_row, worksheet)?;
                        next_col = 0;
                    }
                    b"c" => {
                        in_cell = true;
                        cell = PendingCell::from_attrs(&e, current_row, next_col)?;
                    }
                    b"v" if in_cell => in_value = true,
                    b"f" if in_cell => cell.has_formula = true,
                    b"is" if in_cell => in_inline_str = true,
                    b"t" if in_inline_str => in_inline_text = true,
                    _ => {}
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"row" => {
                        current_row = Self::start_row(&e, current_row, worksheet)?;
                        next_col = 0;
                    }
                    b"c" => {
                        let blank = PendingCell::from_attrs(&e, current_row, next_col)?;
                        next_col = blank.col.saturating_add(1);
                        worksheet.cell_or_blank_at(blank.row, blank.col)?;
                    }
                    b"f" if in_cell => cell.has_formula = true,
                    _ => {}
                },
                Event::Text(e) => {
                    if in_value {
                        cell.value.push_str(&e.unescape()?);
                    } else if in_inline_text {
                        cell.inline.push_str(&e.unescape()?);
                    }
                }
                Event::CData(e) if in_inline_text => {
                    cell.inline.push_str(&String::from_utf8_lossy(&e));
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"v" => in_value = false,
                    b"t" => in_inline_text = false,
                    b"is" => in_inline_str = false,
                    b"c" => {
                        in_cell = false;
                        if cell.has_formula {
                            formulas += 1;
                        }
                        next_col = cell.col.saturating_add(1);
                        Self::process_cell(worksheet, &cell, shared_strings)?;
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if formulas > 0 {
            warn!(
                "sheet {:?}: {formulas} formulas replaced by their cached values",
                worksheet.name()
            );
        }
        Ok(())
    }

    /// Allocate a `<row>` and return its zero-based index
    fn start_row(
        e: &BytesStart<'_>,
        previous: Option<u32>,
        worksheet: &mut Worksheet,
    ) -> XlsxResult<Option<u32>> {
        let mut row = previous.map_or(0, |r| r + 1);
        for attr in e.attributes().flatten() {
            if attr.key.as_ref() == b"r" {
                let value = attr.unescape_value()?;
                let r: u32 = value
                    .parse()
                    .map_err(|_| XlsxError::Parse(format!("Invalid row number: {value}")))?;
                row = r.saturating_sub(1); // 1-based to 0-based
            }
        }
        worksheet.ensure_row(row)?;
        Ok(Some(row))
    }

    /// Store a parsed cell in the worksheet
    fn process_cell(
        worksheet: &mut Worksheet,
        cell: &PendingCell,
        shared_strings: &[String],
    ) -> XlsxResult<()> {
        let value = cell.value.as_str();
        let cell_value = match cell.cell_type.as_deref() {
            // Inline string - decode Excel escape sequences
            Some("inlineStr") if !cell.inline.is_empty() || value.is_empty() => {
                CellValue::text(decode_excel_escapes(&cell.inline))
            }
            _ if value.is_empty() => {
                worksheet.cell_or_blank_at(cell.row, cell.col)?;
                return Ok(());
            }

            // Shared string
            Some("s") => {
                let idx: usize = value.trim().parse().map_err(|_| {
                    XlsxError::Parse(format!("Invalid shared string index: {}", value))
                })?;
                let s = shared_strings.get(idx).ok_or_else(|| {
                    XlsxError::Parse(format!("Shared string index {} out of bounds", idx))
                })?;
                CellValue::text(s)
            }

            // Boolean
            Some("b") => CellValue::Boolean(value == "1" || value.eq_ignore_ascii_case("true")),

            // Strings, errors and ISO dates are kept as text
            Some("str") | Some("inlineStr") | Some("e") | Some("d") => {
                CellValue::text(decode_excel_escapes(value))
            }

            // Number (default type or explicit "n")
            None | Some("n") => {
                parse_number(value).unwrap_or_else(|| CellValue::text(value))
            }

            // Unknown type - treat as string
            Some(_) => CellValue::text(value),
        };

        worksheet.set_cell_value_at(cell.row, cell.col, cell_value)?;
        Ok(())
    }
}

/// A `<c>` element collected between its start and end tags
#[derive(Debug, Default)]
struct PendingCell {
    row: u32,
    col: u16,
    cell_type: Option<String>,
    value: String,
    inline: String,
    has_formula: bool,
}

impl PendingCell {
    fn from_attrs(e: &BytesStart<'_>, row: Option<u32>, next_col: u16) -> XlsxResult<Self> {
        let mut cell = PendingCell {
            row: row.unwrap_or(0),
            col: next_col,
            ..Default::default()
        };
        for attr in e.attributes().flatten() {
            match attr.key.as_ref() {
                b"r" => {
                    let cell_ref = attr.unescape_value()?;
                    let addr = CellAddress::parse(&cell_ref).map_err(|e| {
                        XlsxError::Parse(format!("Invalid cell reference '{}': {}", cell_ref, e))
                    })?;
                    cell.row = addr.row;
                    cell.col = addr.col;
                }
                b"t" => cell.cell_type = Some(attr.unescape_value()?.into_owned()),
                _ => {}
            }
        }
        Ok(cell)
    }
}

/// Resolve a relationship target against the `xl/` folder
fn resolve_part_path(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts: Vec<&str> = vec!["xl"];
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}
