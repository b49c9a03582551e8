use pretty_assertions::assert_eq;
use sheetlock_core::{CellValue, Workbook};
use sheetlock_xls::{XlsReader, XlsWriter};

fn sample_workbook() -> Workbook {
    let mut workbook = Workbook::empty();
    let first = workbook.add_worksheet_with_name("Sheet1").unwrap();
    let second = workbook.add_worksheet_with_name("Ünïcode ✓").unwrap();

    let ws = workbook.worksheet_mut(first).unwrap();
    ws.set_cell_value("A1", "x").unwrap();
    ws.set_cell_value("B1", 3.14).unwrap();
    ws.set_cell_value("C1", 42).unwrap();
    ws.set_cell_value("D1", true).unwrap();
    ws.set_cell_value("E1", "").unwrap();
    ws.set_cell_value("F1", 3.0).unwrap();
    ws.set_cell_value("G1", i64::from(i32::MAX) * 4).unwrap();
    ws.set_cell_value("A2", "x").unwrap();
    ws.cell_or_blank_at(1, 1).unwrap();
    ws.ensure_row(20).unwrap();
    ws.set_cell_value_at(65_535, 255, "corner").unwrap();

    let ws = workbook.worksheet_mut(second).unwrap();
    ws.set_cell_value("C3", "multi\nline 日本語").unwrap();

    workbook
}

#[test]
fn values_survive_write_and_read() {
    let bytes = XlsWriter::write_bytes(&sample_workbook()).unwrap();
    let workbook = XlsReader::read(std::io::Cursor::new(bytes)).unwrap();

    assert_eq!(workbook.sheet_names(), vec!["Sheet1", "Ünïcode ✓"]);

    let ws = workbook.worksheet(0).unwrap();
    assert_eq!(ws.get_value("A1").unwrap(), CellValue::text("x"));
    assert_eq!(ws.get_value("B1").unwrap(), CellValue::Number(3.14));
    assert_eq!(ws.get_value("C1").unwrap(), CellValue::Integer(42));
    assert_eq!(ws.get_value("D1").unwrap(), CellValue::Boolean(true));
    assert_eq!(ws.get_value("E1").unwrap(), CellValue::text(""));
    assert_eq!(ws.get_value("F1").unwrap(), CellValue::Number(3.0));
    assert_eq!(
        ws.get_value("G1").unwrap(),
        CellValue::Number((i64::from(i32::MAX) * 4) as f64)
    );
    assert_eq!(ws.get_value("A2").unwrap(), CellValue::text("x"));
    assert_eq!(ws.get_value_at(65_535, 255), CellValue::text("corner"));

    let ws = workbook.worksheet(1).unwrap();
    assert_eq!(ws.get_value("C3").unwrap(), CellValue::text("multi\nline 日本語"));
}

#[test]
fn blank_cells_and_empty_rows_survive() {
    let bytes = XlsWriter::write_bytes(&sample_workbook()).unwrap();
    let workbook = XlsReader::read(std::io::Cursor::new(bytes)).unwrap();

    let ws = workbook.worksheet(0).unwrap();
    assert!(ws.cell_at(1, 1).unwrap().is_blank());
    assert!(ws.has_row(20));
    assert!(!ws.has_row(19));
}

#[test]
fn many_strings_roundtrip_through_continue_records() {
    let mut workbook = Workbook::new();
    let ws = workbook.worksheet_mut(0).unwrap();
    let texts: Vec<String> = (0..2_000).map(|i| format!("value number {i} ∑")).collect();
    for (row, text) in texts.iter().enumerate() {
        ws.set_cell_value_at(row as u32, 0, text.as_str()).unwrap();
    }

    let bytes = XlsWriter::write_bytes(&workbook).unwrap();
    let workbook = XlsReader::read(std::io::Cursor::new(bytes)).unwrap();
    let ws = workbook.worksheet(0).unwrap();
    for (row, text) in texts.iter().enumerate() {
        assert_eq!(ws.get_value_at(row as u32, 0), CellValue::text(text));
    }
}

#[test]
fn write_file_replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.xls");
    std::fs::write(&path, vec![0xAB; 100_000]).unwrap();

    XlsWriter::write_file(&sample_workbook(), &path).unwrap();

    let workbook = XlsReader::read_file(&path).unwrap();
    assert_eq!(workbook.sheet_count(), 2);
}
