//! # sheetlock-xlsx
//!
//! Values-only XLSX (Office Open XML) reader and writer for sheetlock.
//!
//! The reader keeps cell values and discards styles, formulas (their cached
//! results are kept), comments and drawings. The writer produces a minimal
//! SpreadsheetML package that Excel and LibreOffice open without repair.

pub mod error;
pub mod reader;
pub mod writer;

pub use error::{XlsxError, XlsxResult};
pub use reader::XlsxReader;
pub use writer::XlsxWriter;
