//! # sheetlock-xls
//!
//! XLS (BIFF8) reader and writer for sheetlock.
//!
//! This crate handles the legacy Excel binary format (.xls). Only cell
//! values are read and written.

pub mod biff;
pub mod error;
pub mod reader;
pub mod writer;

pub use error::{XlsError, XlsResult};
pub use reader::XlsReader;
pub use writer::XlsWriter;

/// Rows in a BIFF8 worksheet.
pub const MAX_ROWS: u32 = 65_536;

/// Columns in a BIFF8 worksheet.
pub const MAX_COLS: u16 = 256;
