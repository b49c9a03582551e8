//! XLS error types

use thiserror::Error;

/// Result type for XLS operations
pub type XlsResult<T> = std::result::Result<T, XlsError>;

/// Errors that can occur during XLS reading/writing
#[derive(Debug, Error)]
pub enum XlsError {
    /// IO error (also covers CFB errors which use std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format
    #[error("Invalid XLS format: {0}")]
    InvalidFormat(String),

    /// Unsupported version
    #[error("Unsupported XLS version: {0}")]
    UnsupportedVersion(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// The workbook stream still carries a FILEPASS record
    #[error("workbook stream is encrypted")]
    Encrypted,

    /// Content the BIFF8 format cannot hold
    #[error("cannot be written as XLS: {0}")]
    Unrepresentable(String),

    /// Cell outside the 65,536 x 256 BIFF8 grid
    #[error("cell (row {row}, col {col}) is outside the XLS grid")]
    OutOfRange { row: u32, col: u16 },

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] sheetlock_core::Error),
}
