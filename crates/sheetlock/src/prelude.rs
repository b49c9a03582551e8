//! Prelude module - common imports for sheetlock users
//!
//! ```rust
//! use sheetlock::prelude::*;
//! ```

pub use crate::{
    CellAddress,
    CellHandle,
    CellValue,
    ContainerKind,
    EncryptedWorkbook,
    Error,
    Result,
    SessionState,
    Settings,
    // Model and plain I/O
    Workbook,
    Worksheet,
    XlsReader,
    XlsWriter,
    XlsxReader,
    XlsxWriter,
    DEFAULT_SETTINGS_PATH,
};
