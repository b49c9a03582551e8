//! # sheetlock
//!
//! Open password-protected Excel workbooks, edit cell values and save them.
//!
//! ## Features
//!
//! - Detects the container (zip package or OLE compound file)
//! - Verifies the password before any payload is decrypted
//! - ECMA-376 Agile and Standard encryption for `.xlsx`
//! - RC4 and RC4 CryptoAPI `FILEPASS` encryption for `.xls`
//! - Values-only editing through [`EncryptedWorkbook`]
//! - Settings from a small ini / properties file
//!
//! Saving writes the workbook back **unencrypted** over the original file.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sheetlock::prelude::*;
//!
//! # fn main() -> sheetlock::Result<()> {
//! let settings = Settings::load(DEFAULT_SETTINGS_PATH)?;
//!
//! let mut book = EncryptedWorkbook::new();
//! book.open_with_settings(&settings)?;
//!
//! let cell = book.get_cell("Sheet1", 0, 0)?;
//! book.set_cell_value(cell, CellValue::text("hello"))?;
//! book.save()?;
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod decrypt;
pub mod error;
pub mod prelude;
pub mod session;
pub mod settings;

pub use container::{detect_container, detect_container_bytes, ContainerKind};
pub use decrypt::{decrypt, DecryptedPayload};
pub use error::{Error, Result};
pub use session::{CellHandle, EncryptedWorkbook, SessionState};
pub use settings::{Settings, SettingsError, DEFAULT_SETTINGS_PATH};

// Re-export the model and the plain readers/writers
pub use sheetlock_core::{CellAddress, CellValue, Workbook, Worksheet};
pub use sheetlock_xls::{XlsReader, XlsWriter};
pub use sheetlock_xlsx::{XlsxReader, XlsxWriter};
