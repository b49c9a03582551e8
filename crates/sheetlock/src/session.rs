//! Encrypted workbook sessions
//!
//! An [`EncryptedWorkbook`] walks through a fixed lifecycle:
//!
//! ```text
//! Unopened -> Opening -> Open -> Saved
//!                   |       \--> ClosedWithoutSave
//!                   \--> FailedAuth | FailedIo
//! ```
//!
//! The decrypted model only exists while the session is `Open`.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use sheetlock_core::{CellValue, Workbook};
use sheetlock_xls::{XlsReader, XlsWriter};
use sheetlock_xlsx::{XlsxReader, XlsxWriter};

use crate::container::ContainerKind;
use crate::decrypt::decrypt;
use crate::error::{Error, Result};
use crate::settings::Settings;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unopened,
    Opening,
    Open,
    /// The password was wrong, the file was not encrypted, or decryption failed
    FailedAuth,
    /// The file could not be read or parsed
    FailedIo,
    Saved,
    ClosedWithoutSave,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Unopened => "unopened",
            SessionState::Opening => "being opened",
            SessionState::Open => "open",
            SessionState::FailedAuth => "locked after a failed password check",
            SessionState::FailedIo => "unreadable",
            SessionState::Saved => "saved",
            SessionState::ClosedWithoutSave => "closed",
        })
    }
}

/// A cell inside an open session, obtained from [`EncryptedWorkbook::get_cell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellHandle {
    sheet: usize,
    row: u32,
    col: u16,
}

impl CellHandle {
    pub fn sheet_index(&self) -> usize {
        self.sheet
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn col(&self) -> u16 {
        self.col
    }
}

/// The decrypted model together with where it came from
#[derive(Debug)]
struct OpenWorkbook {
    workbook: Workbook,
    path: PathBuf,
    kind: ContainerKind,
}

impl OpenWorkbook {
    fn load(path: &Path, password: &str) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let payload = decrypt(&raw, password)?;
        drop(raw);

        let workbook = match payload.kind {
            ContainerKind::ZipPackage => XlsxReader::read_bytes(&payload.bytes)?,
            ContainerKind::LegacyCompound => XlsReader::read_workbook_stream(&payload.bytes)?,
        };
        Ok(Self {
            workbook,
            path: path.to_path_buf(),
            kind: payload.kind,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(match self.kind {
            ContainerKind::ZipPackage => XlsxWriter::write_bytes(&self.workbook)?,
            ContainerKind::LegacyCompound => XlsWriter::write_bytes(&self.workbook)?,
        })
    }
}

/// A password-protected workbook opened for editing.
///
/// ```rust,no_run
/// use sheetlock::{CellValue, EncryptedWorkbook};
///
/// # fn main() -> sheetlock::Result<()> {
/// let mut book = EncryptedWorkbook::new();
/// book.open("report.xlsx", "secret123")?;
/// let cell = book.get_cell("Sheet1", 0, 0)?;
/// book.set_cell_value(cell, CellValue::Integer(7))?;
/// book.save()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EncryptedWorkbook {
    state: SessionState,
    inner: Option<OpenWorkbook>,
}

impl Default for EncryptedWorkbook {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptedWorkbook {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unopened,
            inner: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn open_workbook(&self, operation: &'static str) -> Result<&OpenWorkbook> {
        match (&self.state, &self.inner) {
            (SessionState::Open, Some(inner)) => Ok(inner),
            _ => Err(self.invalid(operation)),
        }
    }

    fn open_workbook_mut(&mut self, operation: &'static str) -> Result<&mut OpenWorkbook> {
        if self.state != SessionState::Open {
            return Err(self.invalid(operation));
        }
        let state = self.state;
        self.inner
            .as_mut()
            .ok_or(Error::InvalidState { operation, state })
    }

    /// Verify `password`, decrypt the file at `path` and parse it.
    ///
    /// Only valid on a fresh session. The file is never written by `open`.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, password: &str) -> Result<()> {
        if self.state != SessionState::Unopened {
            return Err(self.invalid("open"));
        }
        let path = path.as_ref();
        self.state = SessionState::Opening;
        debug!("opening {}", path.display());

        match OpenWorkbook::load(path, password) {
            Ok(inner) => {
                info!(
                    "opened {} ({}, {} sheets)",
                    path.display(),
                    inner.kind,
                    inner.workbook.sheet_count()
                );
                self.inner = Some(inner);
                self.state = SessionState::Open;
                Ok(())
            }
            Err(err) => {
                self.state = if err.is_auth_failure() {
                    SessionState::FailedAuth
                } else {
                    SessionState::FailedIo
                };
                debug!("open of {} failed: {err}", path.display());
                Err(err)
            }
        }
    }

    /// Open the workbook named by `settings`.
    pub fn open_with_settings(&mut self, settings: &Settings) -> Result<()> {
        self.open(settings.file_path(), settings.password())
    }

    /// Resolve a cell, creating its row and a blank cell when absent.
    ///
    /// Coordinates are zero-based and must fit the file format's grid.
    pub fn get_cell(&mut self, sheet: &str, row: u32, col: u16) -> Result<CellHandle> {
        let inner = self.open_workbook_mut("get a cell from")?;
        let index = inner.workbook.require_sheet(sheet)?;

        let (max_rows, max_cols) = inner.kind.limits();
        if row >= max_rows || col >= max_cols {
            return Err(Error::Structure(format!(
                "cell (row {row}, col {col}) is outside the {max_rows} x {max_cols} grid of {}",
                inner.kind.extension()
            )));
        }

        let worksheet = inner
            .workbook
            .worksheet_mut(index)
            .ok_or_else(|| Error::SheetNotFound(sheet.to_string()))?;
        worksheet.cell_or_blank_at(row, col)?;
        Ok(CellHandle {
            sheet: index,
            row,
            col,
        })
    }

    /// Store `value` in the cell behind `handle`. `Empty` is stored as empty text.
    pub fn set_cell_value(&mut self, handle: CellHandle, value: CellValue) -> Result<()> {
        let inner = self.open_workbook_mut("set a cell in")?;
        let value = match value {
            CellValue::Empty => CellValue::text(""),
            v @ (CellValue::Text(_)
            | CellValue::Number(_)
            | CellValue::Integer(_)
            | CellValue::Boolean(_)) => v,
        };
        let worksheet = inner
            .workbook
            .worksheet_mut(handle.sheet)
            .ok_or_else(|| Error::Structure(format!("no sheet at index {}", handle.sheet)))?;
        worksheet.set_cell_value_at(handle.row, handle.col, value)?;
        Ok(())
    }

    /// Current value of the cell behind `handle`.
    pub fn cell_value(&self, handle: CellHandle) -> Result<CellValue> {
        let inner = self.open_workbook("read a cell from")?;
        let worksheet = inner
            .workbook
            .worksheet(handle.sheet)
            .ok_or_else(|| Error::Structure(format!("no sheet at index {}", handle.sheet)))?;
        Ok(worksheet.get_value_at(handle.row, handle.col))
    }

    pub fn sheet_names(&self) -> Result<Vec<&str>> {
        Ok(self.open_workbook("list the sheets of")?.workbook.sheet_names())
    }

    /// Payload format of the open workbook
    pub fn kind(&self) -> Option<ContainerKind> {
        self.inner.as_ref().map(|inner| inner.kind)
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.as_ref().map(|inner| inner.path.as_path())
    }

    /// Write the workbook back over the file it was opened from.
    ///
    /// The file is written **without encryption**. On failure the session
    /// stays open and nothing is released.
    pub fn save(&mut self) -> Result<()> {
        let inner = self.open_workbook("save")?;
        let bytes = inner.serialize()?;
        warn!(
            "saving {} without encryption; the password no longer protects it",
            inner.path.display()
        );
        std::fs::write(&inner.path, &bytes)?;
        info!("saved {} ({} bytes)", inner.path.display(), bytes.len());

        self.inner = None;
        self.state = SessionState::Saved;
        Ok(())
    }

    /// Release the workbook without writing it.
    pub fn close(&mut self) {
        if self.state == SessionState::Open {
            self.inner = None;
            self.state = SessionState::ClosedWithoutSave;
            debug!("closed without saving");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_rejects_cell_access() {
        let mut book = EncryptedWorkbook::new();
        assert_eq!(book.state(), SessionState::Unopened);
        assert!(matches!(
            book.get_cell("Sheet1", 0, 0),
            Err(Error::InvalidState {
                operation: "get a cell from",
                state: SessionState::Unopened
            })
        ));
        assert!(matches!(book.save(), Err(Error::InvalidState { .. })));
        assert!(book.kind().is_none());
        assert!(book.path().is_none());
    }

    #[test]
    fn close_is_a_no_op_before_open() {
        let mut book = EncryptedWorkbook::default();
        book.close();
        assert_eq!(book.state(), SessionState::Unopened);
    }

    #[test]
    fn missing_file_fails_with_io() {
        let dir = tempfile::tempdir().unwrap();
        let mut book = EncryptedWorkbook::new();
        let err = book.open(dir.path().join("absent.xlsx"), "pw").unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
        assert_eq!(book.state(), SessionState::FailedIo);

        assert!(matches!(
            book.open(dir.path().join("absent.xlsx"), "pw"),
            Err(Error::InvalidState { operation: "open", .. })
        ));
    }

    #[test]
    fn short_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.xls");
        std::fs::write(&path, b"PK").unwrap();

        let mut book = EncryptedWorkbook::new();
        assert!(matches!(
            book.open(&path, "pw"),
            Err(Error::UnreadableFile(_))
        ));
        assert_eq!(book.state(), SessionState::FailedIo);
    }
}
