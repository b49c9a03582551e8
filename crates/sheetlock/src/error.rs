//! Error taxonomy for encrypted workbook sessions

use thiserror::Error;

use sheetlock_crypto::CryptoError;
use sheetlock_xls::XlsError;
use sheetlock_xlsx::XlsxError;

use crate::session::SessionState;
use crate::settings::SettingsError;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while opening, editing or saving a workbook.
///
/// The password never appears in any message.
#[derive(Debug, Error)]
pub enum Error {
    /// The envelope is neither a zip package nor a readable compound file
    #[error("unreadable file: {0}")]
    UnreadableFile(String),

    /// The file carries no password protection
    #[error("file is not encrypted")]
    NotEncrypted,

    /// The password does not match the stored verifier
    #[error("incorrect password")]
    PasswordError,

    /// The encryption scheme is unsupported or its data is malformed
    #[error("decryption failed: {0}")]
    CryptoError(String),

    /// No worksheet has the requested name
    #[error("sheet not found: {0}")]
    SheetNotFound(String),

    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The decrypted workbook could not be parsed or serialized
    #[error("workbook structure error: {0}")]
    Structure(String),

    /// The settings file is missing or incomplete
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    /// The operation is not allowed in the session's current state
    #[error("cannot {operation} a workbook that is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl Error {
    /// Whether the failure concerns the password or the encryption itself,
    /// as opposed to reading the file.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::PasswordError | Error::CryptoError(_) | Error::NotEncrypted
        )
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        if err.is_invalid_password() {
            Error::PasswordError
        } else {
            Error::CryptoError(err.to_string())
        }
    }
}

impl From<XlsxError> for Error {
    fn from(err: XlsxError) -> Self {
        match err {
            XlsxError::Core(core) => core.into(),
            other => Error::Structure(other.to_string()),
        }
    }
}

impl From<XlsError> for Error {
    fn from(err: XlsError) -> Self {
        match err {
            XlsError::Core(core) => core.into(),
            other => Error::Structure(other.to_string()),
        }
    }
}

impl From<sheetlock_core::Error> for Error {
    fn from(err: sheetlock_core::Error) -> Self {
        match err {
            sheetlock_core::Error::SheetNotFound(name) => Error::SheetNotFound(name),
            other => Error::Structure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_password_maps_to_password_error() {
        let err: Error = CryptoError::InvalidPassword.into();
        assert!(matches!(err, Error::PasswordError));
        assert!(err.is_auth_failure());
    }

    #[test]
    fn unsupported_scheme_maps_to_crypto_error() {
        let err: Error = CryptoError::Unsupported("XOR obfuscated workbooks".into()).into();
        match err {
            Error::CryptoError(msg) => assert!(msg.contains("XOR")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reader_errors_map_to_structure() {
        let err: Error = XlsError::Parse("bad SST".into()).into();
        assert!(matches!(err, Error::Structure(_)));
        assert!(!err.is_auth_failure());

        let err: Error = XlsxError::MissingPart("xl/workbook.xml".into()).into();
        assert!(matches!(err, Error::Structure(_)));
    }

    #[test]
    fn core_sheet_lookup_keeps_the_name() {
        let err: Error = sheetlock_core::Error::SheetNotFound("Data".into()).into();
        match err {
            Error::SheetNotFound(name) => assert_eq!(name, "Data"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_state_names_operation_and_state() {
        let err = Error::InvalidState {
            operation: "save",
            state: SessionState::Saved,
        };
        assert_eq!(err.to_string(), "cannot save a workbook that is saved");
    }
}
