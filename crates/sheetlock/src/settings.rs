//! Settings file loading
//!
//! Settings live in a small properties-style file:
//!
//! ```text
//! # workbook to open
//! file_path = ./data/report.xlsx
//! password: secret123
//! ```
//!
//! `key=value` and `key: value` are both accepted. Lines starting with `#`,
//! `!` or `;` are comments, `[section]` headers are ignored and the last
//! occurrence of a key wins.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use zeroize::Zeroizing;

/// Where the CLI looks for settings when none are given
pub const DEFAULT_SETTINGS_PATH: &str = "./config.ini";

const KEY_FILE_PATH: &str = "file_path";
const KEY_PASSWORD: &str = "password";

/// Errors raised while loading settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required key is absent
    #[error("missing key `{0}`")]
    MissingKey(&'static str),
}

/// The workbook to open and its password.
#[derive(Clone)]
pub struct Settings {
    file_path: PathBuf,
    password: Zeroizing<String>,
}

impl Settings {
    pub fn new<P: Into<PathBuf>>(file_path: P, password: &str) -> Self {
        Self {
            file_path: file_path.into(),
            password: Zeroizing::new(password.to_string()),
        }
    }

    /// Read and parse a settings file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = Zeroizing::new(std::fs::read_to_string(path).map_err(|source| {
            SettingsError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?);
        text.parse()
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

/// Split a line at the first `=` or `:`. A bare key has an empty value.
fn split_entry(line: &str) -> (&str, &str) {
    match line.find(['=', ':']) {
        Some(at) => (line[..at].trim(), line[at + 1..].trim()),
        None => (line, ""),
    }
}

impl FromStr for Settings {
    type Err = SettingsError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut file_path = None;
        let mut password = None;

        for line in text.lines().map(str::trim) {
            if line.is_empty()
                || line.starts_with(['#', '!', ';'])
                || (line.starts_with('[') && line.ends_with(']'))
            {
                continue;
            }
            match split_entry(line) {
                (KEY_FILE_PATH, value) => file_path = Some(PathBuf::from(value)),
                (KEY_PASSWORD, value) => password = Some(Zeroizing::new(value.to_string())),
                _ => {}
            }
        }

        Ok(Self {
            file_path: file_path.ok_or(SettingsError::MissingKey(KEY_FILE_PATH))?,
            password: password.ok_or(SettingsError::MissingKey(KEY_PASSWORD))?,
        })
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("file_path", &self.file_path)
            .field("password", &"<redacted>")
            .finish()
    }
}
