//! Container format detection
//!
//! Excel files come in two envelopes: a zip package (`.xlsx`) or an OLE
//! compound file (`.xls`, and every encrypted `.xlsx`). The first four bytes
//! are enough to tell them apart.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use log::debug;

use crate::error::{Error, Result};

/// Local file header signature that opens every zip package
pub const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// Compound file signature (first four bytes)
pub const CFB_MAGIC: [u8; 4] = [0xD0, 0xCF, 0x11, 0xE0];

/// The envelope or payload format of a workbook file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// OLE compound file holding BIFF8 streams or encrypted package streams
    LegacyCompound,
    /// SpreadsheetML zip package
    ZipPackage,
}

impl ContainerKind {
    /// Usual file extension for this kind
    pub fn extension(self) -> &'static str {
        match self {
            ContainerKind::LegacyCompound => "xls",
            ContainerKind::ZipPackage => "xlsx",
        }
    }

    /// Grid limits as (rows, columns)
    pub fn limits(self) -> (u32, u16) {
        match self {
            ContainerKind::LegacyCompound => (sheetlock_xls::MAX_ROWS, sheetlock_xls::MAX_COLS),
            ContainerKind::ZipPackage => (sheetlock_core::MAX_ROWS, sheetlock_core::MAX_COLS),
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::LegacyCompound => f.write_str("compound file"),
            ContainerKind::ZipPackage => f.write_str("zip package"),
        }
    }
}

/// Classify a prefix of at least four bytes.
fn classify(prefix: &[u8; 4]) -> ContainerKind {
    if *prefix == ZIP_MAGIC {
        ContainerKind::ZipPackage
    } else {
        if *prefix != CFB_MAGIC {
            debug!("unknown signature {prefix:02X?}, treating as compound file");
        }
        ContainerKind::LegacyCompound
    }
}

fn short_file() -> Error {
    Error::UnreadableFile("file is shorter than 4 bytes".to_string())
}

/// Detect the container kind from the first four bytes of `reader`.
///
/// The stream is rewound to offset 0 before returning, whether or not
/// detection succeeds.
pub fn detect_container<R: Read + Seek>(reader: &mut R) -> Result<ContainerKind> {
    reader.seek(SeekFrom::Start(0))?;
    let mut prefix = [0u8; 4];
    let mut filled = 0usize;
    let read = loop {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                filled += n;
                if filled == prefix.len() {
                    break Ok(());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => break Err(e),
        }
    };
    reader.seek(SeekFrom::Start(0))?;
    read?;

    if filled < prefix.len() {
        return Err(short_file());
    }
    let kind = classify(&prefix);
    debug!("detected {kind}");
    Ok(kind)
}

/// In-memory form of [`detect_container`].
pub fn detect_container_bytes(bytes: &[u8]) -> Result<ContainerKind> {
    let prefix: &[u8; 4] = bytes
        .get(..4)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(short_file)?;
    Ok(classify(prefix))
}
