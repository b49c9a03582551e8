//! Decryption dispatch
//!
//! An encrypted workbook is always a compound file. Which streams it holds
//! decides the scheme:
//!
//! - `EncryptionInfo` + `EncryptedPackage`: an ECMA-376 encrypted `.xlsx`
//!   whose plaintext is a zip package
//! - `Workbook` (or `Book`) starting with a `FILEPASS` record: an RC4
//!   encrypted `.xls` whose plaintext is the BIFF8 workbook stream

use std::io::{Cursor, Read, Seek};

use cfb::CompoundFile;
use log::debug;
use sheetlock_crypto::{
    decrypt_encrypted_package, decrypt_workbook_stream, has_filepass, ENCRYPTED_PACKAGE_STREAM,
    ENCRYPTION_INFO_STREAM,
};
use sheetlock_xls::XlsReader;

use crate::container::{detect_container_bytes, ContainerKind, ZIP_MAGIC};
use crate::error::{Error, Result};

/// Plaintext recovered from an encrypted file.
///
/// For [`ContainerKind::ZipPackage`] the bytes are a complete zip package.
/// For [`ContainerKind::LegacyCompound`] they are the decrypted BIFF8
/// workbook stream, ready for [`XlsReader::read_workbook_stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedPayload {
    pub kind: ContainerKind,
    pub bytes: Vec<u8>,
}

fn read_stream<F: Read + Seek>(cfb: &mut CompoundFile<F>, name: &str) -> Result<Vec<u8>> {
    let mut stream = cfb.open_stream(format!("/{name}"))?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Verify `password` against a raw file and decrypt its payload.
pub fn decrypt(raw: &[u8], password: &str) -> Result<DecryptedPayload> {
    if detect_container_bytes(raw)? == ContainerKind::ZipPackage {
        debug!("zip envelope, no encryption layer");
        return Err(Error::NotEncrypted);
    }

    let mut cfb = CompoundFile::open(Cursor::new(raw))
        .map_err(|e| Error::UnreadableFile(format!("not a compound file: {e}")))?;

    let info_path = format!("/{ENCRYPTION_INFO_STREAM}");
    let package_path = format!("/{ENCRYPTED_PACKAGE_STREAM}");
    if cfb.is_stream(&info_path) && cfb.is_stream(&package_path) {
        debug!("found {ENCRYPTION_INFO_STREAM} and {ENCRYPTED_PACKAGE_STREAM} streams");
        let info = read_stream(&mut cfb, ENCRYPTION_INFO_STREAM)?;
        let package = read_stream(&mut cfb, ENCRYPTED_PACKAGE_STREAM)?;
        let bytes = decrypt_encrypted_package(&info, &package, password)?;
        if !bytes.starts_with(&ZIP_MAGIC) {
            return Err(Error::CryptoError(
                "decrypted package is not a zip archive".to_string(),
            ));
        }
        return Ok(DecryptedPayload {
            kind: ContainerKind::ZipPackage,
            bytes,
        });
    }

    let mut stream = match XlsReader::workbook_stream(&mut cfb) {
        Ok(stream) => stream,
        Err(e) => {
            debug!("no encrypted package and no workbook stream: {e}");
            return Err(Error::UnreadableFile(
                "compound file holds no workbook".to_string(),
            ));
        }
    };
    if !has_filepass(&stream) {
        debug!("workbook stream has no FILEPASS record");
        return Err(Error::NotEncrypted);
    }
    debug!("decrypting {} byte workbook stream", stream.len());
    decrypt_workbook_stream(&mut stream, password)?;
    Ok(DecryptedPayload {
        kind: ContainerKind::LegacyCompound,
        bytes: stream,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn compound_with(streams: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cfb = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        for (name, data) in streams {
            let mut stream = cfb.create_stream(format!("/{name}")).unwrap();
            stream.write_all(data).unwrap();
        }
        cfb.flush().unwrap();
        cfb.into_inner().into_inner()
    }

    #[test]
    fn zip_envelope_is_not_encrypted() {
        let err = decrypt(b"PK\x03\x04\x14\x00", "pw").unwrap_err();
        assert!(matches!(err, Error::NotEncrypted));
    }

    #[test]
    fn garbage_is_unreadable() {
        let err = decrypt(&[0x42; 600], "pw").unwrap_err();
        assert!(matches!(err, Error::UnreadableFile(_)), "{err:?}");
    }

    #[test]
    fn compound_without_workbook_is_unreadable() {
        let raw = compound_with(&[("Other", b"data")]);
        let err = decrypt(&raw, "pw").unwrap_err();
        assert!(matches!(err, Error::UnreadableFile(_)), "{err:?}");
    }

    #[test]
    fn plain_workbook_stream_is_not_encrypted() {
        let stream = sheetlock_xls::XlsWriter::workbook_stream(&sheetlock_core::Workbook::new())
            .unwrap();
        let raw = compound_with(&[("Workbook", &stream)]);
        let err = decrypt(&raw, "pw").unwrap_err();
        assert!(matches!(err, Error::NotEncrypted));
    }
}
