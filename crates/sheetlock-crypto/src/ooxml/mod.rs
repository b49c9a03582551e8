//! Decryption of password-protected OOXML packages
//!
//! Excel stores an encrypted `.xlsx` as a compound file holding two streams:
//! `EncryptionInfo` (the key descriptor) and `EncryptedPackage` (the
//! encrypted zip). The descriptor begins with a version pair that selects
//! the scheme.

pub mod agile;
pub mod standard;

use log::debug;

use crate::error::{CryptoError, CryptoResult};
use crate::util::ByteReader;

pub use agile::AgileEncryptionInfo;
pub use standard::StandardEncryptionInfo;

/// Name of the descriptor stream
pub const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";

/// Name of the encrypted payload stream
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";

/// A parsed `EncryptionInfo` stream
#[derive(Debug, Clone)]
pub enum EncryptionInfo {
    /// Version 4.4, XML descriptor
    Agile(AgileEncryptionInfo),
    /// Version 2.2, 3.2 or 4.2, binary descriptor
    Standard(StandardEncryptionInfo),
}

/// Options for [`decrypt_encrypted_package_with`]
#[derive(Debug, Clone)]
pub struct DecryptOptions {
    /// Check the Agile `dataIntegrity` HMAC (default: true)
    pub verify_integrity: bool,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            verify_integrity: true,
        }
    }
}

/// Parse an `EncryptionInfo` stream
pub fn parse_encryption_info(bytes: &[u8]) -> CryptoResult<EncryptionInfo> {
    let mut r = ByteReader::new(bytes);
    let major = r.read_u16("EncryptionVersionInfo.major")?;
    let minor = r.read_u16("EncryptionVersionInfo.minor")?;
    debug!("EncryptionInfo version {major}.{minor}");

    match (major, minor) {
        (4, 4) => {
            let _reserved = r.read_u32("EncryptionInfo.reserved")?;
            Ok(EncryptionInfo::Agile(agile::parse_agile_descriptor(
                r.remaining(),
            )?))
        }
        (2..=4, 2) => Ok(EncryptionInfo::Standard(
            standard::parse_standard_descriptor(r.remaining())?,
        )),
        _ => Err(CryptoError::UnsupportedVersion { major, minor }),
    }
}

/// Verify `password` and decrypt the `EncryptedPackage` stream into the
/// plain zip bytes
pub fn decrypt_encrypted_package(
    encryption_info: &[u8],
    encrypted_package: &[u8],
    password: &str,
) -> CryptoResult<Vec<u8>> {
    decrypt_encrypted_package_with(
        encryption_info,
        encrypted_package,
        password,
        &DecryptOptions::default(),
    )
}

/// [`decrypt_encrypted_package`] with explicit options
pub fn decrypt_encrypted_package_with(
    encryption_info: &[u8],
    encrypted_package: &[u8],
    password: &str,
    options: &DecryptOptions,
) -> CryptoResult<Vec<u8>> {
    match parse_encryption_info(encryption_info)? {
        EncryptionInfo::Agile(info) => {
            agile::decrypt_package(&info, encrypted_package, password, options)
        }
        EncryptionInfo::Standard(info) => {
            standard::decrypt_package(&info, encrypted_package, password)
        }
    }
}
