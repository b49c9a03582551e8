//! # sheetlock-crypto
//!
//! Password verification and decryption for Office spreadsheets.
//!
//! - [`ooxml`] - Agile and Standard encryption of `.xlsx` packages stored
//!   in the `EncryptionInfo` / `EncryptedPackage` streams of a compound file
//! - [`biff`] - RC4 encryption of legacy `.xls` workbook streams, signalled
//!   by a `FILEPASS` record
//!
//! Both entry points check the password against the stored verifier before
//! touching any payload, and report a wrong password as
//! [`CryptoError::InvalidPassword`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use sheetlock_crypto::{decrypt_encrypted_package, CryptoError};
//!
//! # fn streams() -> (Vec<u8>, Vec<u8>) { unimplemented!() }
//! let (info, package) = streams();
//! match decrypt_encrypted_package(&info, &package, "secret") {
//!     Ok(zip_bytes) => println!("{} bytes of xlsx", zip_bytes.len()),
//!     Err(CryptoError::InvalidPassword) => eprintln!("wrong password"),
//!     Err(e) => eprintln!("cannot decrypt: {e}"),
//! }
//! ```

pub mod biff;
pub mod error;
pub mod ooxml;

mod rc4;
mod util;

pub use biff::{decrypt_workbook_stream, has_filepass, FilePass};
pub use error::{CryptoError, CryptoResult};
pub use ooxml::{
    decrypt_encrypted_package, decrypt_encrypted_package_with, parse_encryption_info,
    DecryptOptions, EncryptionInfo, ENCRYPTED_PACKAGE_STREAM, ENCRYPTION_INFO_STREAM,
};
pub use util::HashAlgorithm;
