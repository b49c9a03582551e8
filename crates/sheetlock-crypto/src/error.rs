//! Error types for sheetlock-crypto

use thiserror::Error;

/// Result type for decryption operations
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// Errors raised while verifying a password or decrypting a stream.
///
/// [`CryptoError::InvalidPassword`] is the only variant caused by the
/// supplied password. Every other variant describes malformed or
/// unsupported encryption metadata.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The password did not pass the verifier check
    #[error("invalid password")]
    InvalidPassword,

    /// Not enough bytes to parse the requested structure
    #[error("truncated data while reading {context}")]
    Truncated { context: &'static str },

    /// Structurally invalid encryption metadata
    #[error("invalid encryption info: {0}")]
    InvalidEncryptionInfo(String),

    /// `EncryptionInfo` version we cannot decrypt
    #[error("unsupported EncryptionInfo version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    /// Cipher, hash or scheme we cannot decrypt
    #[error("unsupported encryption: {0}")]
    Unsupported(String),

    /// Key length does not match any supported cipher
    #[error("invalid key length {len}")]
    InvalidKeyLength { len: usize },

    /// Initialization vector is not one cipher block long
    #[error("invalid IV length {len}")]
    InvalidIvLength { len: usize },

    /// Ciphertext is not a whole number of cipher blocks
    #[error("ciphertext length {len} is not a multiple of the block size")]
    InvalidCiphertextLength { len: usize },

    /// `dataIntegrity` HMAC did not match the package
    #[error("encrypted package failed integrity check")]
    IntegrityMismatch,

    /// Base64 attribute in the Agile descriptor failed to decode
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The Agile XML descriptor is not well-formed
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl CryptoError {
    /// Whether this error means "wrong password" rather than "bad file"
    pub fn is_invalid_password(&self) -> bool {
        matches!(self, CryptoError::InvalidPassword)
    }

    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        CryptoError::InvalidEncryptionInfo(msg.into())
    }
}
