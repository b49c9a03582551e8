//! Standard encryption (`EncryptionInfo` version 2.2, 3.2 or 4.2)
//!
//! A binary `EncryptionHeader` plus `EncryptionVerifier`, AES-ECB over the
//! whole package and a SHA-1 key derived with 50,000 rounds.

use log::debug;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::util::{aes_ecb_decrypt_in_place, ct_eq, password_utf16le, sha1, ByteReader, AES_BLOCK_LEN};

pub(crate) const CALG_RC4: u32 = 0x6801;
pub(crate) const CALG_AES_128: u32 = 0x660E;
pub(crate) const CALG_AES_192: u32 = 0x660F;
pub(crate) const CALG_AES_256: u32 = 0x6610;
pub(crate) const CALG_SHA1: u32 = 0x8004;

const SPIN_COUNT: u32 = 50_000;
const SHA1_LEN: usize = 20;

/// Fixed fields of an `EncryptionHeader`. The trailing CSP name is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionHeader {
    pub flags: u32,
    pub alg_id: u32,
    pub alg_id_hash: u32,
    pub key_size_bits: u32,
}

impl EncryptionHeader {
    pub(crate) fn parse(bytes: &[u8]) -> CryptoResult<Self> {
        let mut r = ByteReader::new(bytes);
        let flags = r.read_u32("EncryptionHeader.flags")?;
        let _size_extra = r.read_u32("EncryptionHeader.sizeExtra")?;
        let alg_id = r.read_u32("EncryptionHeader.algID")?;
        let alg_id_hash = r.read_u32("EncryptionHeader.algIDHash")?;
        let key_size_bits = r.read_u32("EncryptionHeader.keySize")?;
        Ok(Self {
            flags,
            alg_id,
            alg_id_hash,
            key_size_bits,
        })
    }
}

/// An `EncryptionVerifier`: salt plus the encrypted verifier pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionVerifier {
    pub salt: Vec<u8>,
    pub encrypted_verifier: Vec<u8>,
    pub verifier_hash_size: u32,
    pub encrypted_verifier_hash: Vec<u8>,
}

impl EncryptionVerifier {
    /// Read a verifier whose encrypted hash occupies `hash_len` bytes, or
    /// `verifierHashSize` bytes when `hash_len` is `None`
    pub(crate) fn read(r: &mut ByteReader<'_>, hash_len: Option<usize>) -> CryptoResult<Self> {
        let salt_size = r.read_u32("EncryptionVerifier.saltSize")? as usize;
        if salt_size != 16 {
            return Err(CryptoError::invalid(format!(
                "verifier salt must be 16 bytes, got {salt_size}"
            )));
        }
        let salt = r.take(salt_size, "EncryptionVerifier.salt")?.to_vec();
        let encrypted_verifier = r.take(16, "EncryptionVerifier.encryptedVerifier")?.to_vec();
        let verifier_hash_size = r.read_u32("EncryptionVerifier.verifierHashSize")?;
        let hash_len = hash_len.unwrap_or(verifier_hash_size as usize);
        let encrypted_verifier_hash = r
            .take(hash_len, "EncryptionVerifier.encryptedVerifierHash")?
            .to_vec();
        Ok(Self {
            salt,
            encrypted_verifier,
            verifier_hash_size,
            encrypted_verifier_hash,
        })
    }
}

/// Parsed Standard descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEncryptionInfo {
    pub header: EncryptionHeader,
    pub verifier: EncryptionVerifier,
}

impl StandardEncryptionInfo {
    fn key_len(&self) -> usize {
        self.header.key_size_bits as usize / 8
    }
}

/// Parse the body that follows the version field (flags onwards)
pub fn parse_standard_descriptor(body: &[u8]) -> CryptoResult<StandardEncryptionInfo> {
    let mut r = ByteReader::new(body);
    let _flags = r.read_u32("EncryptionInfo.flags")?;
    let header_size = r.read_u32("EncryptionInfo.headerSize")? as usize;
    let header = EncryptionHeader::parse(r.take(header_size, "EncryptionHeader")?)?;

    let expected_bits = match header.alg_id {
        CALG_AES_128 => 128,
        CALG_AES_192 => 192,
        CALG_AES_256 => 256,
        CALG_RC4 => {
            return Err(CryptoError::Unsupported(
                "RC4 Standard encryption of an OOXML package".to_string(),
            ))
        }
        other => return Err(CryptoError::Unsupported(format!("algorithm 0x{other:04X}"))),
    };
    if header.key_size_bits != expected_bits {
        return Err(CryptoError::invalid(format!(
            "key size {} does not match algorithm 0x{:04X}",
            header.key_size_bits, header.alg_id
        )));
    }
    if header.alg_id_hash != CALG_SHA1 && header.alg_id_hash != 0 {
        return Err(CryptoError::Unsupported(format!(
            "hash algorithm 0x{:04X}",
            header.alg_id_hash
        )));
    }

    // SHA-1 hash padded to the AES block size
    let verifier = EncryptionVerifier::read(&mut r, Some(32))?;
    Ok(StandardEncryptionInfo { header, verifier })
}

/// Derive the AES key for `password`
pub fn derive_key(info: &StandardEncryptionInfo, password: &str) -> Zeroizing<Vec<u8>> {
    let pw = password_utf16le(password);
    let mut h = sha1(&[&info.verifier.salt[..], &pw[..]]);
    for i in 0..SPIN_COUNT {
        h = sha1(&[&i.to_le_bytes()[..], &h[..]]);
    }
    let hfinal = sha1(&[&h[..], &0u32.to_le_bytes()[..]]);

    let mut buf1 = Zeroizing::new([0x36u8; 64]);
    let mut buf2 = Zeroizing::new([0x5Cu8; 64]);
    for i in 0..SHA1_LEN {
        buf1[i] ^= hfinal[i];
        buf2[i] ^= hfinal[i];
    }
    let x1 = sha1(&[&buf1[..]]);
    let x2 = sha1(&[&buf2[..]]);

    let mut key = Zeroizing::new(Vec::with_capacity(SHA1_LEN * 2));
    key.extend_from_slice(&x1);
    key.extend_from_slice(&x2);
    key.truncate(info.key_len());
    key
}

/// Check a derived key against the verifier
pub fn verify_key(info: &StandardEncryptionInfo, key: &[u8]) -> CryptoResult<()> {
    let mut verifier = Zeroizing::new(info.verifier.encrypted_verifier.clone());
    aes_ecb_decrypt_in_place(key, &mut verifier)?;
    let mut verifier_hash = Zeroizing::new(info.verifier.encrypted_verifier_hash.clone());
    aes_ecb_decrypt_in_place(key, &mut verifier_hash)?;

    let digest = sha1(&[&verifier[..]]);
    let expected = verifier_hash
        .get(..SHA1_LEN)
        .ok_or_else(|| CryptoError::invalid("verifier hash is shorter than SHA-1"))?;
    if ct_eq(&digest, expected) {
        Ok(())
    } else {
        Err(CryptoError::InvalidPassword)
    }
}

/// Verify the password and decrypt a Standard `EncryptedPackage` stream
pub fn decrypt_package(info: &StandardEncryptionInfo, package: &[u8], password: &str) -> CryptoResult<Vec<u8>> {
    let key = derive_key(info, password);
    verify_key(info, &key)?;
    debug!("standard password verified ({} bit AES)", info.header.key_size_bits);

    let mut r = ByteReader::new(package);
    let size = r.read_u64("EncryptedPackage size")?;
    let size = usize::try_from(size)
        .map_err(|_| CryptoError::invalid(format!("package size {size} is too large")))?;
    let ciphertext = r.remaining();
    if size > ciphertext.len() {
        return Err(CryptoError::Truncated {
            context: "EncryptedPackage data",
        });
    }

    // Trailing bytes past the last whole block are padding from the writer
    let usable = ciphertext.len() - ciphertext.len() % AES_BLOCK_LEN;
    if size > usable {
        return Err(CryptoError::InvalidCiphertextLength {
            len: ciphertext.len(),
        });
    }
    let mut out = ciphertext[..usable].to_vec();
    aes_ecb_decrypt_in_place(&key, &mut out)?;
    out.truncate(size);
    Ok(out)
}
