//! Shared primitives: password encoding, hashing, AES and byte reading

use aes::cipher::{generic_array::GenericArray, BlockDecrypt};
use aes::{Aes128, Aes192, Aes256};
use cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Digest;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

pub(crate) const AES_BLOCK_LEN: usize = 16;

/// Encode a password the way Office hashes it: UTF-16LE, no terminator
pub(crate) fn password_utf16le(password: &str) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(password.len() * 2));
    for unit in password.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Constant-time equality. Slices of different lengths never match.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Truncate `bytes` to `len`, or extend it with `pad`
pub(crate) fn fit_to_len(bytes: &[u8], len: usize, pad: u8) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(bytes[..bytes.len().min(len)].to_vec());
    out.resize(len, pad);
    out
}

fn digest_chunks<D: Digest>(chunks: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    let mut hasher = D::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    Zeroizing::new(hasher.finalize().to_vec())
}

pub(crate) fn sha1(chunks: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    digest_chunks::<sha1::Sha1>(chunks)
}

pub(crate) fn md5(chunks: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    digest_chunks::<md5::Md5>(chunks)
}

/// Hash algorithms named by Agile `EncryptionInfo` descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub(crate) fn from_name(name: &str) -> CryptoResult<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SHA1" | "SHA-1" => Ok(HashAlgorithm::Sha1),
            "SHA256" | "SHA-256" => Ok(HashAlgorithm::Sha256),
            "SHA384" | "SHA-384" => Ok(HashAlgorithm::Sha384),
            "SHA512" | "SHA-512" => Ok(HashAlgorithm::Sha512),
            other => Err(CryptoError::Unsupported(format!("hash algorithm {other}"))),
        }
    }

    /// Digest size in bytes
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Hash the concatenation of `chunks`
    pub(crate) fn digest(self, chunks: &[&[u8]]) -> Zeroizing<Vec<u8>> {
        match self {
            HashAlgorithm::Sha1 => digest_chunks::<sha1::Sha1>(chunks),
            HashAlgorithm::Sha256 => digest_chunks::<sha2::Sha256>(chunks),
            HashAlgorithm::Sha384 => digest_chunks::<sha2::Sha384>(chunks),
            HashAlgorithm::Sha512 => digest_chunks::<sha2::Sha512>(chunks),
        }
    }

    pub(crate) fn hmac(self, key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
        let bad_key = |_| CryptoError::InvalidKeyLength { len: key.len() };
        let out = match self {
            HashAlgorithm::Sha1 => {
                let mut mac =
                    <Hmac<sha1::Sha1> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            HashAlgorithm::Sha256 => {
                let mut mac =
                    <Hmac<sha2::Sha256> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            HashAlgorithm::Sha384 => {
                let mut mac =
                    <Hmac<sha2::Sha384> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            HashAlgorithm::Sha512 => {
                let mut mac =
                    <Hmac<sha2::Sha512> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(out)
    }
}

/// AES-CBC decrypt without padding removal
pub(crate) fn aes_cbc_decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptoError::InvalidCiphertextLength {
            len: ciphertext.len(),
        });
    }

    if iv.len() != AES_BLOCK_LEN {
        return Err(CryptoError::InvalidIvLength { len: iv.len() });
    }

    let mut buf = ciphertext.to_vec();
    let bad_key = |_| CryptoError::InvalidKeyLength { len: key.len() };
    let unpad = |_| CryptoError::InvalidCiphertextLength {
        len: ciphertext.len(),
    };
    match key.len() {
        16 => {
            cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(unpad)?;
        }
        24 => {
            cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(unpad)?;
        }
        32 => {
            cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(unpad)?;
        }
        len => return Err(CryptoError::InvalidKeyLength { len }),
    }
    Ok(buf)
}

/// AES-ECB decrypt in place
pub(crate) fn aes_ecb_decrypt_in_place(key: &[u8], buf: &mut [u8]) -> CryptoResult<()> {
    if buf.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptoError::InvalidCiphertextLength { len: buf.len() });
    }

    use aes::cipher::KeyInit;

    fn decrypt_with<C: BlockDecrypt + KeyInit>(key: &[u8], buf: &mut [u8]) -> CryptoResult<()> {
        let cipher =
            C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength { len: key.len() })?;
        for block in buf.chunks_mut(AES_BLOCK_LEN) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    match key.len() {
        16 => decrypt_with::<Aes128>(key, buf),
        24 => decrypt_with::<Aes192>(key, buf),
        32 => decrypt_with::<Aes256>(key, buf),
        len => Err(CryptoError::InvalidKeyLength { len }),
    }
}

/// Little-endian cursor over a borrowed buffer
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub(crate) fn take(&mut self, n: usize, context: &'static str) -> CryptoResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(CryptoError::Truncated { context })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn read_u16(&mut self, context: &'static str) -> CryptoResult<u16> {
        let b = self.take(2, context)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u32(&mut self, context: &'static str) -> CryptoResult<u32> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u64(&mut self, context: &'static str) -> CryptoResult<u64> {
        let b = self.take(8, context)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }
}
