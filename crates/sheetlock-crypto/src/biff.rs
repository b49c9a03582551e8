//! RC4 decryption of BIFF8 workbook streams
//!
//! A password-protected `.xls` keeps its `Workbook` stream inside the
//! compound file and marks it with a `FILEPASS` record in the globals
//! substream. Every record after `FILEPASS` has its payload encrypted with
//! an RC4 keystream that is rekeyed every 1024 bytes of *stream* offset.
//! Record headers are never encrypted but still consume keystream.
//!
//! Two RC4 flavours exist:
//!
//! - RC4 Standard (`vMajor` 1): MD5 based, 40-bit intermediate key
//! - RC4 CryptoAPI (`vMajor` 2, 3 or 4 with `vMinor` 2): SHA-1 based,
//!   described by an `EncryptionHeader` and `EncryptionVerifier`
//!
//! XOR obfuscation (`wEncryptionType` 0) is recognised but not supported.

use log::debug;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::ooxml::standard::{EncryptionHeader, EncryptionVerifier, CALG_RC4, CALG_SHA1};
use crate::rc4::Rc4;
use crate::util::{ct_eq, md5, password_utf16le, sha1, ByteReader};

/// `FILEPASS` record id
pub const RECORD_FILEPASS: u16 = 0x002F;

const RECORD_BOF: u16 = 0x0809;
const RECORD_EOF: u16 = 0x000A;
const RECORD_INTERFACEHDR: u16 = 0x00E1;
const RECORD_RRDHEAD: u16 = 0x0138;
const RECORD_USREXCL: u16 = 0x0194;
const RECORD_FILELOCK: u16 = 0x0195;
const RECORD_RRDINFO: u16 = 0x0196;
const RECORD_BOUNDSHEET: u16 = 0x0085;

/// Id written over `FILEPASS` once the stream is decrypted
pub const RECORD_MASKED: u16 = 0xFFFF;

const ENCRYPTION_TYPE_XOR: u16 = 0x0000;
const ENCRYPTION_TYPE_RC4: u16 = 0x0001;

/// Bytes of stream covered by one RC4 key
pub const RC4_BLOCK_LEN: usize = 1024;

/// Parsed `FILEPASS` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePass {
    /// XOR obfuscation
    Xor { key: u16, verification: u16 },
    /// RC4 with MD5 key derivation
    Rc4Standard {
        salt: [u8; 16],
        encrypted_verifier: [u8; 16],
        encrypted_verifier_hash: [u8; 16],
    },
    /// RC4 with a CryptoAPI descriptor
    Rc4CryptoApi {
        header: EncryptionHeader,
        verifier: EncryptionVerifier,
    },
}

fn array16(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(bytes);
    out
}

/// Parse a `FILEPASS` record payload
pub fn parse_filepass(payload: &[u8]) -> CryptoResult<FilePass> {
    let mut r = ByteReader::new(payload);
    match r.read_u16("FILEPASS.wEncryptionType")? {
        ENCRYPTION_TYPE_XOR => Ok(FilePass::Xor {
            key: r.read_u16("FILEPASS.key")?,
            verification: r.read_u16("FILEPASS.verificationBytes")?,
        }),
        ENCRYPTION_TYPE_RC4 => {
            let major = r.read_u16("FILEPASS.vMajor")?;
            let minor = r.read_u16("FILEPASS.vMinor")?;
            match (major, minor) {
                (1, 1) => Ok(FilePass::Rc4Standard {
                    salt: array16(r.take(16, "FILEPASS.salt")?),
                    encrypted_verifier: array16(r.take(16, "FILEPASS.encryptedVerifier")?),
                    encrypted_verifier_hash: array16(
                        r.take(16, "FILEPASS.encryptedVerifierHash")?,
                    ),
                }),
                (2..=4, 2) => {
                    let _flags = r.read_u32("FILEPASS.flags")?;
                    let header_size = r.read_u32("FILEPASS.headerSize")? as usize;
                    let header = EncryptionHeader::parse(r.take(header_size, "EncryptionHeader")?)?;
                    let verifier = EncryptionVerifier::read(&mut r, None)?;
                    Ok(FilePass::Rc4CryptoApi { header, verifier })
                }
                (major, minor) => Err(CryptoError::UnsupportedVersion { major, minor }),
            }
        }
        other => Err(CryptoError::Unsupported(format!(
            "FILEPASS encryption type 0x{other:04X}"
        ))),
    }
}

/// Location of a `FILEPASS` record within a workbook stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePassRecord {
    /// Offset of the record header
    pub offset: usize,
    /// Payload length
    pub len: usize,
}

/// Scan the globals substream for `FILEPASS`. Stops at the first `EOF`.
pub fn find_filepass(stream: &[u8]) -> Option<FilePassRecord> {
    let mut pos = 0usize;
    while pos + 4 <= stream.len() {
        let id = u16::from_le_bytes([stream[pos], stream[pos + 1]]);
        let len = u16::from_le_bytes([stream[pos + 2], stream[pos + 3]]) as usize;
        match id {
            RECORD_FILEPASS => return Some(FilePassRecord { offset: pos, len }),
            RECORD_EOF => return None,
            _ => pos += 4 + len,
        }
    }
    None
}

/// Whether the workbook stream declares encryption
pub fn has_filepass(stream: &[u8]) -> bool {
    find_filepass(stream).is_some()
}

/// Records that stay plaintext even after `FILEPASS`
fn is_never_encrypted(id: u16) -> bool {
    matches!(
        id,
        RECORD_BOF
            | RECORD_FILEPASS
            | RECORD_INTERFACEHDR
            | RECORD_RRDHEAD
            | RECORD_USREXCL
            | RECORD_FILELOCK
            | RECORD_RRDINFO
    )
}

/// Key material that yields one RC4 key per 1024-byte block
enum BlockKeys {
    Standard { material: Zeroizing<Vec<u8>> },
    CryptoApi { material: Zeroizing<Vec<u8>>, key_len: usize },
}

impl BlockKeys {
    fn block_key(&self, block: u32) -> Zeroizing<Vec<u8>> {
        let block = block.to_le_bytes();
        match self {
            BlockKeys::Standard { material } => md5(&[&material[..], &block[..]]),
            BlockKeys::CryptoApi { material, key_len } => {
                let digest = sha1(&[&material[..], &block[..]]);
                let mut key = Zeroizing::new(digest[..*key_len].to_vec());
                // 40-bit keys are used as 16-byte keys with zero padding
                if *key_len == 5 {
                    key.resize(16, 0);
                }
                key
            }
        }
    }

    fn cipher(&self, block: u32) -> Rc4 {
        Rc4::new(&self.block_key(block))
    }

    /// XOR keystream into `data`, which sits at `offset` in the stream
    fn apply_at(&self, data: &mut [u8], offset: usize) -> CryptoResult<()> {
        let mut stream_pos = offset;
        let mut done = 0usize;
        while done < data.len() {
            let block = u32::try_from(stream_pos / RC4_BLOCK_LEN)
                .map_err(|_| CryptoError::invalid("workbook stream is too large"))?;
            let in_block = stream_pos % RC4_BLOCK_LEN;
            let take = (data.len() - done).min(RC4_BLOCK_LEN - in_block);

            let mut rc4 = self.cipher(block);
            rc4.discard(in_block);
            rc4.apply_keystream(&mut data[done..done + take]);

            stream_pos += take;
            done += take;
        }
        Ok(())
    }
}

fn rc4_standard_keys(password: &str, salt: &[u8; 16]) -> BlockKeys {
    let pw = password_utf16le(password);
    let h0 = md5(&[&pw[..]]);
    let mut buf = Zeroizing::new(Vec::with_capacity(16 * (5 + salt.len())));
    for _ in 0..16 {
        buf.extend_from_slice(&h0[..5]);
        buf.extend_from_slice(salt);
    }
    let h1 = md5(&[&buf[..]]);
    BlockKeys::Standard {
        material: Zeroizing::new(h1[..5].to_vec()),
    }
}

fn rc4_cryptoapi_keys(password: &str, header: &EncryptionHeader, salt: &[u8]) -> CryptoResult<BlockKeys> {
    if header.alg_id != CALG_RC4 && header.alg_id != 0 {
        return Err(CryptoError::Unsupported(format!(
            "FILEPASS algorithm 0x{:04X}",
            header.alg_id
        )));
    }
    if header.alg_id_hash != CALG_SHA1 && header.alg_id_hash != 0 {
        return Err(CryptoError::Unsupported(format!(
            "FILEPASS hash algorithm 0x{:04X}",
            header.alg_id_hash
        )));
    }
    let bits = match header.key_size_bits {
        0 => 40,
        bits => bits,
    };
    if bits % 8 != 0 || !(40..=128).contains(&bits) {
        return Err(CryptoError::InvalidKeyLength {
            len: bits as usize / 8,
        });
    }

    let pw = password_utf16le(password);
    Ok(BlockKeys::CryptoApi {
        material: sha1(&[salt, &pw[..]]),
        key_len: bits as usize / 8,
    })
}

/// Decrypt the verifier pair with the block 0 key and compare
fn check_verifier(keys: &BlockKeys, verifier: &[u8], verifier_hash: &[u8], hash_len: usize) -> CryptoResult<()> {
    let mut rc4 = keys.cipher(0);
    let mut verifier = Zeroizing::new(verifier.to_vec());
    rc4.apply_keystream(&mut verifier);
    let mut verifier_hash = Zeroizing::new(verifier_hash.to_vec());
    rc4.apply_keystream(&mut verifier_hash);

    let digest = match keys {
        BlockKeys::Standard { .. } => md5(&[&verifier[..]]),
        BlockKeys::CryptoApi { .. } => sha1(&[&verifier[..]]),
    };
    let expected = verifier_hash
        .get(..hash_len)
        .ok_or_else(|| CryptoError::invalid("verifier hash is truncated"))?;
    if ct_eq(&digest[..hash_len.min(digest.len())], expected) {
        Ok(())
    } else {
        Err(CryptoError::InvalidPassword)
    }
}

fn verify_password(filepass: &FilePass, password: &str) -> CryptoResult<BlockKeys> {
    match filepass {
        FilePass::Xor { .. } => Err(CryptoError::Unsupported(
            "XOR obfuscated workbooks".to_string(),
        )),
        FilePass::Rc4Standard {
            salt,
            encrypted_verifier,
            encrypted_verifier_hash,
        } => {
            let keys = rc4_standard_keys(password, salt);
            check_verifier(&keys, encrypted_verifier, encrypted_verifier_hash, 16)?;
            debug!("RC4 standard password verified");
            Ok(keys)
        }
        FilePass::Rc4CryptoApi { header, verifier } => {
            let keys = rc4_cryptoapi_keys(password, header, &verifier.salt)?;
            check_verifier(
                &keys,
                &verifier.encrypted_verifier,
                &verifier.encrypted_verifier_hash,
                20,
            )?;
            debug!("RC4 CryptoAPI password verified ({} bit)", header.key_size_bits);
            Ok(keys)
        }
    }
}

/// Verify `password` and decrypt a BIFF8 workbook stream in place.
///
/// On success every record after `FILEPASS` holds plaintext and the
/// `FILEPASS` id is replaced with [`RECORD_MASKED`], so record offsets such
/// as `BOUNDSHEET.lbPlyPos` stay valid. On failure the buffer is untouched.
pub fn decrypt_workbook_stream(stream: &mut [u8], password: &str) -> CryptoResult<()> {
    let record = find_filepass(stream)
        .ok_or_else(|| CryptoError::invalid("workbook stream has no FILEPASS record"))?;
    let payload_start = record.offset + 4;
    let payload_end = payload_start + record.len;
    let payload = stream.get(payload_start..payload_end).ok_or(CryptoError::Truncated {
        context: "FILEPASS payload",
    })?;
    let filepass = parse_filepass(payload)?;
    let keys = verify_password(&filepass, password)?;

    let mut pos = payload_end;
    let mut records = 0usize;
    while pos + 4 <= stream.len() {
        let id = u16::from_le_bytes([stream[pos], stream[pos + 1]]);
        let len = u16::from_le_bytes([stream[pos + 2], stream[pos + 3]]) as usize;
        let data_start = pos + 4;
        let data_end = (data_start + len).min(stream.len());

        if !is_never_encrypted(id) {
            // BOUNDSHEET keeps its stream offset in the clear
            let skip = if id == RECORD_BOUNDSHEET { 4 } else { 0 };
            let from = (data_start + skip).min(data_end);
            keys.apply_at(&mut stream[from..data_end], from)?;
        }
        records += 1;
        pos = data_start + len;
    }

    stream[record.offset..record.offset + 2].copy_from_slice(&RECORD_MASKED.to_le_bytes());
    debug!("decrypted {records} records after FILEPASS");
    Ok(())
}
