//! Agile encryption (`EncryptionInfo` version 4.4)
//!
//! The descriptor is an XML document naming a key-data cipher, a
//! `dataIntegrity` HMAC and one or more key encryptors. Only the password
//! key encryptor is supported.
//!
//! Password verification derives an iterated hash
//! `H = Hash(salt || password)`, then `H = Hash(LE32(i) || H)` for
//! `spinCount` rounds, and uses it to unwrap the verifier pair and the
//! package key.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zeroize::Zeroizing;

use super::DecryptOptions;
use crate::error::{CryptoError, CryptoResult};
use crate::util::{
    aes_cbc_decrypt, ct_eq, fit_to_len, password_utf16le, ByteReader, HashAlgorithm, AES_BLOCK_LEN,
};

const VERIFIER_HASH_INPUT_BLOCK: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
const VERIFIER_HASH_VALUE_BLOCK: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
const KEY_VALUE_BLOCK: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];
const HMAC_KEY_BLOCK: [u8; 8] = [0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6];
const HMAC_VALUE_BLOCK: [u8; 8] = [0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33];

const VERIFIER_HASH_INPUT_LEN: usize = 16;

/// Ciphertext segment size of the `EncryptedPackage` stream
pub(crate) const SEGMENT_LEN: usize = 4096;

/// Upper bound on `spinCount`. Office writes 100,000.
const MAX_SPIN_COUNT: u32 = 10_000_000;

/// `<keyData>`: parameters of the package cipher
#[derive(Debug, Clone)]
pub struct KeyData {
    pub salt: Vec<u8>,
    pub hash_algorithm: HashAlgorithm,
    pub block_size: usize,
    pub key_bits: usize,
}

/// `<dataIntegrity>`: wrapped HMAC key and value
#[derive(Debug, Clone)]
pub struct DataIntegrity {
    pub encrypted_hmac_key: Vec<u8>,
    pub encrypted_hmac_value: Vec<u8>,
}

/// `<p:encryptedKey>`: the password key encryptor
#[derive(Debug, Clone)]
pub struct PasswordKeyEncryptor {
    pub spin_count: u32,
    pub salt: Vec<u8>,
    pub hash_algorithm: HashAlgorithm,
    pub block_size: usize,
    pub key_bits: usize,
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
    pub encrypted_key_value: Vec<u8>,
}

/// Parsed Agile descriptor
#[derive(Debug, Clone)]
pub struct AgileEncryptionInfo {
    pub key_data: KeyData,
    pub data_integrity: Option<DataIntegrity>,
    pub key_encryptor: PasswordKeyEncryptor,
}

/// Decode a base64 attribute, ignoring embedded whitespace and missing padding
fn decode_b64(value: &str) -> CryptoResult<Vec<u8>> {
    let mut cleaned: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    while cleaned.len() % 4 != 0 {
        cleaned.push('=');
    }
    Ok(STANDARD.decode(cleaned.as_bytes())?)
}

fn parse_usize(value: &str, name: &str) -> CryptoResult<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| CryptoError::invalid(format!("{name} is not a number: {value:?}")))
}

/// Collect an element's attributes keyed by local name
fn attributes<'a>(e: &'a BytesStart<'a>) -> CryptoResult<Vec<(String, Cow<'a, str>)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        out.push((key, attr.unescape_value()?));
    }
    Ok(out)
}

fn required<'a>(attrs: &'a [(String, Cow<'_, str>)], element: &str, name: &str) -> CryptoResult<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_ref())
        .ok_or_else(|| CryptoError::invalid(format!("missing {element}.{name}")))
}

fn check_cipher(attrs: &[(String, Cow<'_, str>)], element: &str) -> CryptoResult<()> {
    let cipher = required(attrs, element, "cipherAlgorithm")?;
    if !cipher.eq_ignore_ascii_case("AES") {
        return Err(CryptoError::Unsupported(format!("cipher {cipher}")));
    }
    let chaining = required(attrs, element, "cipherChaining")?;
    if chaining != "ChainingModeCBC" {
        return Err(CryptoError::Unsupported(format!("chaining mode {chaining}")));
    }
    Ok(())
}

fn parse_key_data(e: &BytesStart<'_>) -> CryptoResult<KeyData> {
    let attrs = attributes(e)?;
    check_cipher(&attrs, "keyData")?;
    Ok(KeyData {
        salt: decode_b64(required(&attrs, "keyData", "saltValue")?)?,
        hash_algorithm: HashAlgorithm::from_name(required(&attrs, "keyData", "hashAlgorithm")?)?,
        block_size: parse_usize(required(&attrs, "keyData", "blockSize")?, "keyData.blockSize")?,
        key_bits: parse_usize(required(&attrs, "keyData", "keyBits")?, "keyData.keyBits")?,
    })
}

fn parse_data_integrity(e: &BytesStart<'_>) -> CryptoResult<DataIntegrity> {
    let attrs = attributes(e)?;
    Ok(DataIntegrity {
        encrypted_hmac_key: decode_b64(required(&attrs, "dataIntegrity", "encryptedHmacKey")?)?,
        encrypted_hmac_value: decode_b64(required(&attrs, "dataIntegrity", "encryptedHmacValue")?)?,
    })
}

fn parse_encrypted_key(e: &BytesStart<'_>) -> CryptoResult<Option<PasswordKeyEncryptor>> {
    let attrs = attributes(e)?;
    // Certificate key encryptors share the local name but carry no spinCount
    let Some(spin) = attrs.iter().find(|(k, _)| k == "spinCount") else {
        return Ok(None);
    };
    let spin_count: u32 = spin
        .1
        .trim()
        .parse()
        .map_err(|_| CryptoError::invalid(format!("spinCount is not a number: {:?}", spin.1)))?;
    if spin_count > MAX_SPIN_COUNT {
        return Err(CryptoError::Unsupported(format!("spinCount {spin_count}")));
    }

    check_cipher(&attrs, "encryptedKey")?;
    let element = "encryptedKey";
    Ok(Some(PasswordKeyEncryptor {
        spin_count,
        salt: decode_b64(required(&attrs, element, "saltValue")?)?,
        hash_algorithm: HashAlgorithm::from_name(required(&attrs, element, "hashAlgorithm")?)?,
        block_size: parse_usize(required(&attrs, element, "blockSize")?, "encryptedKey.blockSize")?,
        key_bits: parse_usize(required(&attrs, element, "keyBits")?, "encryptedKey.keyBits")?,
        encrypted_verifier_hash_input: decode_b64(required(
            &attrs,
            element,
            "encryptedVerifierHashInput",
        )?)?,
        encrypted_verifier_hash_value: decode_b64(required(
            &attrs,
            element,
            "encryptedVerifierHashValue",
        )?)?,
        encrypted_key_value: decode_b64(required(&attrs, element, "encryptedKeyValue")?)?,
    }))
}

/// AES always has 16-byte blocks and 128, 192 or 256-bit keys
fn check_aes_sizes(element: &str, block_size: usize, key_bits: usize) -> CryptoResult<()> {
    if block_size != AES_BLOCK_LEN {
        return Err(CryptoError::Unsupported(format!(
            "{element}.blockSize {block_size}"
        )));
    }
    if !matches!(key_bits, 128 | 192 | 256) {
        return Err(CryptoError::Unsupported(format!("{element}.keyBits {key_bits}")));
    }
    Ok(())
}

/// Parse the XML descriptor that follows the 8-byte version header
pub fn parse_agile_descriptor(xml: &[u8]) -> CryptoResult<AgileEncryptionInfo> {
    let xml = xml.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(xml);
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut key_data = None;
    let mut data_integrity = None;
    let mut key_encryptor = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"keyData" if key_data.is_none() => key_data = Some(parse_key_data(e)?),
                b"dataIntegrity" => data_integrity = Some(parse_data_integrity(e)?),
                b"encryptedKey" if key_encryptor.is_none() => {
                    key_encryptor = parse_encrypted_key(e)?;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let key_data = key_data.ok_or_else(|| CryptoError::invalid("missing <keyData> element"))?;
    let key_encryptor = key_encryptor
        .ok_or_else(|| CryptoError::Unsupported("no password key encryptor".to_string()))?;
    check_aes_sizes("keyData", key_data.block_size, key_data.key_bits)?;
    check_aes_sizes("encryptedKey", key_encryptor.block_size, key_encryptor.key_bits)?;

    Ok(AgileEncryptionInfo {
        key_data,
        data_integrity,
        key_encryptor,
    })
}

/// The iterated password hash shared by every key derivation
fn iterated_hash(password: &str, salt: &[u8], hash: HashAlgorithm, spin_count: u32) -> Zeroizing<Vec<u8>> {
    let pw = password_utf16le(password);
    let mut h = hash.digest(&[salt, &pw[..]]);
    for i in 0..spin_count {
        h = hash.digest(&[&i.to_le_bytes()[..], &h[..]]);
    }
    h
}

fn derive_key(h: &[u8], block_key: &[u8], encryptor: &PasswordKeyEncryptor) -> Zeroizing<Vec<u8>> {
    let derived = encryptor.hash_algorithm.digest(&[h, block_key]);
    fit_to_len(&derived, encryptor.key_bits / 8, 0x36)
}

/// Verify `password` and unwrap the package key
pub fn secret_key(info: &AgileEncryptionInfo, password: &str) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let enc = &info.key_encryptor;
    let iv = fit_to_len(&enc.salt, enc.block_size, 0x36);
    let h = iterated_hash(password, &enc.salt, enc.hash_algorithm, enc.spin_count);

    let key = derive_key(&h, &VERIFIER_HASH_INPUT_BLOCK, enc);
    let verifier_input = aes_cbc_decrypt(&enc.encrypted_verifier_hash_input, &key, &iv)?;
    let key = derive_key(&h, &VERIFIER_HASH_VALUE_BLOCK, enc);
    let verifier_value = aes_cbc_decrypt(&enc.encrypted_verifier_hash_value, &key, &iv)?;

    let input_len = VERIFIER_HASH_INPUT_LEN.min(verifier_input.len());
    let digest = enc.hash_algorithm.digest(&[&verifier_input[..input_len]]);
    let expected = verifier_value
        .get(..digest.len())
        .ok_or(CryptoError::InvalidPassword)?;
    if !ct_eq(&digest, expected) {
        return Err(CryptoError::InvalidPassword);
    }

    let key = derive_key(&h, &KEY_VALUE_BLOCK, enc);
    let key_value = Zeroizing::new(aes_cbc_decrypt(&enc.encrypted_key_value, &key, &iv)?);
    let key_len = info.key_data.key_bits / 8;
    let secret = key_value
        .get(..key_len)
        .ok_or_else(|| CryptoError::invalid("decrypted keyValue is truncated"))?;
    Ok(Zeroizing::new(secret.to_vec()))
}

fn key_data_iv(key_data: &KeyData, block: &[u8]) -> Zeroizing<Vec<u8>> {
    let digest = key_data.hash_algorithm.digest(&[&key_data.salt[..], block]);
    fit_to_len(&digest, key_data.block_size, 0x36)
}

/// Decrypt the `EncryptedPackage` segments with the unwrapped key
fn decrypt_segments(key_data: &KeyData, secret: &[u8], package: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut reader = ByteReader::new(package);
    let size = reader.read_u64("EncryptedPackage size")?;
    let ciphertext = reader.remaining();
    let size = usize::try_from(size)
        .map_err(|_| CryptoError::invalid(format!("package size {size} is too large")))?;
    if size > ciphertext.len() {
        return Err(CryptoError::Truncated {
            context: "EncryptedPackage data",
        });
    }

    let mut out = Vec::with_capacity(ciphertext.len());
    for (index, segment) in ciphertext.chunks(SEGMENT_LEN).enumerate() {
        let index = u32::try_from(index)
            .map_err(|_| CryptoError::invalid("too many package segments"))?;
        let iv = key_data_iv(key_data, &index.to_le_bytes());
        out.extend_from_slice(&aes_cbc_decrypt(segment, secret, &iv)?);
        if out.len() >= size {
            break;
        }
    }
    out.truncate(size);
    Ok(out)
}

/// Check the `dataIntegrity` HMAC.
///
/// Excel computes it over the whole `EncryptedPackage` stream. Some writers
/// compute it over the plaintext instead, so that is accepted as well.
fn verify_integrity(
    info: &AgileEncryptionInfo,
    secret: &[u8],
    package: &[u8],
    plaintext: &[u8],
) -> CryptoResult<()> {
    let Some(integrity) = &info.data_integrity else {
        warn!("agile package has no dataIntegrity element, skipping HMAC check");
        return Ok(());
    };
    let key_data = &info.key_data;
    let hash_len = key_data.hash_algorithm.digest_len();

    let iv = key_data_iv(key_data, &HMAC_KEY_BLOCK);
    let hmac_key = Zeroizing::new(aes_cbc_decrypt(&integrity.encrypted_hmac_key, secret, &iv)?);
    let hmac_key = hmac_key
        .get(..hash_len)
        .ok_or_else(|| CryptoError::invalid("decrypted HMAC key is truncated"))?;

    let iv = key_data_iv(key_data, &HMAC_VALUE_BLOCK);
    let hmac_value = aes_cbc_decrypt(&integrity.encrypted_hmac_value, secret, &iv)?;
    let expected = hmac_value
        .get(..hash_len)
        .ok_or_else(|| CryptoError::invalid("decrypted HMAC value is truncated"))?;

    let over_stream = key_data.hash_algorithm.hmac(hmac_key, package)?;
    if ct_eq(&over_stream, expected) {
        return Ok(());
    }
    let over_plaintext = key_data.hash_algorithm.hmac(hmac_key, plaintext)?;
    if ct_eq(&over_plaintext, expected) {
        debug!("agile HMAC matched the plaintext package");
        return Ok(());
    }
    Err(CryptoError::IntegrityMismatch)
}

/// Verify the password and decrypt an Agile `EncryptedPackage` stream
pub fn decrypt_package(
    info: &AgileEncryptionInfo,
    package: &[u8],
    password: &str,
    options: &DecryptOptions,
) -> CryptoResult<Vec<u8>> {
    let secret = secret_key(info, password)?;
    debug!(
        "agile password verified ({:?}, {} bit key)",
        info.key_data.hash_algorithm, info.key_data.key_bits
    );
    let plaintext = decrypt_segments(&info.key_data, &secret, package)?;
    if options.verify_integrity {
        verify_integrity(info, &secret, package, &plaintext)?;
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<encryption xmlns="http://schemas.microsoft.com/office/2006/encryption" xmlns:p="http://schemas.microsoft.com/office/2006/keyEncryptor/password">
  <keyData saltSize="16" blockSize="16" keyBits="256" hashSize="64" cipherAlgorithm="AES" cipherChaining="ChainingModeCBC" hashAlgorithm="SHA512" saltValue="AAECAwQFBgcICQoLDA0ODw=="/>
  <dataIntegrity encryptedHmacKey="EBES Ew" encryptedHmacValue="FBUWFw=="/>
  <keyEncryptors>
    <keyEncryptor uri="http://schemas.microsoft.com/office/2006/keyEncryptor/password">
      <p:encryptedKey spinCount="100000" saltSize="16" blockSize="16" keyBits="256" hashSize="64" cipherAlgorithm="AES" cipherChaining="ChainingModeCBC" hashAlgorithm="SHA512" saltValue="AQID" encryptedVerifierHashInput="BAU=" encryptedVerifierHashValue="Bgc=" encryptedKeyValue="CAk="/>
    </keyEncryptor>
  </keyEncryptors>
</encryption>"#;

    #[test]
    fn parses_descriptor() {
        let info = parse_agile_descriptor(DESCRIPTOR.as_bytes()).unwrap();
        assert_eq!(info.key_data.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(info.key_data.key_bits, 256);
        assert_eq!(info.key_data.salt, (0u8..16).collect::<Vec<_>>());

        let integrity = info.data_integrity.unwrap();
        assert_eq!(integrity.encrypted_hmac_key, vec![0x10, 0x11, 0x12, 0x13]);

        let enc = info.key_encryptor;
        assert_eq!(enc.spin_count, 100_000);
        assert_eq!(enc.salt, vec![1, 2, 3]);
        assert_eq!(enc.encrypted_key_value, vec![8, 9]);
    }

    #[test]
    fn rejects_oversized_block_size() {
        let xml = DESCRIPTOR
            .replace(r#"spinCount="100000""#, r#"spinCount="1""#)
            .replace(r#"blockSize="16""#, r#"blockSize="100000000000000""#);
        assert!(matches!(
            parse_agile_descriptor(xml.as_bytes()),
            Err(CryptoError::Unsupported(msg)) if msg.contains("blockSize")
        ));
    }

    #[test]
    fn rejects_key_bits_outside_aes() {
        for bits in ["64", "136", "4096", "800000000000000"] {
            let xml = DESCRIPTOR.replacen(r#"keyBits="256""#, &format!(r#"keyBits="{bits}""#), 1);
            assert!(
                matches!(
                    parse_agile_descriptor(xml.as_bytes()),
                    Err(CryptoError::Unsupported(msg)) if msg.contains("keyData.keyBits")
                ),
                "keyBits {bits}"
            );
        }

        let xml = DESCRIPTOR.replace(
            r#"spinCount="100000" saltSize="16" blockSize="16" keyBits="256""#,
            r#"spinCount="100000" saltSize="16" blockSize="16" keyBits="72""#,
        );
        assert!(matches!(
            parse_agile_descriptor(xml.as_bytes()),
            Err(CryptoError::Unsupported(msg)) if msg.contains("encryptedKey.keyBits")
        ));
    }

    #[test]
    fn accepts_every_aes_key_size() {
        for bits in ["128", "192", "256"] {
            let xml = DESCRIPTOR.replace(r#"keyBits="256""#, &format!(r#"keyBits="{bits}""#));
            let info = parse_agile_descriptor(xml.as_bytes()).unwrap();
            assert_eq!(info.key_encryptor.key_bits.to_string(), bits);
        }
    }

    #[test]
    fn rejects_non_aes_cipher() {
        let xml = DESCRIPTOR.replacen(r#"cipherAlgorithm="AES""#, r#"cipherAlgorithm="DES""#, 1);
        assert!(matches!(
            parse_agile_descriptor(xml.as_bytes()),
            Err(CryptoError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_descriptor_without_password_encryptor() {
        let xml = DESCRIPTOR.replace(r#"spinCount="100000" "#, "");
        assert!(matches!(
            parse_agile_descriptor(xml.as_bytes()),
            Err(CryptoError::Unsupported(_))
        ));
    }

    #[test]
    fn base64_tolerates_whitespace_and_missing_padding() {
        assert_eq!(decode_b64("AQ ID\nBA").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(decode_b64("AQI").unwrap(), vec![1, 2]);
    }

    #[test]
    fn iterated_hash_zero_rounds_is_salted_digest() {
        let h = iterated_hash("a", b"salt", HashAlgorithm::Sha1, 0);
        assert_eq!(&h[..], &HashAlgorithm::Sha1.digest(&[&b"salt"[..], &[b'a', 0][..]])[..]);

        let h1 = iterated_hash("a", b"salt", HashAlgorithm::Sha1, 1);
        let expected = HashAlgorithm::Sha1.digest(&[&0u32.to_le_bytes()[..], &h[..]]);
        assert_eq!(&h1[..], &expected[..]);
    }
}
