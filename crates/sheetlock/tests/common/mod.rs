//! Fixture builders shared by the integration tests.
//!
//! Agile encrypted `.xlsx` files come from `ms-offcrypto-writer` (AES-256).
//! Standard (AES-128 ECB) packages and encrypted `.xls` files are built here:
//! the crate's own BIFF8 writer output gets a `FILEPASS` record and RC4
//! Standard or RC4 CryptoAPI encryption applied.
#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use cfb::CompoundFile;
use md5::Md5;
use ms_offcrypto_writer::Ecma376AgileWriter;
use rand::{rngs::StdRng, SeedableRng as _};
use sha1::{Digest, Sha1};

use sheetlock::{CellValue, Workbook, XlsReader, XlsWriter, XlsxReader, XlsxWriter};

pub const PASSWORD: &str = "secret123";

/// The two payload formats a fixture can be written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xlsx,
    Xls,
}

impl Format {
    pub const ALL: [Format; 2] = [Format::Xlsx, Format::Xls];

    pub fn file_name(self) -> &'static str {
        match self {
            Format::Xlsx => "book.xlsx",
            Format::Xls => "book.xls",
        }
    }

    /// Write `workbook` encrypted with `password` and return its path
    pub fn write_encrypted(self, dir: &Path, workbook: &Workbook, password: &str) -> PathBuf {
        let bytes = match self {
            Format::Xlsx => encrypt_agile(&XlsxWriter::write_bytes(workbook).unwrap(), password),
            Format::Xls => {
                let stream = XlsWriter::workbook_stream(workbook).unwrap();
                compound_file(
                    "Workbook",
                    &encrypt_biff_stream(&stream, password, Rc4Scheme::CryptoApi),
                )
            }
        };
        let path = dir.join(self.file_name());
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Write `workbook` without any encryption
    pub fn write_plain(self, dir: &Path, workbook: &Workbook) -> PathBuf {
        let path = dir.join(self.file_name());
        match self {
            Format::Xlsx => XlsxWriter::write_file(workbook, &path).unwrap(),
            Format::Xls => XlsWriter::write_file(workbook, &path).unwrap(),
        }
        path
    }

    /// Read an unencrypted file with the plain structural reader
    pub fn read_plain(self, path: &Path) -> Workbook {
        match self {
            Format::Xlsx => XlsxReader::read_file(path).unwrap(),
            Format::Xls => XlsReader::read_file(path).unwrap(),
        }
    }
}

/// Two sheets, a handful of typed values and enough strings to span
/// several 1024-byte RC4 blocks.
pub fn sample_workbook() -> Workbook {
    let mut workbook = Workbook::empty();
    let first = workbook.add_worksheet_with_name("Sheet1").unwrap();
    let second = workbook.add_worksheet_with_name("Data").unwrap();

    let ws = workbook.worksheet_mut(first).unwrap();
    ws.set_cell_value("A1", "header").unwrap();
    ws.set_cell_value("B1", 1.5).unwrap();
    ws.set_cell_value("C1", 10).unwrap();
    ws.set_cell_value("D1", false).unwrap();

    let ws = workbook.worksheet_mut(second).unwrap();
    for row in 0..200u32 {
        ws.set_cell_value_at(row, 0, format!("row {row} of the data sheet"))
            .unwrap();
        ws.set_cell_value_at(row, 1, CellValue::Integer(i64::from(row) * 3))
            .unwrap();
    }
    workbook
}

pub fn encrypt_agile(plain: &[u8], password: &str) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut rng = StdRng::from_seed([0u8; 32]);
    let mut agile = Ecma376AgileWriter::create(&mut rng, password, &mut cursor).unwrap();
    agile.write_all(plain).unwrap();
    agile.finalize().unwrap();
    cursor.into_inner()
}

/// A compound file holding one stream
pub fn compound_file(stream_name: &str, data: &[u8]) -> Vec<u8> {
    let mut cfb = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
    {
        let mut stream = cfb.create_stream(format!("/{stream_name}")).unwrap();
        stream.write_all(data).unwrap();
    }
    cfb.flush().unwrap();
    cfb.into_inner().into_inner()
}

const RECORD_BOF: u16 = 0x0809;
const RECORD_FILEPASS: u16 = 0x002F;
const RECORD_BOUNDSHEET: u16 = 0x0085;
const RECORD_INTERFACEHDR: u16 = 0x00E1;

const CALG_RC4: u32 = 0x6801;
const CALG_AES_128: u32 = 0x660E;
const CALG_SHA1: u32 = 0x8004;
const BLOCK_LEN: usize = 1024;

struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (i, slot) in s.iter_mut().enumerate() {
            *slot = i as u8;
        }
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        Self { s, i: 0, j: 0 }
    }

    fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.s[self.i as usize]);
            self.s.swap(self.i as usize, self.j as usize);
            let k = self.s[self.s[self.i as usize].wrapping_add(self.s[self.j as usize]) as usize];
            *byte ^= k;
        }
    }
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn sha1_chunks(chunks: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize().to_vec()
}

fn md5_chunks(chunks: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Md5::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize().to_vec()
}

/// RC4 flavour used for an encrypted `.xls` fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rc4Scheme {
    /// MD5 keys, `FILEPASS` version 1.1
    Standard,
    /// SHA-1 keys with a 128-bit key, `FILEPASS` version 4.2
    CryptoApi,
}

impl Rc4Scheme {
    /// Password-dependent material every block key is hashed from
    fn material(self, password: &str, salt: &[u8; 16]) -> Vec<u8> {
        let pw = utf16le(password);
        match self {
            Rc4Scheme::Standard => {
                let h0 = md5_chunks(&[&pw]);
                let mut buf = Vec::new();
                for _ in 0..16 {
                    buf.extend_from_slice(&h0[..5]);
                    buf.extend_from_slice(salt);
                }
                md5_chunks(&[&buf])[..5].to_vec()
            }
            Rc4Scheme::CryptoApi => sha1_chunks(&[salt, &pw]),
        }
    }

    fn block_key(self, material: &[u8], block: u32) -> Vec<u8> {
        let block = block.to_le_bytes();
        match self {
            Rc4Scheme::Standard => md5_chunks(&[material, &block]),
            Rc4Scheme::CryptoApi => sha1_chunks(&[material, &block])[..16].to_vec(),
        }
    }

    fn filepass(self, material: &[u8], salt: &[u8; 16]) -> Vec<u8> {
        let verifier = [0x3Cu8; 16];
        let mut pair = verifier.to_vec();
        match self {
            Rc4Scheme::Standard => pair.extend(md5_chunks(&[&verifier])),
            Rc4Scheme::CryptoApi => pair.extend(sha1_chunks(&[&verifier])),
        }
        Rc4::new(&self.block_key(material, 0)).apply(&mut pair);

        let mut payload = Vec::new();
        payload.extend_from_slice(&1u16.to_le_bytes()); // RC4
        match self {
            Rc4Scheme::Standard => {
                payload.extend_from_slice(&1u16.to_le_bytes());
                payload.extend_from_slice(&1u16.to_le_bytes());
                payload.extend_from_slice(salt);
                payload.extend(pair);
            }
            Rc4Scheme::CryptoApi => {
                let header = encryption_header(CALG_RC4, 128);
                payload.extend_from_slice(&4u16.to_le_bytes());
                payload.extend_from_slice(&2u16.to_le_bytes());
                payload.extend_from_slice(&0x04u32.to_le_bytes());
                payload.extend_from_slice(&(header.len() as u32).to_le_bytes());
                payload.extend(header);
                payload.extend_from_slice(&16u32.to_le_bytes());
                payload.extend_from_slice(salt);
                payload.extend_from_slice(&pair[..16]);
                payload.extend_from_slice(&20u32.to_le_bytes());
                payload.extend_from_slice(&pair[16..]);
            }
        }
        payload
    }
}

/// `EncryptionHeader` with the enhanced provider name
fn encryption_header(alg_id: u32, key_bits: u32) -> Vec<u8> {
    let mut header = Vec::new();
    header.extend_from_slice(&0x04u32.to_le_bytes()); // fCryptoAPI
    header.extend_from_slice(&0u32.to_le_bytes());
    header.extend_from_slice(&alg_id.to_le_bytes());
    header.extend_from_slice(&CALG_SHA1.to_le_bytes());
    header.extend_from_slice(&key_bits.to_le_bytes());
    header.extend_from_slice(&1u32.to_le_bytes()); // PROV_RSA_FULL
    header.extend_from_slice(&0u32.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes());
    header.extend(utf16le("Microsoft Enhanced Cryptographic Provider v1.0\0"));
    header
}

fn read_header(stream: &[u8], pos: usize) -> (u16, usize) {
    let id = u16::from_le_bytes([stream[pos], stream[pos + 1]]);
    let len = u16::from_le_bytes([stream[pos + 2], stream[pos + 3]]) as usize;
    (id, len)
}

/// Insert `FILEPASS` after the globals BOF and RC4 encrypt every record
/// that follows it.
pub fn encrypt_biff_stream(plain: &[u8], password: &str, scheme: Rc4Scheme) -> Vec<u8> {
    let salt = [0xA5u8; 16];
    let material = scheme.material(password, &salt);

    let (bof_id, bof_len) = read_header(plain, 0);
    assert_eq!(bof_id, RECORD_BOF);
    let bof_end = 4 + bof_len;

    let filepass = scheme.filepass(&material, &salt);
    let mut stream = plain[..bof_end].to_vec();
    stream.extend_from_slice(&RECORD_FILEPASS.to_le_bytes());
    stream.extend_from_slice(&(filepass.len() as u16).to_le_bytes());
    stream.extend(filepass);
    let shift = (stream.len() - bof_end) as u32;
    let body_start = stream.len();
    stream.extend_from_slice(&plain[bof_end..]);

    // Sheet offsets move by the inserted record
    let mut pos = body_start;
    while pos + 4 <= stream.len() {
        let (id, len) = read_header(&stream, pos);
        if id == RECORD_BOUNDSHEET {
            let at = pos + 4;
            let old = u32::from_le_bytes(stream[at..at + 4].try_into().unwrap());
            stream[at..at + 4].copy_from_slice(&(old + shift).to_le_bytes());
        }
        pos += 4 + len;
    }

    let mut keystream = Vec::with_capacity(stream.len() + BLOCK_LEN);
    let mut block = 0u32;
    while keystream.len() < stream.len() {
        let mut chunk = vec![0u8; BLOCK_LEN];
        Rc4::new(&scheme.block_key(&material, block)).apply(&mut chunk);
        keystream.extend(chunk);
        block += 1;
    }

    let mut pos = body_start;
    while pos + 4 <= stream.len() {
        let (id, len) = read_header(&stream, pos);
        if id != RECORD_BOF && id != RECORD_INTERFACEHDR {
            let skip = if id == RECORD_BOUNDSHEET { 4 } else { 0 };
            let end = (pos + 4 + len).min(stream.len());
            for i in pos + 4 + skip..end {
                stream[i] ^= keystream[i];
            }
        }
        pos += 4 + len;
    }
    stream
}

fn aes_ecb_encrypt(key: &[u8], data: &mut [u8]) {
    let cipher = Aes128::new_from_slice(key).unwrap();
    for block in data.chunks_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

/// Standard encryption key: 50,000 SHA-1 rounds, then the 0x36/0x5C expansion
fn standard_key(password: &str, salt: &[u8]) -> Vec<u8> {
    let mut h = sha1_chunks(&[salt, &utf16le(password)]);
    for i in 0..50_000u32 {
        h = sha1_chunks(&[&i.to_le_bytes(), &h]);
    }
    let hfinal = sha1_chunks(&[&h, &0u32.to_le_bytes()]);

    let mut inner = [0x36u8; 64];
    let mut outer = [0x5Cu8; 64];
    for (i, b) in hfinal.iter().enumerate() {
        inner[i] ^= b;
        outer[i] ^= b;
    }
    let mut key = sha1_chunks(&[&inner]);
    key.extend(sha1_chunks(&[&outer]));
    key.truncate(16);
    key
}

/// Wrap a zip package in Standard (AES-128 ECB) encryption
pub fn encrypt_standard(plain: &[u8], password: &str) -> Vec<u8> {
    let salt: Vec<u8> = (0x10u8..0x20).collect();
    let key = standard_key(password, &salt);

    let mut verifier: Vec<u8> = (0x40u8..0x50).collect();
    let mut verifier_hash = sha1_chunks(&[&verifier]);
    verifier_hash.resize(32, 0);
    aes_ecb_encrypt(&key, &mut verifier);
    aes_ecb_encrypt(&key, &mut verifier_hash);

    let header = encryption_header(CALG_AES_128, 128);
    let mut info = Vec::new();
    info.extend_from_slice(&4u16.to_le_bytes());
    info.extend_from_slice(&2u16.to_le_bytes());
    info.extend_from_slice(&0x24u32.to_le_bytes()); // fCryptoAPI | fAES
    info.extend_from_slice(&(header.len() as u32).to_le_bytes());
    info.extend(header);
    info.extend_from_slice(&16u32.to_le_bytes());
    info.extend_from_slice(&salt);
    info.extend(verifier);
    info.extend_from_slice(&20u32.to_le_bytes());
    info.extend(verifier_hash);

    let mut body = plain.to_vec();
    body.resize((plain.len() + 15) / 16 * 16, 0);
    aes_ecb_encrypt(&key, &mut body);
    let mut package = (plain.len() as u64).to_le_bytes().to_vec();
    package.extend(body);

    let mut cfb = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
    for (name, data) in [("EncryptionInfo", &info), ("EncryptedPackage", &package)] {
        let mut stream = cfb.create_stream(format!("/{name}")).unwrap();
        stream.write_all(data).unwrap();
    }
    cfb.flush().unwrap();
    cfb.into_inner().into_inner()
}
