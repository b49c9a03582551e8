mod common;

use common::{
    compound_file, encrypt_agile, encrypt_biff_stream, encrypt_standard, sample_workbook, Rc4Scheme,
    PASSWORD,
};
use pretty_assertions::assert_eq;
use sheetlock::{decrypt, ContainerKind, Error, XlsReader, XlsWriter, XlsxWriter};

/// An encrypted package decrypts to the original zip bytes
#[test]
fn test_agile_package_yields_zip() {
    let plain = XlsxWriter::write_bytes(&sample_workbook()).unwrap();
    let raw = encrypt_agile(&plain, PASSWORD);

    let payload = decrypt(&raw, PASSWORD).unwrap();
    assert_eq!(payload.kind, ContainerKind::ZipPackage);
    assert_eq!(payload.bytes, plain);
}

/// An RC4 CryptoAPI workbook stream decrypts to parseable BIFF8
#[test]
fn test_rc4_cryptoapi_stream_yields_workbook() {
    let stream = XlsWriter::workbook_stream(&sample_workbook()).unwrap();
    let raw = compound_file("Workbook", &encrypt_biff_stream(&stream, PASSWORD, Rc4Scheme::CryptoApi));

    let payload = decrypt(&raw, PASSWORD).unwrap();
    assert_eq!(payload.kind, ContainerKind::LegacyCompound);

    let workbook = XlsReader::read_workbook_stream(&payload.bytes).unwrap();
    assert_eq!(workbook.sheet_names(), vec!["Sheet1", "Data"]);
}

/// Legacy files that name their stream `Book` are found too
#[test]
fn test_book_stream_name_is_accepted() {
    let stream = XlsWriter::workbook_stream(&sample_workbook()).unwrap();
    let raw = compound_file("Book", &encrypt_biff_stream(&stream, PASSWORD, Rc4Scheme::CryptoApi));

    assert_eq!(decrypt(&raw, PASSWORD).unwrap().kind, ContainerKind::LegacyCompound);
}

/// Wrong passwords are distinguished from other failures
#[test]
fn test_wrong_password_for_each_scheme() {
    let plain = XlsxWriter::write_bytes(&sample_workbook()).unwrap();
    let agile = encrypt_agile(&plain, PASSWORD);
    assert!(matches!(decrypt(&agile, "wrong"), Err(Error::PasswordError)));

    let stream = XlsWriter::workbook_stream(&sample_workbook()).unwrap();
    for scheme in [Rc4Scheme::Standard, Rc4Scheme::CryptoApi] {
        let rc4 = compound_file("Workbook", &encrypt_biff_stream(&stream, PASSWORD, scheme));
        assert!(
            matches!(decrypt(&rc4, "wrong"), Err(Error::PasswordError)),
            "{scheme:?}"
        );
    }

    let standard = encrypt_standard(&plain, PASSWORD);
    assert!(matches!(decrypt(&standard, "wrong"), Err(Error::PasswordError)));
}

/// A Standard (AES-128 ECB) package decrypts to the original zip bytes
#[test]
fn test_standard_package_yields_zip() {
    let plain = XlsxWriter::write_bytes(&sample_workbook()).unwrap();
    let raw = encrypt_standard(&plain, PASSWORD);

    let payload = decrypt(&raw, PASSWORD).unwrap();
    assert_eq!(payload.kind, ContainerKind::ZipPackage);
    assert_eq!(payload.bytes, plain);
}

/// An RC4 Standard workbook stream decrypts to parseable BIFF8
#[test]
fn test_rc4_standard_stream_yields_workbook() {
    let stream = XlsWriter::workbook_stream(&sample_workbook()).unwrap();
    let raw = compound_file("Workbook", &encrypt_biff_stream(&stream, PASSWORD, Rc4Scheme::Standard));

    let payload = decrypt(&raw, PASSWORD).unwrap();
    assert_eq!(payload.kind, ContainerKind::LegacyCompound);
    let workbook = XlsReader::read_workbook_stream(&payload.bytes).unwrap();
    assert_eq!(workbook.sheet_names(), vec!["Sheet1", "Data"]);
}

/// Files under four bytes cannot be classified
#[test]
fn test_short_input_is_unreadable() {
    assert!(matches!(decrypt(b"\xD0\xCF", PASSWORD), Err(Error::UnreadableFile(_))));
}
