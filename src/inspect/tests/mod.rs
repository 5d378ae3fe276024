//! Cross-format inspector tests: dispatch, header encryption and the buffer
//! heuristics as seen through [`inspect_buffer`].

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::{Cursor, Write};

use super::crypto::sevenzip_key;
use super::crypto::tests::aes_cbc_encrypt;
use super::lzma::tests::{encode_lzma1_unterminated, encode_lzma2};
use super::sevenzip::fixtures as sz;
use super::{inspect_buffer, rar4, rar5, sniff, ARCHIVE_SAMPLE_ENTRY_LIMIT};
use crate::types::{ArchiveFormat, Verdict};

// ---------------------------------------------------------------------------
// dispatch
// ---------------------------------------------------------------------------

#[test]
fn unknown_magic_is_rar_header_not_found() {
    let inspection = inspect_buffer(b"this is not an archive at all", None);
    assert_eq!(inspection.status.to_string(), "rar-header-not-found");
    assert_eq!(inspection.verdict(), Verdict::Warning);
    assert_eq!(inspection.details.entry_count, 0);
}

#[test]
fn sniff_recognizes_every_signature() {
    assert_eq!(sniff(&rar4::fixtures::stored_archive("a.mkv", 0x30)), Some(ArchiveFormat::Rar));
    assert_eq!(sniff(b"Rar!\x1a\x07\x01\x00rest"), Some(ArchiveFormat::Rar));
    assert_eq!(sniff(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0, 4]), Some(ArchiveFormat::SevenZip));
    assert_eq!(sniff(b"PK\x03\x04"), Some(ArchiveFormat::Zip));
    assert_eq!(sniff(b"PK\x05\x06"), None);
    assert_eq!(sniff(b""), None);
}

#[test]
fn rar4_method_byte_decides_stored_or_compressed() {
    let stored = inspect_buffer(&rar4::fixtures::stored_archive("Movie.2023.mkv", 0x30), None);
    assert_eq!(stored.status.to_string(), "rar-stored");
    assert_eq!(stored.details.playable_entry.as_deref(), Some("Movie.2023.mkv"));

    for method in 0x31..=0x35u8 {
        let compressed = inspect_buffer(&rar4::fixtures::stored_archive("Movie.2023.mkv", method), None);
        assert_eq!(compressed.status.to_string(), "rar-compressed", "method {:#x}", method);
        assert_eq!(compressed.verdict(), Verdict::Blocker);
    }
}

#[test]
fn sample_entries_are_capped() {
    let mut buf = super::RAR5_SIGNATURE.to_vec();
    buf.extend(rar5::fixtures::main_header());
    for i in 0..7 {
        buf.extend(rar5::fixtures::file_block(&format!("clip{}.mkv", i), 0, false, b"xx"));
    }
    buf.extend(rar5::fixtures::end_header());
    let inspection = inspect_buffer(&buf, None);
    assert_eq!(inspection.status.to_string(), "rar-stored");
    assert_eq!(inspection.details.entry_count, 7);
    assert_eq!(inspection.details.sample_entries.len(), ARCHIVE_SAMPLE_ENTRY_LIMIT);
    assert_eq!(inspection.details.sample_entries[0], "clip0.mkv");
}

// ---------------------------------------------------------------------------
// RAR 3/4 encrypted headers
// ---------------------------------------------------------------------------

fn rar4_encrypted(password: &str, name: &str, method: u8) -> Vec<u8> {
    let salt = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    let data = b"stored payload";
    let file = rar4::fixtures::file_block(name, method, 0, data);
    let (file_header, _) = file.split_at(file.len() - data.len());

    let mut buf = rar4::fixtures::archive_start(true);
    buf.extend(rar4::fixtures::encrypt_header(file_header, password, salt));
    buf.extend_from_slice(data);
    buf.extend(rar4::fixtures::encrypt_header(&rar4::fixtures::end_block(), password, salt));
    // room for whatever size a wrong key makes the first block claim
    buf.extend(std::iter::repeat_n(0u8, 70_000));
    buf
}

#[test]
fn rar4_encrypted_headers_with_correct_password_match_plain() {
    let plain = inspect_buffer(&rar4::fixtures::stored_archive("Show.S01E01.mkv", 0x30), None);
    let decrypted = inspect_buffer(&rar4_encrypted("secret", "Show.S01E01.mkv", 0x30), Some("secret"));
    assert_eq!(decrypted.status, plain.status);
    assert_eq!(decrypted.details.playable_entry, plain.details.playable_entry);
    assert!(decrypted.details.encrypted_headers);

    let compressed = inspect_buffer(&rar4_encrypted("secret", "Show.S01E01.mkv", 0x33), Some("secret"));
    assert_eq!(compressed.status.to_string(), "rar-compressed");
}

#[test]
fn rar4_encrypted_headers_without_password_are_encrypted() {
    let inspection = inspect_buffer(&rar4_encrypted("secret", "Show.S01E01.mkv", 0x30), None);
    assert_eq!(inspection.status.to_string(), "rar-encrypted");
    assert_eq!(inspection.verdict(), Verdict::Blocker);
}

#[test]
fn rar4_wrong_password_fails_decryption() {
    let inspection = inspect_buffer(&rar4_encrypted("secret", "Show.S01E01.mkv", 0x30), Some("guess"));
    assert_eq!(inspection.status.to_string(), "rar-encrypted-headers-decrypt-fail");
    assert_ne!(inspection.verdict(), Verdict::Stored);
}

// ---------------------------------------------------------------------------
// RAR 5 encrypted headers
// ---------------------------------------------------------------------------

#[test]
fn rar5_encrypted_headers_with_check_value() {
    let buf = rar5::fixtures::encrypted_archive("hunter2", "Film.2021.mp4", true);
    let decrypted = inspect_buffer(&buf, Some("hunter2"));
    assert_eq!(decrypted.status.to_string(), "rar-stored");
    assert_eq!(decrypted.details.playable_entry.as_deref(), Some("Film.2021.mp4"));
    assert!(decrypted.details.encrypted_headers);

    let wrong = inspect_buffer(&buf, Some("hunter3"));
    assert_eq!(wrong.status.to_string(), "rar-encrypted-headers-decrypt-fail");

    let missing = inspect_buffer(&buf, None);
    assert_eq!(missing.status.to_string(), "rar-encrypted");
}

#[test]
fn rar5_encrypted_headers_without_check_value_use_crc() {
    let buf = rar5::fixtures::encrypted_archive("hunter2", "Film.2021.mp4", false);
    assert_eq!(inspect_buffer(&buf, Some("hunter2")).status.to_string(), "rar-stored");
    assert_eq!(
        inspect_buffer(&buf, Some("nope")).status.to_string(),
        "rar-encrypted-headers-decrypt-fail"
    );
}

// ---------------------------------------------------------------------------
// 7z
// ---------------------------------------------------------------------------

const FILE_DATA: &[u8] = b"data";
const SALT: [u8; 8] = [3, 1, 4, 1, 5, 9, 2, 6];
const IV: [u8; 16] = [7; 16];
const CYCLES: u8 = 4;

fn plain_7z_header(names: &[&str]) -> Vec<u8> {
    sz::plain_header(names, &[sz::copy()], FILE_DATA.len() as u64)
}

/// Archive whose end header is `[kEncodedHeader]` over `packed`
fn encoded_7z(packed: &[u8], coders: &[sz::CoderSpec], sizes: &[u64], crc: u32) -> Vec<u8> {
    let mut header = vec![0x17];
    header.extend(sz::streams_info(
        FILE_DATA.len() as u64,
        packed.len() as u64,
        coders,
        sizes,
        Some(crc),
        None,
    ));
    let mut area = FILE_DATA.to_vec();
    area.extend_from_slice(packed);
    sz::archive(&area, &header)
}

fn aes_7z(password: &str, header: &[u8]) -> Vec<u8> {
    let key = sevenzip_key(password, &SALT, CYCLES).unwrap();
    let packed = aes_cbc_encrypt(&key, &IV, header);
    encoded_7z(
        &packed,
        &[sz::aes(CYCLES, &SALT, &IV)],
        &[header.len() as u64],
        crc32fast::hash(header),
    )
}

#[test]
fn sevenzip_plain_header_copy_is_stored() {
    let buf = sz::archive(FILE_DATA, &plain_7z_header(&["Movie.mkv"]));
    let inspection = inspect_buffer(&buf, None);
    assert_eq!(inspection.status.to_string(), "sevenzip-stored");
    assert_eq!(inspection.details.playable_entry.as_deref(), Some("Movie.mkv"));
}

#[test]
fn sevenzip_compressed_coder_is_unsupported() {
    let header = sz::plain_header(&["Movie.mkv"], &[sz::lzma2(16)], FILE_DATA.len() as u64);
    let inspection = inspect_buffer(&sz::archive(FILE_DATA, &header), None);
    assert_eq!(inspection.status.to_string(), "sevenzip-unsupported");
    assert_eq!(inspection.details.method.as_deref(), Some("lzma2"));
    assert_eq!(inspection.verdict(), Verdict::Blocker);
}

#[test]
fn sevenzip_nested_archive_and_iso_entries() {
    let buf = sz::archive(FILE_DATA, &plain_7z_header(&["inner.rar"]));
    assert_eq!(inspect_buffer(&buf, None).status.to_string(), "sevenzip-nested-archive");
    let buf = sz::archive(FILE_DATA, &plain_7z_header(&["disc.iso"]));
    assert_eq!(inspect_buffer(&buf, None).status.to_string(), "sevenzip-iso-image");
}

#[test]
fn sevenzip_lzma2_encoded_header_matches_plain() {
    let header = plain_7z_header(&["Movie.mkv"]);
    let packed = encode_lzma2(&header, 16);
    let buf = encoded_7z(
        &packed,
        &[sz::lzma2(16)],
        &[header.len() as u64],
        crc32fast::hash(&header),
    );
    let inspection = inspect_buffer(&buf, None);
    assert_eq!(inspection.status.to_string(), "sevenzip-stored");
    assert!(!inspection.details.encrypted_headers);
}

#[test]
fn sevenzip_lzma_encoded_header_without_end_marker() {
    let header = plain_7z_header(&["Movie.mkv"]);
    let props = [0x5D, 0x00, 0x00, 0x01, 0x00];
    let packed = encode_lzma1_unterminated(&header, &props);
    let buf = encoded_7z(
        &packed,
        &[sz::lzma(&props)],
        &[header.len() as u64],
        crc32fast::hash(&header),
    );
    let inspection = inspect_buffer(&buf, None);
    assert_eq!(inspection.status.to_string(), "sevenzip-stored");
    assert_eq!(inspection.details.playable_entry.as_deref(), Some("Movie.mkv"));
}

#[test]
fn sevenzip_aes_header_with_correct_password() {
    let header = plain_7z_header(&["Movie.mkv"]);
    let inspection = inspect_buffer(&aes_7z("pass", &header), Some("pass"));
    assert_eq!(inspection.status.to_string(), "sevenzip-stored");
    assert!(inspection.details.encrypted_headers);
}

#[test]
fn sevenzip_aes_header_wrong_or_missing_password() {
    let header = plain_7z_header(&["Movie.mkv"]);
    let buf = aes_7z("pass", &header);
    assert_eq!(
        inspect_buffer(&buf, Some("wrong")).status.to_string(),
        "sevenzip-encrypted-headers-decrypt-fail"
    );
    assert_eq!(inspect_buffer(&buf, None).status.to_string(), "sevenzip-encrypted");
}

#[test]
fn sevenzip_lzma2_over_aes_chain() {
    let header = plain_7z_header(&["Movie.mkv"]);
    let compressed = encode_lzma2(&header, 16);
    let key = sevenzip_key("pass", &SALT, CYCLES).unwrap();
    let packed = aes_cbc_encrypt(&key, &IV, &compressed);
    let buf = encoded_7z(
        &packed,
        &[sz::lzma2(16), sz::aes(CYCLES, &SALT, &IV)],
        &[header.len() as u64, compressed.len() as u64],
        crc32fast::hash(&header),
    );
    assert_eq!(inspect_buffer(&buf, Some("pass")).status.to_string(), "sevenzip-stored");
    assert_eq!(
        inspect_buffer(&buf, Some("wrong")).status.to_string(),
        "sevenzip-encrypted-headers-decrypt-fail"
    );
}

#[test]
fn sevenzip_header_out_of_reach_falls_back_to_names() {
    // the end header sits far beyond the buffer; the packed data holds a
    // UTF-16 disc image name
    let mut packed = vec![0u8; 16];
    for unit in "Backup.Disc.iso".encode_utf16() {
        packed.extend_from_slice(&unit.to_le_bytes());
    }
    let header = plain_7z_header(&["Backup.Disc.iso"]);
    let buf = sz::archive(&packed, &header);
    let prefix = &buf[..32 + packed.len()];
    let inspection = inspect_buffer(prefix, None);
    assert_eq!(inspection.status.to_string(), "sevenzip-iso-image");
    assert_eq!(inspection.details.heuristic_names, vec!["Backup.Disc.iso"]);
}

// ---------------------------------------------------------------------------
// ZIP through the zip crate
// ---------------------------------------------------------------------------

fn zip_with(name: &str, method: ::zip::CompressionMethod) -> Vec<u8> {
    let mut writer = ::zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = ::zip::write::FileOptions::default().compression_method(method);
    writer.start_file(name, options).unwrap();
    writer.write_all(&[0x42; 4096]).unwrap();
    writer.finish().unwrap().into_inner()
}

#[test]
fn zip_stored_and_deflated() {
    let stored = inspect_buffer(&zip_with("Clip.mp4", ::zip::CompressionMethod::Stored), None);
    assert_eq!(stored.status.to_string(), "zip-stored");
    assert_eq!(stored.details.playable_entry.as_deref(), Some("Clip.mp4"));

    let deflated = inspect_buffer(&zip_with("Clip.mp4", ::zip::CompressionMethod::Deflated), None);
    assert_eq!(deflated.status.to_string(), "zip-compressed");
    assert_eq!(deflated.details.method.as_deref(), Some("deflate"));
}

#[test]
fn zip_prefix_only_still_sees_the_first_entry() {
    let buf = zip_with("Clip.mp4", ::zip::CompressionMethod::Stored);
    let inspection = inspect_buffer(&buf[..100], None);
    assert_eq!(inspection.status.to_string(), "zip-stored");
    assert!(inspection.details.note.is_some());
}

// ---------------------------------------------------------------------------
// heuristic fallback
// ---------------------------------------------------------------------------

#[test]
fn rar_without_parsable_entries_uses_buffer_names() {
    let mut buf = rar4::fixtures::archive_start(false);
    // a block type outside the RAR 4 range ends the walk
    buf.extend_from_slice(&[0x00, 0x00, 0xEE, 0x00, 0x00, 0x10, 0x00]);
    buf.extend_from_slice(b"....VIDEO_TS/VTS_01_1.VOB....");
    let inspection = inspect_buffer(&buf, None);
    assert_eq!(inspection.status.to_string(), "rar-disc-structure");
}

#[test]
fn stored_result_ignores_buffer_names() {
    let mut buf = rar4::fixtures::stored_archive("Movie.mkv", 0x30);
    buf.extend_from_slice(b"\x00leftover.iso\x00");
    let inspection = inspect_buffer(&buf, None);
    assert_eq!(inspection.status.to_string(), "rar-stored");
    assert!(inspection.details.heuristic_names.is_empty());
}
