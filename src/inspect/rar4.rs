//! RAR 1.5-4.x header walk
//!
//! ```text
//! HEAD_CRC u16 | HEAD_TYPE u8 | HEAD_FLAGS u16 | HEAD_SIZE u16 | [ADD_SIZE u32]
//! ```
//!
//! With `-hp` archives every header after the archive header is stored as an
//! 8-byte salt followed by the AES-128-CBC encrypted header, padded to 16 bytes.

use std::collections::HashMap;

use tracing::debug;

use super::crypto::{aes128_cbc_decrypt, block_align, rar3_key, AES_BLOCK};
use super::reader::ByteReader;
use super::{classify, Entry, Inspection, Walk, RAR4_SIGNATURE};
use crate::error::InspectError;
use crate::types::{ArchiveFormat, StatusKind};

const BLOCK_MARKER: u8 = 0x72;
const BLOCK_ARCHIVE: u8 = 0x73;
const BLOCK_FILE: u8 = 0x74;
const BLOCK_NEWSUB: u8 = 0x7A;
const BLOCK_END: u8 = 0x7B;

const MHD_PASSWORD: u16 = 0x0080;
const LHD_PASSWORD: u16 = 0x0004;
const LHD_LARGE: u16 = 0x0100;
const LHD_UNICODE: u16 = 0x0200;
const LHD_WINDOW_MASK: u16 = 0x00E0;
const LONG_BLOCK: u16 = 0x8000;

const METHOD_STORE: u8 = 0x30;
const SALT_SIZE: usize = 8;
const BASE_HEADER: usize = 7;

enum Stop {
    NeedPassword,
    WrongPassword,
    Read(InspectError),
}

impl From<InspectError> for Stop {
    fn from(e: InspectError) -> Self {
        Stop::Read(e)
    }
}

/// Inspect a buffer starting with the RAR 4 signature
pub(crate) fn inspect(buf: &[u8], password: Option<&str>) -> Inspection {
    let mut walk = Walk::default();
    match walk_headers(buf, password, &mut walk) {
        Ok(()) => {}
        Err(Stop::Read(e)) => {
            debug!(error = %e, entries = walk.entries.len(), "rar4 header walk stopped");
            walk.stopped = Some(e);
        }
        Err(Stop::NeedPassword) => {
            let mut inspection = Inspection::new(ArchiveFormat::Rar, StatusKind::Encrypted, Default::default());
            inspection.details.encrypted_headers = true;
            return inspection;
        }
        Err(Stop::WrongPassword) => {
            let mut inspection = Inspection::new(
                ArchiveFormat::Rar,
                StatusKind::EncryptedHeadersDecryptFail,
                Default::default(),
            );
            inspection.details.encrypted_headers = true;
            return inspection;
        }
    }
    classify(ArchiveFormat::Rar, walk, password)
}

struct BlockHeader {
    kind: u8,
    flags: u16,
    size: usize,
    data_size: u64,
}

/// Parse the fixed part of a header from its first bytes
fn parse_base(header: &[u8]) -> Result<BlockHeader, InspectError> {
    let mut r = ByteReader::new(header);
    let _crc = r.read_u16_le()?;
    let kind = r.read_u8()?;
    let flags = r.read_u16_le()?;
    let size = r.read_u16_le()? as usize;
    let mut data_size = 0u64;
    if flags & LONG_BLOCK != 0 && (BLOCK_MARKER..=BLOCK_END).contains(&kind) {
        data_size = u64::from(r.read_u32_le()?);
    }
    Ok(BlockHeader {
        kind,
        flags,
        size,
        data_size,
    })
}

fn walk_headers(buf: &[u8], password: Option<&str>, walk: &mut Walk) -> Result<(), Stop> {
    let mut pos = RAR4_SIGNATURE.len();
    loop {
        if pos >= buf.len() {
            return Ok(());
        }
        let base = parse_base(&buf[pos..])?;
        if !(BLOCK_MARKER..=BLOCK_END).contains(&base.kind) {
            // past the useful headers, usually file data
            return Ok(());
        }
        if base.size < BASE_HEADER {
            return Err(InspectError::Corrupt(format!("header size {} too small", base.size)).into());
        }
        let header = ByteReader::at(buf, pos).take(base.size)?;
        let data_size = visit(header, &base, walk)?;

        if base.kind == BLOCK_END {
            return Ok(());
        }
        let next = pos as u64 + base.size as u64 + data_size;
        pos = usize::try_from(next).unwrap_or(usize::MAX);

        if base.kind == BLOCK_ARCHIVE && base.flags & MHD_PASSWORD != 0 {
            let password = password.ok_or(Stop::NeedPassword)?;
            walk.encrypted_headers = true;
            return walk_encrypted(buf, pos, password, walk);
        }
    }
}

fn walk_encrypted(buf: &[u8], mut pos: usize, password: &str, walk: &mut Walk) -> Result<(), Stop> {
    let mut keys: HashMap<Vec<u8>, ([u8; 16], [u8; 16])> = HashMap::new();
    loop {
        if pos >= buf.len() {
            return Ok(());
        }
        let mut r = ByteReader::at(buf, pos);
        let salt = r.take(SALT_SIZE)?;
        let (key, iv) = *keys
            .entry(salt.to_vec())
            .or_insert_with(|| rar3_key(password, salt));

        let mut first = r.take(AES_BLOCK)?.to_vec();
        aes128_cbc_decrypt(&key, &iv, &mut first)?;
        let base = parse_base(&first)?;
        let plausible = base.size >= BASE_HEADER && (BLOCK_MARKER..=BLOCK_END).contains(&base.kind);
        if !plausible {
            if walk.entries.is_empty() {
                return Err(Stop::WrongPassword);
            }
            return Ok(());
        }
        let padded = block_align(base.size);

        let mut header = ByteReader::at(buf, pos + SALT_SIZE).take(padded)?.to_vec();
        aes128_cbc_decrypt(&key, &iv, &mut header)?;

        if header_crc(&header[..base.size]) != u16::from_le_bytes([header[0], header[1]]) {
            if walk.entries.is_empty() {
                return Err(Stop::WrongPassword);
            }
            return Ok(());
        }

        let data_size = visit(&header[..base.size], &base, walk)?;
        if base.kind == BLOCK_END {
            return Ok(());
        }
        let next = (pos + SALT_SIZE + padded) as u64 + data_size;
        pos = usize::try_from(next).unwrap_or(usize::MAX);
    }
}

/// Low 16 bits of CRC32 over everything after the CRC field
fn header_crc(header: &[u8]) -> u16 {
    (crc32fast::hash(&header[2..]) & 0xFFFF) as u16
}

/// Record what a header says and return the size of the data that follows it
fn visit(header: &[u8], base: &BlockHeader, walk: &mut Walk) -> Result<u64, InspectError> {
    match base.kind {
        BLOCK_FILE => {
            let (entry, data_size) = parse_file_header(header, base.flags)?;
            walk.push(entry);
            Ok(data_size)
        }
        BLOCK_NEWSUB if base.flags & LHD_LARGE != 0 => {
            let mut r = ByteReader::at(header, 32);
            let high = u64::from(r.read_u32_le()?);
            Ok(base.data_size | (high << 32))
        }
        _ => Ok(base.data_size),
    }
}

fn parse_file_header(header: &[u8], flags: u16) -> Result<(Entry, u64), InspectError> {
    let mut r = ByteReader::at(header, BASE_HEADER);
    let pack_low = r.read_u32_le()?;
    let _unpacked = r.read_u32_le()?;
    let _host_os = r.read_u8()?;
    let _file_crc = r.read_u32_le()?;
    let _mtime = r.read_u32_le()?;
    let _version = r.read_u8()?;
    let method = r.read_u8()?;
    let name_size = r.read_u16_le()? as usize;
    let _attributes = r.read_u32_le()?;
    let mut pack_size = u64::from(pack_low);
    if flags & LHD_LARGE != 0 {
        pack_size |= u64::from(r.read_u32_le()?) << 32;
        let _unpacked_high = r.read_u32_le()?;
    }
    let raw_name = r.take(name_size)?;
    let raw_name = if flags & LHD_UNICODE != 0 {
        raw_name.split(|&b| b == 0).next().unwrap_or(raw_name)
    } else {
        raw_name
    };
    let name = String::from_utf8_lossy(raw_name).replace('\\', "/");

    let stored = method == METHOD_STORE;
    let entry = Entry {
        name,
        stored,
        method: (!stored).then(|| format!("m{}", method.wrapping_sub(METHOD_STORE))),
        encrypted: flags & LHD_PASSWORD != 0,
        is_dir: flags & LHD_WINDOW_MASK == LHD_WINDOW_MASK,
    };
    Ok((entry, pack_size))
}
