//! RAR 5 header walk
//!
//! ```text
//! CRC32 u32 | HeaderSize vint | Type vint | Flags vint | [ExtraSize vint] | [DataSize vint] | ... | extra area
//! ```
//!
//! After an encryption header (type 4) every header is stored as a 16-byte IV
//! followed by the AES-256-CBC encrypted header, padded to 16 bytes. File data
//! areas stay where they are and are skipped by their declared size.

use tracing::debug;

use super::crypto::{aes256_cbc_decrypt, block_align, rar5_check_sum, rar5_keys, AES_BLOCK};
use super::reader::ByteReader;
use super::{classify, Entry, Inspection, Walk, RAR5_SIGNATURE};
use crate::error::InspectError;
use crate::types::{ArchiveFormat, StatusKind};

const HEAD_MAIN: u64 = 1;
const HEAD_FILE: u64 = 2;
const HEAD_SERVICE: u64 = 3;
const HEAD_CRYPT: u64 = 4;
const HEAD_END: u64 = 5;

const HFL_EXTRA: u64 = 0x0001;
const HFL_DATA: u64 = 0x0002;

const FHFL_DIRECTORY: u64 = 0x0001;
const FHFL_UTIME: u64 = 0x0002;
const FHFL_CRC32: u64 = 0x0004;

const FHEXTRA_CRYPT: u64 = 0x01;
const CHFL_CRYPT_PSWCHECK: u64 = 0x0001;

const MAX_HEADER_SIZE: u64 = 2 * 1024 * 1024;
const SALT_SIZE: usize = 16;

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

/// Inspect a buffer starting with the RAR 5 signature
pub(crate) fn inspect(buf: &[u8], password: Option<&str>) -> Inspection {
    let mut walk = Walk::default();
    let kind = match walk_headers(buf, password, &mut walk) {
        Ok(()) => None,
        Err(Stop::Read(e)) => {
            debug!(error = %e, entries = walk.entries.len(), "rar5 header walk stopped");
            walk.stopped = Some(e);
            None
        }
        Err(Stop::NeedPassword) => Some(StatusKind::Encrypted),
        Err(Stop::WrongPassword) => Some(StatusKind::EncryptedHeadersDecryptFail),
    };
    match kind {
        Some(kind) => {
            let mut inspection = Inspection::new(ArchiveFormat::Rar, kind, Default::default());
            inspection.details.encrypted_headers = true;
            inspection
        }
        None => classify(ArchiveFormat::Rar, walk, password),
    }
}

struct Header<'a> {
    kind: u64,
    data_size: u64,
    body: &'a [u8],
    extra: &'a [u8],
    /// CRC field through the end of the header
    len: usize,
    crc_ok: bool,
}

fn read_header(buf: &[u8]) -> Result<Header<'_>, InspectError> {
    let mut r = ByteReader::new(buf);
    let crc = r.read_u32_le()?;
    let size_start = r.position();
    let size = r.read_vint()?;
    if size == 0 || size > MAX_HEADER_SIZE {
        return Err(InspectError::Corrupt(format!("header size {}", size)));
    }
    let head = r.take(size as usize)?;
    let len = r.position();
    let crc_ok = crc32fast::hash(&buf[size_start..len]) == crc;

    let mut h = ByteReader::new(head);
    let kind = h.read_vint()?;
    let flags = h.read_vint()?;
    let extra_size = if flags & HFL_EXTRA != 0 { h.read_vint()? } else { 0 };
    let data_size = if flags & HFL_DATA != 0 { h.read_vint()? } else { 0 };
    let body_start = h.position();
    let extra_size = usize::try_from(extra_size)
        .ok()
        .filter(|e| *e <= head.len() - body_start)
        .ok_or_else(|| InspectError::Corrupt(format!("extra area {} exceeds header", extra_size)))?;
    let split = head.len() - extra_size;
    Ok(Header {
        kind,
        data_size,
        body: &head[body_start..split],
        extra: &head[split..],
        len,
        crc_ok,
    })
}

fn next_position(pos: usize, header_len: usize, data_size: u64) -> usize {
    usize::try_from(pos as u64 + header_len as u64 + data_size).unwrap_or(usize::MAX)
}

fn walk_headers(buf: &[u8], password: Option<&str>, walk: &mut Walk) -> Result<(), Stop> {
    let mut pos = RAR5_SIGNATURE.len();
    loop {
        if pos >= buf.len() {
            return Ok(());
        }
        let header = read_header(&buf[pos..])?;
        match header.kind {
            HEAD_CRYPT => {
                let password = password.ok_or(Stop::NeedPassword)?;
                let key = crypt_key(header.body, password)?;
                walk.encrypted_headers = true;
                return walk_encrypted(buf, pos + header.len, &key, walk);
            }
            HEAD_FILE => walk.push(parse_file_header(header.body, header.extra)?),
            HEAD_END => return Ok(()),
            HEAD_MAIN | HEAD_SERVICE => {}
            _ => return Ok(()),
        }
        pos = next_position(pos, header.len, header.data_size);
    }
}

/// Derive the header key from an encryption header, checking the password
/// against the stored check value when there is one
fn crypt_key(body: &[u8], password: &str) -> Result<[u8; 32], Stop> {
    let mut r = ByteReader::new(body);
    let version = r.read_vint()?;
    if version != 0 {
        return Err(InspectError::Unsupported(format!("encryption version {}", version)).into());
    }
    let flags = r.read_vint()?;
    let log2_count = r.read_u8()?;
    let salt = r.take(SALT_SIZE)?;
    let keys = rar5_keys(password, salt, log2_count)?;
    if flags & CHFL_CRYPT_PSWCHECK != 0 {
        let check = r.take(8)?;
        let sum = r.take(4)?;
        // a damaged check value is ignored rather than trusted
        if rar5_check_sum(check) == sum && keys.password_check != check {
            return Err(Stop::WrongPassword);
        }
    }
    Ok(keys.key)
}

fn walk_encrypted(buf: &[u8], mut pos: usize, key: &[u8; 32], walk: &mut Walk) -> Result<(), Stop> {
    loop {
        if pos >= buf.len() {
            return Ok(());
        }
        let mut r = ByteReader::at(buf, pos);
        let iv = r.take(AES_BLOCK)?;
        let mut first = r.take(AES_BLOCK)?.to_vec();
        aes256_cbc_decrypt(key, iv, &mut first)?;

        let mut probe = ByteReader::new(&first);
        let _crc = probe.read_u32_le()?;
        let size = probe.read_vint().unwrap_or(0);
        if size == 0 || size > MAX_HEADER_SIZE {
            if walk.entries.is_empty() {
                return Err(Stop::WrongPassword);
            }
            return Ok(());
        }
        let total = probe.position() + size as usize;
        let padded = block_align(total);

        let mut plain = ByteReader::at(buf, pos + AES_BLOCK).take(padded)?.to_vec();
        aes256_cbc_decrypt(key, iv, &mut plain)?;
        let header = match read_header(&plain[..total]) {
            Ok(header) if header.crc_ok => header,
            _ if walk.entries.is_empty() => return Err(Stop::WrongPassword),
            _ => return Ok(()),
        };

        match header.kind {
            HEAD_FILE => walk.push(parse_file_header(header.body, header.extra)?),
            HEAD_END => return Ok(()),
            HEAD_MAIN | HEAD_SERVICE => {}
            _ => return Ok(()),
        }
        pos = next_position(pos, AES_BLOCK + padded, header.data_size);
    }
}

fn parse_file_header(body: &[u8], extra: &[u8]) -> Result<Entry, InspectError> {
    let mut r = ByteReader::new(body);
    let file_flags = r.read_vint()?;
    let _unpacked = r.read_vint()?;
    let _attributes = r.read_vint()?;
    if file_flags & FHFL_UTIME != 0 {
        r.skip(4)?;
    }
    if file_flags & FHFL_CRC32 != 0 {
        r.skip(4)?;
    }
    let compression = r.read_vint()?;
    let _host_os = r.read_vint()?;
    let name_len = r.read_vint()?;
    let name = r.take(usize::try_from(name_len).unwrap_or(usize::MAX))?;
    let name = String::from_utf8_lossy(name).into_owned();

    let method = (compression >> 7) & 0x07;
    let stored = method == 0;
    Ok(Entry {
        name,
        stored,
        method: (!stored).then(|| format!("m{}", method)),
        encrypted: has_crypt_record(extra),
        is_dir: file_flags & FHFL_DIRECTORY != 0,
    })
}

fn has_crypt_record(extra: &[u8]) -> bool {
    let mut r = ByteReader::new(extra);
    while !r.is_empty() {
        let Ok(size) = r.read_vint() else {
            return false;
        };
        let Ok(record) = r.take(usize::try_from(size).unwrap_or(usize::MAX)) else {
            return false;
        };
        if ByteReader::new(record).read_vint().ok() == Some(FHEXTRA_CRYPT) {
            return true;
        }
    }
    false
}
