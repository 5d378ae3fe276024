//! ZIP local file header walk. The central directory lives at the end of the
//! archive and is never available, so only local headers are read.

use super::reader::ByteReader;
use super::{classify, Entry, Inspection, Walk};
use crate::error::InspectError;
use crate::types::{ArchiveFormat, StatusKind, Verdict};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
const METHOD_STORED: u16 = 0;
const METHOD_AES: u16 = 99;
const EXTRA_AES: u16 = 0x9901;
const ZIP64_MARKER: u32 = 0xFFFF_FFFF;

/// Inspect a buffer starting with a local file header
pub(crate) fn inspect(buf: &[u8], password: Option<&str>) -> Inspection {
    let mut walk = Walk::default();
    let mut r = ByteReader::new(buf);
    loop {
        match next_entry(&mut r) {
            Ok(Some(Next::Entry(entry, skip))) => {
                walk.push(entry);
                // sizes live in a data descriptor after the data
                let Some(skip) = skip else { break };
                if let Err(e) = r.skip_u64(skip) {
                    walk.stopped = Some(e);
                    break;
                }
            }
            Ok(Some(Next::Zip64(entry))) => {
                walk.push(entry);
                let mut inspection = classify(ArchiveFormat::Zip, walk, password);
                if inspection.verdict() != Verdict::Blocker {
                    inspection.status.kind = StatusKind::InsufficientData;
                    inspection.details.playable_entry = None;
                    inspection.details.note = Some("zip64 sizes are not supported".into());
                }
                return inspection;
            }
            Ok(None) => break,
            Err(e) => {
                walk.stopped = Some(e);
                break;
            }
        }
    }
    classify(ArchiveFormat::Zip, walk, password)
}

enum Next {
    /// Entry plus the size of its data, `None` when deferred to a descriptor
    Entry(Entry, Option<u64>),
    Zip64(Entry),
}

fn next_entry(r: &mut ByteReader<'_>) -> Result<Option<Next>, InspectError> {
    if r.is_empty() {
        return Ok(None);
    }
    let mut peek = r.clone();
    if peek.read_u32_le()? != LOCAL_HEADER_SIG {
        // central directory or data descriptor
        return Ok(None);
    }
    r.skip(4)?;
    let _version = r.read_u16_le()?;
    let flags = r.read_u16_le()?;
    let mut method = r.read_u16_le()?;
    let _mtime = r.read_u16_le()?;
    let _mdate = r.read_u16_le()?;
    let _crc = r.read_u32_le()?;
    let compressed_size = r.read_u32_le()?;
    let _uncompressed = r.read_u32_le()?;
    let name_len = r.read_u16_le()? as usize;
    let extra_len = r.read_u16_le()? as usize;
    let name = String::from_utf8_lossy(r.take(name_len)?).into_owned();
    let extra = r.take(extra_len)?;

    if method == METHOD_AES
        && let Some(actual) = aes_actual_method(extra)
    {
        method = actual;
    }
    let stored = method == METHOD_STORED;
    let entry = Entry {
        is_dir: name.ends_with('/'),
        name,
        stored,
        method: (!stored).then(|| method_name(method)),
        encrypted: flags & FLAG_ENCRYPTED != 0,
    };

    if compressed_size == ZIP64_MARKER {
        return Ok(Some(Next::Zip64(entry)));
    }
    let deferred = flags & FLAG_DATA_DESCRIPTOR != 0 && compressed_size == 0 && !entry.is_dir;
    let skip = (!deferred).then_some(u64::from(compressed_size));
    Ok(Some(Next::Entry(entry, skip)))
}

/// Real compression method of a WinZip AES entry
fn aes_actual_method(extra: &[u8]) -> Option<u16> {
    let mut r = ByteReader::new(extra);
    while r.remaining() >= 4 {
        let id = r.read_u16_le().ok()?;
        let size = r.read_u16_le().ok()? as usize;
        let data = r.take(size).ok()?;
        if id == EXTRA_AES && data.len() >= 7 {
            return Some(u16::from_le_bytes([data[5], data[6]]));
        }
    }
    None
}

fn method_name(method: u16) -> String {
    match method {
        8 => "deflate".to_string(),
        9 => "deflate64".to_string(),
        12 => "bzip2".to_string(),
        14 => "lzma".to_string(),
        93 => "zstd".to_string(),
        95 => "xz".to_string(),
        other => format!("method-{}", other),
    }
}
