//! 7z inspector
//!
//! A 7z archive starts with a 32-byte signature header pointing at the real
//! header near the end of the archive:
//!
//! ```text
//! '7z\xBC\xAF\x27\x1C' | version u16 | StartHeaderCRC u32 | NextHeaderOffset u64 | NextHeaderSize u64 | NextHeaderCRC u32
//! ```
//!
//! The header is either plain (`kHeader`) or an `kEncodedHeader` describing a
//! packed stream (LZMA, LZMA2 and/or 7zAES) that decodes to the plain header.
//! Since the header usually sits at the end of a multi-gigabyte archive, the
//! first segment alone rarely reaches it; [`inspect_tail`] works on an
//! [`ArchiveWindow`] of bytes fetched from arbitrary offsets and asks for more
//! through [`Tail::Needs`].

use std::collections::BTreeMap;

use tracing::debug;

use super::crypto::{aes256_cbc_decrypt, sevenzip_key, AES_BLOCK};
use super::lzma::{decode_lzma, decode_lzma2, MAX_HEADER_UNPACK};
use super::reader::ByteReader;
use super::{classify, Entry, Inspection, Walk, SEVENZIP_SIGNATURE};
use crate::error::InspectError;
use crate::types::{ArchiveFormat, StatusKind};

/// Size of the signature header; header offsets are relative to its end
pub const START_HEADER_SIZE: u64 = 32;

const K_END: u8 = 0x00;
const K_HEADER: u8 = 0x01;
const K_ARCHIVE_PROPERTIES: u8 = 0x02;
const K_ADDITIONAL_STREAMS_INFO: u8 = 0x03;
const K_MAIN_STREAMS_INFO: u8 = 0x04;
const K_FILES_INFO: u8 = 0x05;
const K_PACK_INFO: u8 = 0x06;
const K_UNPACK_INFO: u8 = 0x07;
const K_SUBSTREAMS_INFO: u8 = 0x08;
const K_SIZE: u8 = 0x09;
const K_CRC: u8 = 0x0A;
const K_FOLDER: u8 = 0x0B;
const K_CODERS_UNPACK_SIZE: u8 = 0x0C;
const K_NUM_UNPACK_STREAM: u8 = 0x0D;
const K_EMPTY_STREAM: u64 = 0x0E;
const K_EMPTY_FILE: u64 = 0x0F;
const K_NAME: u64 = 0x11;
const K_ENCODED_HEADER: u8 = 0x17;

const METHOD_COPY: &[u8] = &[0x00];
const METHOD_LZMA: &[u8] = &[0x03, 0x01, 0x01];
const METHOD_LZMA2: &[u8] = &[0x21];
const METHOD_AES: &[u8] = &[0x06, 0xF1, 0x07, 0x01];

const MAX_ITEMS: usize = 1 << 20;
const MAX_CODERS: usize = 32;
const MAX_ENCODED_DEPTH: usize = 2;

/// Location of the end header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StartHeader {
    /// Offset of the end header relative to the end of the signature header
    pub next_header_offset: u64,
    /// Size of the end header
    pub next_header_size: u64,
    /// CRC32 of the end header
    pub next_header_crc: u32,
}

impl StartHeader {
    /// Absolute offset of the end header within the archive
    pub fn header_offset(&self) -> u64 {
        START_HEADER_SIZE.saturating_add(self.next_header_offset)
    }
}

/// Parse the signature header at the start of `buf`
pub fn parse_start_header(buf: &[u8]) -> Result<StartHeader, InspectError> {
    let mut r = ByteReader::new(buf);
    if r.take(SEVENZIP_SIGNATURE.len())? != SEVENZIP_SIGNATURE {
        return Err(InspectError::Corrupt("missing 7z signature".into()));
    }
    let _version = r.read_u16_le()?;
    let start_crc = r.read_u32_le()?;
    let fields = r.take(20)?;
    if crc32fast::hash(fields) != start_crc {
        return Err(InspectError::Corrupt("start header CRC mismatch".into()));
    }
    let mut f = ByteReader::new(fields);
    Ok(StartHeader {
        next_header_offset: f.read_u64_le()?,
        next_header_size: f.read_u64_le()?,
        next_header_crc: f.read_u32_le()?,
    })
}

/// Archive bytes known at absolute offsets
#[derive(Clone, Debug, Default)]
pub struct ArchiveWindow {
    chunks: BTreeMap<u64, Vec<u8>>,
}

impl ArchiveWindow {
    /// Empty window
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `data` as the archive bytes starting at `offset`
    pub fn insert(&mut self, offset: u64, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        match self.chunks.get(&offset) {
            Some(existing) if existing.len() >= data.len() => {}
            _ => {
                self.chunks.insert(offset, data);
            }
        }
    }

    /// Whether `[offset, offset + len)` is fully known
    pub fn contains(&self, offset: u64, len: u64) -> bool {
        self.read(offset, len).is_some()
    }

    /// First offset in `[offset, offset + len)` the window does not hold
    pub fn first_gap(&self, offset: u64, len: u64) -> Option<u64> {
        let end = offset.saturating_add(len);
        let mut cursor = offset;
        while cursor < end {
            let covering = self
                .chunks
                .range(..=cursor)
                .rev()
                .find(|(start, chunk)| **start + chunk.len() as u64 > cursor);
            match covering {
                Some((start, chunk)) => cursor = start + chunk.len() as u64,
                None => return Some(cursor),
            }
        }
        None
    }

    /// Copy `[offset, offset + len)` out of the window, stitching chunks
    pub fn read(&self, offset: u64, len: u64) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        let mut out = Vec::with_capacity(usize::try_from(len).ok()?);
        let mut cursor = offset;
        while cursor < end {
            let (start, chunk) = self.chunks.range(..=cursor).rev().find(|(start, chunk)| {
                **start + chunk.len() as u64 > cursor
            })?;
            let from = (cursor - start) as usize;
            let to = (end - start).min(chunk.len() as u64) as usize;
            out.extend_from_slice(&chunk[from..to]);
            cursor = start + to as u64;
        }
        Some(out)
    }
}

/// Outcome of [`inspect_tail`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tail {
    /// The header was reached and classified
    Inspected(Inspection),
    /// These archive bytes are needed before the header can be classified
    Needs {
        /// Absolute archive offset
        offset: u64,
        /// Byte count
        len: u64,
    },
}

/// Inspect a buffer holding the start of a 7z archive
pub(crate) fn inspect(buf: &[u8], password: Option<&str>) -> Inspection {
    let start = match parse_start_header(buf) {
        Ok(start) => start,
        Err(e) => {
            let kind = match e {
                InspectError::Truncated { .. } => StatusKind::InsufficientData,
                _ => StatusKind::CorruptHeader,
            };
            let mut inspection = Inspection::new(ArchiveFormat::SevenZip, kind, Default::default());
            inspection.details.note = Some(e.to_string());
            return inspection;
        }
    };
    let mut window = ArchiveWindow::new();
    window.insert(0, buf.to_vec());
    match inspect_tail(&start, &window, password) {
        Tail::Inspected(inspection) => inspection,
        Tail::Needs { .. } => {
            Inspection::new(ArchiveFormat::SevenZip, StatusKind::SignatureOk, Default::default())
        }
    }
}

/// Classify the archive from its end header, using whatever `window` holds
pub fn inspect_tail(start: &StartHeader, window: &ArchiveWindow, password: Option<&str>) -> Tail {
    if start.next_header_size == 0 {
        // empty archive
        return Tail::Inspected(Inspection::new(
            ArchiveFormat::SevenZip,
            StatusKind::Untested,
            Default::default(),
        ));
    }
    if start.next_header_size > MAX_HEADER_UNPACK {
        return Tail::Inspected(corrupt(format!(
            "header size {} too large",
            start.next_header_size
        )));
    }
    let offset = start.header_offset();
    let Some(header) = window.read(offset, start.next_header_size) else {
        return Tail::Needs {
            offset,
            len: start.next_header_size,
        };
    };
    if crc32fast::hash(&header) != start.next_header_crc {
        return Tail::Inspected(corrupt("end header CRC mismatch".into()));
    }

    let mut encrypted_headers = false;
    match read_header(&header, window, password, 0, &mut encrypted_headers) {
        Ok(walk) => Tail::Inspected(classify(ArchiveFormat::SevenZip, walk, password)),
        Err(Stop::Needs { offset, len }) => Tail::Needs { offset, len },
        Err(Stop::NeedPassword) => Tail::Inspected(encrypted(StatusKind::Encrypted)),
        Err(Stop::WrongPassword) => {
            Tail::Inspected(encrypted(StatusKind::EncryptedHeadersDecryptFail))
        }
        Err(Stop::Read(e)) => {
            debug!(error = %e, "7z header parse failed");
            let kind = match e {
                InspectError::Truncated { .. } => StatusKind::InsufficientData,
                _ => StatusKind::CorruptHeader,
            };
            let mut inspection = Inspection::new(ArchiveFormat::SevenZip, kind, Default::default());
            inspection.details.encrypted_headers = encrypted_headers;
            inspection.details.note = Some(e.to_string());
            Tail::Inspected(inspection)
        }
    }
}

fn corrupt(note: String) -> Inspection {
    let mut inspection =
        Inspection::new(ArchiveFormat::SevenZip, StatusKind::CorruptHeader, Default::default());
    inspection.details.note = Some(note);
    inspection
}

fn encrypted(kind: StatusKind) -> Inspection {
    let mut inspection = Inspection::new(ArchiveFormat::SevenZip, kind, Default::default());
    inspection.details.encrypted_headers = true;
    inspection
}

enum Stop {
    NeedPassword,
    WrongPassword,
    Needs { offset: u64, len: u64 },
    Read(InspectError),
}

impl From<InspectError> for Stop {
    fn from(e: InspectError) -> Self {
        Stop::Read(e)
    }
}

#[derive(Clone, Debug, Default)]
struct Coder {
    id: Vec<u8>,
    props: Vec<u8>,
    num_in: usize,
    num_out: usize,
}

#[derive(Clone, Debug, Default)]
struct Folder {
    coders: Vec<Coder>,
    /// (in index, out index)
    bind_pairs: Vec<(usize, usize)>,
    unpack_sizes: Vec<u64>,
    crc: Option<u32>,
    /// Streams this folder unpacks into (from SubStreamsInfo)
    num_unpack_streams: usize,
}

impl Folder {
    fn is_simple(&self) -> bool {
        self.coders.iter().all(|c| c.num_in == 1 && c.num_out == 1)
    }

    fn has_aes(&self) -> bool {
        self.coders.iter().any(|c| c.id == METHOD_AES)
    }

    /// The output stream no bind pair consumes
    fn main_output(&self) -> Option<usize> {
        let total: usize = self.coders.iter().map(|c| c.num_out).sum();
        (0..total).find(|out| !self.bind_pairs.iter().any(|(_, o)| o == out))
    }

    /// First coder that is neither Copy nor AES
    fn compression(&self) -> Option<&Coder> {
        self.coders
            .iter()
            .find(|c| c.id != METHOD_COPY && c.id != METHOD_AES)
    }
}

#[derive(Debug, Default)]
struct StreamsInfo {
    pack_pos: u64,
    pack_sizes: Vec<u64>,
    folders: Vec<Folder>,
}

fn read_header(
    header: &[u8],
    window: &ArchiveWindow,
    password: Option<&str>,
    depth: usize,
    encrypted_headers: &mut bool,
) -> Result<Walk, Stop> {
    let mut r = ByteReader::new(header);
    match r.read_u8()? {
        K_HEADER => {
            let mut walk = parse_plain_header(&mut r)?;
            walk.encrypted_headers = *encrypted_headers;
            Ok(walk)
        }
        K_ENCODED_HEADER if depth < MAX_ENCODED_DEPTH => {
            let streams = parse_streams_info(&mut r)?;
            let decoded = decode_encoded_header(&streams, window, password, encrypted_headers)?;
            read_header(&decoded, window, password, depth + 1, encrypted_headers)
        }
        other => Err(InspectError::Corrupt(format!("unexpected header property {:#04x}", other)).into()),
    }
}

fn decode_encoded_header(
    streams: &StreamsInfo,
    window: &ArchiveWindow,
    password: Option<&str>,
    encrypted_headers: &mut bool,
) -> Result<Vec<u8>, Stop> {
    let folder = streams
        .folders
        .first()
        .ok_or_else(|| InspectError::Corrupt("encoded header without folder".into()))?;
    let pack_size = *streams
        .pack_sizes
        .first()
        .ok_or_else(|| InspectError::Corrupt("encoded header without pack stream".into()))?;
    if !folder.is_simple() {
        return Err(InspectError::Unsupported("complex coder in encoded header".into()).into());
    }
    let has_aes = folder.has_aes();
    *encrypted_headers |= has_aes;
    if has_aes && password.is_none() {
        return Err(Stop::NeedPassword);
    }

    let offset = START_HEADER_SIZE.saturating_add(streams.pack_pos);
    let packed = window.read(offset, pack_size).ok_or(Stop::Needs {
        offset,
        len: pack_size,
    })?;

    let main = folder
        .main_output()
        .ok_or_else(|| InspectError::Corrupt("folder without main output".into()))?;
    let decoded = match decode_stream(folder, main, &packed, password, 0) {
        Ok(decoded) => decoded,
        Err(Stop::Read(e)) if has_aes => {
            debug!(error = %e, "encrypted 7z header did not decode");
            return Err(Stop::WrongPassword);
        }
        Err(e) => return Err(e),
    };

    let verified = match folder.crc {
        Some(crc) => crc32fast::hash(&decoded) == crc,
        None => !has_aes || decoded.first() == Some(&K_HEADER),
    };
    if !verified {
        if has_aes {
            return Err(Stop::WrongPassword);
        }
        return Err(InspectError::Corrupt("encoded header CRC mismatch".into()).into());
    }
    Ok(decoded)
}

/// Produce output stream `out` of a folder of simple coders, following bind
/// pairs back to the packed stream
fn decode_stream(
    folder: &Folder,
    out: usize,
    packed: &[u8],
    password: Option<&str>,
    depth: usize,
) -> Result<Vec<u8>, Stop> {
    if depth > folder.coders.len() {
        return Err(InspectError::Corrupt("cyclic bind pairs".into()).into());
    }
    let coder = folder
        .coders
        .get(out)
        .ok_or_else(|| InspectError::Corrupt(format!("no coder for stream {}", out)))?;
    let size = *folder
        .unpack_sizes
        .get(out)
        .ok_or_else(|| InspectError::Corrupt(format!("no unpack size for stream {}", out)))?;
    let input = match folder.bind_pairs.iter().find(|(i, _)| *i == out) {
        Some((_, source)) => decode_stream(folder, *source, packed, password, depth + 1)?,
        None => packed.to_vec(),
    };
    apply_coder(coder, input, size, password)
}

fn apply_coder(coder: &Coder, mut input: Vec<u8>, size: u64, password: Option<&str>) -> Result<Vec<u8>, Stop> {
    let size_usize = usize::try_from(size)
        .ok()
        .filter(|s| *s as u64 <= MAX_HEADER_UNPACK)
        .ok_or_else(|| InspectError::Unsupported(format!("stream size {}", size)))?;
    match coder.id.as_slice() {
        METHOD_COPY => {
            if input.len() < size_usize {
                return Err(InspectError::Truncated {
                    needed: size_usize,
                    available: input.len(),
                }
                .into());
            }
            input.truncate(size_usize);
            Ok(input)
        }
        METHOD_LZMA => Ok(decode_lzma(&coder.props, &input, size)?),
        METHOD_LZMA2 => Ok(decode_lzma2(&coder.props, &input, size)?),
        METHOD_AES => {
            let password = password.ok_or(Stop::NeedPassword)?;
            let params = AesParams::parse(&coder.props)?;
            let key = sevenzip_key(password, &params.salt, params.cycles_power)?;
            input.truncate(input.len() / AES_BLOCK * AES_BLOCK);
            aes256_cbc_decrypt(&key, &params.iv, &mut input)?;
            if input.len() < size_usize {
                return Err(InspectError::Truncated {
                    needed: size_usize,
                    available: input.len(),
                }
                .into());
            }
            input.truncate(size_usize);
            Ok(input)
        }
        other => Err(InspectError::Unsupported(format!("coder {}", hex(other))).into()),
    }
}

/// 7zAES coder properties
struct AesParams {
    cycles_power: u8,
    salt: Vec<u8>,
    iv: [u8; 16],
}

impl AesParams {
    fn parse(props: &[u8]) -> Result<Self, InspectError> {
        let mut r = ByteReader::new(props);
        let first = r.read_u8()?;
        let cycles_power = first & 0x3F;
        if first & 0xC0 == 0 {
            return Ok(Self {
                cycles_power,
                salt: Vec::new(),
                iv: [0; 16],
            });
        }
        let second = r.read_u8()?;
        let salt_size = usize::from((first >> 7) & 1) + usize::from(second >> 4);
        let iv_size = usize::from((first >> 6) & 1) + usize::from(second & 0x0F);
        let salt = r.take(salt_size)?.to_vec();
        let mut iv = [0u8; 16];
        iv[..iv_size].copy_from_slice(r.take(iv_size)?);
        Ok(Self {
            cycles_power,
            salt,
            iv,
        })
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn method_label(id: &[u8]) -> String {
    match id {
        METHOD_LZMA => "lzma".to_string(),
        METHOD_LZMA2 => "lzma2".to_string(),
        [0x03, 0x04, 0x01] => "ppmd".to_string(),
        [0x04, 0x01, 0x08] => "deflate".to_string(),
        [0x04, 0x02, 0x02] => "bzip2".to_string(),
        [0x03, 0x03, 0x01, 0x03] => "bcj".to_string(),
        [0x03, 0x03, 0x01, 0x1B] => "bcj2".to_string(),
        other => hex(other),
    }
}

fn expect_property(r: &mut ByteReader<'_>, expected: u8) -> Result<(), InspectError> {
    let found = r.read_u8()?;
    if found != expected {
        return Err(InspectError::Corrupt(format!(
            "expected property {:#04x}, found {:#04x}",
            expected, found
        )));
    }
    Ok(())
}

fn parse_plain_header(r: &mut ByteReader<'_>) -> Result<Walk, InspectError> {
    let mut id = r.read_u8()?;
    if id == K_ARCHIVE_PROPERTIES {
        loop {
            let kind = r.read_u8()?;
            if kind == K_END {
                break;
            }
            let size = r.read_7z_number()?;
            r.skip_u64(size)?;
        }
        id = r.read_u8()?;
    }
    if id == K_ADDITIONAL_STREAMS_INFO {
        parse_streams_info(r)?;
        id = r.read_u8()?;
    }
    let mut main = StreamsInfo::default();
    if id == K_MAIN_STREAMS_INFO {
        main = parse_streams_info(r)?;
        id = r.read_u8()?;
    }
    let mut files = Vec::new();
    if id == K_FILES_INFO {
        files = parse_files_info(r)?;
        id = r.read_u8()?;
    }
    if id != K_END {
        return Err(InspectError::Corrupt(format!("unexpected property {:#04x}", id)));
    }
    Ok(build_walk(&main.folders, files))
}

struct FileItem {
    name: String,
    has_stream: bool,
    is_dir: bool,
}

/// Pair files carrying data with the folders that hold it, in order
fn build_walk(folders: &[Folder], files: Vec<FileItem>) -> Walk {
    let mut walk = Walk::default();
    let mut streams = folders
        .iter()
        .flat_map(|folder| std::iter::repeat_n(folder, folder.num_unpack_streams));
    for file in files {
        let folder = if file.has_stream { streams.next() } else { None };
        let mut entry = Entry::file(file.name, true);
        entry.is_dir = file.is_dir;
        if let Some(folder) = folder {
            entry.encrypted = folder.has_aes();
            if let Some(coder) = folder.compression() {
                entry.stored = false;
                entry.method = Some(method_label(&coder.id));
            }
        }
        walk.push(entry);
    }
    if walk.entries.is_empty() {
        for (index, folder) in folders.iter().enumerate() {
            let mut entry = Entry::file(format!("<stream {}>", index), folder.compression().is_none());
            entry.encrypted = folder.has_aes();
            entry.method = folder.compression().map(|c| method_label(&c.id));
            walk.push(entry);
        }
    }
    walk
}

fn parse_streams_info(r: &mut ByteReader<'_>) -> Result<StreamsInfo, InspectError> {
    let mut info = StreamsInfo::default();
    loop {
        match r.read_u8()? {
            K_PACK_INFO => {
                info.pack_pos = r.read_7z_number()?;
                let count = r.read_7z_count(MAX_ITEMS)?;
                loop {
                    match r.read_u8()? {
                        K_SIZE => {
                            info.pack_sizes = (0..count)
                                .map(|_| r.read_7z_number())
                                .collect::<Result<_, _>>()?;
                        }
                        K_CRC => {
                            read_digests(r, count)?;
                        }
                        K_END => break,
                        other => {
                            return Err(InspectError::Corrupt(format!(
                                "unexpected pack info property {:#04x}",
                                other
                            )));
                        }
                    }
                }
            }
            K_UNPACK_INFO => info.folders = parse_unpack_info(r)?,
            K_SUBSTREAMS_INFO => parse_substreams_info(r, &mut info.folders)?,
            K_END => return Ok(info),
            other => {
                return Err(InspectError::Corrupt(format!(
                    "unexpected streams info property {:#04x}",
                    other
                )));
            }
        }
    }
}

fn parse_unpack_info(r: &mut ByteReader<'_>) -> Result<Vec<Folder>, InspectError> {
    expect_property(r, K_FOLDER)?;
    let count = r.read_7z_count(MAX_ITEMS)?;
    if r.read_u8()? != 0 {
        return Err(InspectError::Unsupported("external folders".into()));
    }
    let mut folders = (0..count)
        .map(|_| parse_folder(r))
        .collect::<Result<Vec<_>, _>>()?;

    expect_property(r, K_CODERS_UNPACK_SIZE)?;
    for folder in &mut folders {
        let outputs: usize = folder.coders.iter().map(|c| c.num_out).sum();
        folder.unpack_sizes = (0..outputs)
            .map(|_| r.read_7z_number())
            .collect::<Result<_, _>>()?;
    }
    loop {
        match r.read_u8()? {
            K_CRC => {
                for (folder, crc) in folders.iter_mut().zip(read_digests(r, count)?) {
                    folder.crc = crc;
                }
            }
            K_END => return Ok(folders),
            other => {
                return Err(InspectError::Corrupt(format!(
                    "unexpected unpack info property {:#04x}",
                    other
                )));
            }
        }
    }
}

fn parse_folder(r: &mut ByteReader<'_>) -> Result<Folder, InspectError> {
    let num_coders = r.read_7z_count(MAX_CODERS)?;
    let mut folder = Folder {
        num_unpack_streams: 1,
        ..Default::default()
    };
    for _ in 0..num_coders {
        let flags = r.read_u8()?;
        if flags & 0x80 != 0 {
            return Err(InspectError::Unsupported("alternative coder methods".into()));
        }
        let id = r.take(usize::from(flags & 0x0F))?.to_vec();
        let (num_in, num_out) = if flags & 0x10 != 0 {
            (r.read_7z_count(MAX_CODERS)?, r.read_7z_count(MAX_CODERS)?)
        } else {
            (1, 1)
        };
        let props = if flags & 0x20 != 0 {
            let size = r.read_7z_count(MAX_ITEMS)?;
            r.take(size)?.to_vec()
        } else {
            Vec::new()
        };
        folder.coders.push(Coder {
            id,
            props,
            num_in,
            num_out,
        });
    }
    let total_out: usize = folder.coders.iter().map(|c| c.num_out).sum();
    let total_in: usize = folder.coders.iter().map(|c| c.num_in).sum();
    let bind_count = total_out.saturating_sub(1);
    for _ in 0..bind_count {
        let in_index = r.read_7z_count(MAX_CODERS)?;
        let out_index = r.read_7z_count(MAX_CODERS)?;
        folder.bind_pairs.push((in_index, out_index));
    }
    let packed = total_in.saturating_sub(bind_count);
    if packed > 1 {
        for _ in 0..packed {
            r.read_7z_number()?;
        }
    }
    Ok(folder)
}

fn parse_substreams_info(r: &mut ByteReader<'_>, folders: &mut [Folder]) -> Result<(), InspectError> {
    let mut id = r.read_u8()?;
    if id == K_NUM_UNPACK_STREAM {
        for folder in folders.iter_mut() {
            folder.num_unpack_streams = r.read_7z_count(MAX_ITEMS)?;
        }
        id = r.read_u8()?;
    }
    if id == K_SIZE {
        for folder in folders.iter() {
            for _ in 1..folder.num_unpack_streams.max(1) {
                r.read_7z_number()?;
            }
        }
        id = r.read_u8()?;
    }
    if id == K_CRC {
        let unknown: usize = folders
            .iter()
            .map(|f| {
                if f.num_unpack_streams == 1 && f.crc.is_some() {
                    0
                } else {
                    f.num_unpack_streams
                }
            })
            .sum();
        read_digests(r, unknown)?;
        id = r.read_u8()?;
    }
    if id != K_END {
        return Err(InspectError::Corrupt(format!(
            "unexpected substreams property {:#04x}",
            id
        )));
    }
    Ok(())
}

fn read_bits(r: &mut ByteReader<'_>, count: usize) -> Result<Vec<bool>, InspectError> {
    let bytes = r.take(count.div_ceil(8))?;
    Ok((0..count)
        .map(|i| bytes[i / 8] & (0x80 >> (i % 8)) != 0)
        .collect())
}

fn read_digests(r: &mut ByteReader<'_>, count: usize) -> Result<Vec<Option<u32>>, InspectError> {
    let all_defined = r.read_u8()? != 0;
    let defined = if all_defined {
        vec![true; count]
    } else {
        read_bits(r, count)?
    };
    defined
        .into_iter()
        .map(|d| if d { r.read_u32_le().map(Some) } else { Ok(None) })
        .collect()
}

fn parse_files_info(r: &mut ByteReader<'_>) -> Result<Vec<FileItem>, InspectError> {
    let count = r.read_7z_count(MAX_ITEMS)?;
    let mut names: Vec<String> = Vec::new();
    let mut empty_stream = vec![false; count];
    let mut empty_file: Vec<bool> = Vec::new();
    loop {
        let kind = r.read_7z_number()?;
        if kind == u64::from(K_END) {
            break;
        }
        let size = r.read_7z_count(MAX_HEADER_UNPACK as usize)?;
        let data = r.take(size)?;
        let mut p = ByteReader::new(data);
        match kind {
            K_EMPTY_STREAM => empty_stream = read_bits(&mut p, count)?,
            K_EMPTY_FILE => {
                let empties = empty_stream.iter().filter(|e| **e).count();
                empty_file = read_bits(&mut p, empties)?;
            }
            K_NAME => {
                if p.read_u8()? != 0 {
                    return Err(InspectError::Unsupported("external file names".into()));
                }
                names = decode_names(&data[1..]);
            }
            _ => {}
        }
    }

    let mut empty_index = 0;
    let mut files = Vec::with_capacity(count);
    for index in 0..count {
        let name = names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("<file {}>", index));
        let has_stream = !empty_stream.get(index).copied().unwrap_or(false);
        let is_dir = if has_stream {
            false
        } else {
            let file = empty_file.get(empty_index).copied().unwrap_or(false);
            empty_index += 1;
            !file
        };
        files.push(FileItem {
            name,
            has_stream,
            is_dir,
        });
    }
    Ok(files)
}

/// NUL-terminated UTF-16LE names
fn decode_names(data: &[u8]) -> Vec<String> {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    units
        .split(|u| *u == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf16_lossy(s).replace('\\', "/"))
        .collect()
}
