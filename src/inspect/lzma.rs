//! LZMA / LZMA2 bridge for 7z encoded headers, on top of liblzma raw decoders.
//!
//! 7z stores coder properties separately from the stream, so the filter chain
//! is rebuilt from those properties and the payload fed to a raw decoder. LZMA1
//! streams in 7z usually have no end marker; decoding stops once the declared
//! unpack size has been produced.

use liblzma::stream::{Action, Error as LzmaError, Filters, LzmaOptions, Status, Stream};

use crate::error::InspectError;

/// Upper bound on a decompressed header; anything larger is not a header.
pub(crate) const MAX_HEADER_UNPACK: u64 = 64 * 1024 * 1024;

/// LZMA coder properties: `lc/lp/pb` byte plus 32-bit dictionary size
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LzmaProps {
    pub lc: u32,
    pub lp: u32,
    pub pb: u32,
    pub dict_size: u32,
}

impl LzmaProps {
    pub(crate) fn parse(props: &[u8]) -> Result<Self, InspectError> {
        if props.len() < 5 {
            return Err(InspectError::Corrupt(format!(
                "LZMA properties need 5 bytes, got {}",
                props.len()
            )));
        }
        let mut d = u32::from(props[0]);
        if d >= 9 * 5 * 5 {
            return Err(InspectError::Corrupt(format!("bad LZMA properties byte {}", d)));
        }
        let lc = d % 9;
        d /= 9;
        let lp = d % 5;
        let pb = d / 5;
        let dict_size = u32::from_le_bytes([props[1], props[2], props[3], props[4]]);
        Ok(Self {
            lc,
            lp,
            pb,
            dict_size,
        })
    }
}

/// Dictionary size encoded in the single LZMA2 property byte
pub(crate) fn lzma2_dict_size(prop: u8) -> Result<u32, InspectError> {
    match prop {
        40 => Ok(u32::MAX),
        p if p < 40 => Ok((2 | u32::from(p & 1)) << (p / 2 + 11)),
        p => Err(InspectError::Corrupt(format!("bad LZMA2 dictionary byte {}", p))),
    }
}

fn xz_err(e: LzmaError) -> InspectError {
    InspectError::Corrupt(format!("LZMA: {}", e))
}

fn options(dict_size: u32) -> Result<LzmaOptions, InspectError> {
    let mut opts = LzmaOptions::new_preset(6).map_err(xz_err)?;
    // liblzma rejects dictionaries below 4 KiB
    opts.dict_size(dict_size.max(4096));
    Ok(opts)
}

/// Decode a raw LZMA1 stream described by 7z coder properties
pub(crate) fn decode_lzma(props: &[u8], input: &[u8], unpack_size: u64) -> Result<Vec<u8>, InspectError> {
    let props = LzmaProps::parse(props)?;
    let mut opts = options(props.dict_size)?;
    opts.literal_context_bits(props.lc)
        .literal_position_bits(props.lp)
        .position_bits(props.pb);
    let mut filters = Filters::new();
    filters.lzma1(&opts);
    run(Stream::new_raw_decoder(&filters).map_err(xz_err)?, input, unpack_size)
}

/// Decode a raw LZMA2 stream described by its 7z property byte
pub(crate) fn decode_lzma2(props: &[u8], input: &[u8], unpack_size: u64) -> Result<Vec<u8>, InspectError> {
    let prop = *props
        .first()
        .ok_or_else(|| InspectError::Corrupt("missing LZMA2 property".into()))?;
    let opts = options(lzma2_dict_size(prop)?)?;
    let mut filters = Filters::new();
    filters.lzma2(&opts);
    run(Stream::new_raw_decoder(&filters).map_err(xz_err)?, input, unpack_size)
}

fn run(mut stream: Stream, input: &[u8], unpack_size: u64) -> Result<Vec<u8>, InspectError> {
    if unpack_size > MAX_HEADER_UNPACK {
        return Err(InspectError::Unsupported(format!(
            "header unpack size {} too large",
            unpack_size
        )));
    }
    let target = unpack_size as usize;
    let mut out = Vec::with_capacity(target);
    while out.len() < target {
        let consumed = stream.total_in() as usize;
        let produced = out.len();
        let status = stream
            .process_vec(&input[consumed.min(input.len())..], &mut out, Action::Run)
            .map_err(xz_err)?;
        if matches!(status, Status::StreamEnd) {
            break;
        }
        if stream.total_in() as usize == consumed && out.len() == produced {
            break;
        }
    }
    if out.len() < target {
        return Err(InspectError::Truncated {
            needed: target,
            available: out.len(),
        });
    }
    out.truncate(target);
    Ok(out)
}
