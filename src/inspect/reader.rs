//! Bounds-checked little-endian cursor over a decoded buffer.
//!
//! Every read returns [`InspectError::Truncated`] instead of panicking, which is
//! how the inspectors tell "ran out of decoded bytes" apart from "malformed".

use crate::error::InspectError;

/// Cursor over a byte slice
#[derive(Debug, Clone)]
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

pub(crate) type ReadResult<T> = Result<T, InspectError>;

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn take(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(InspectError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, n: usize) -> ReadResult<()> {
        self.take(n).map(|_| ())
    }

    /// Skip a length taken from the buffer itself, which may not fit in usize.
    pub(crate) fn skip_u64(&mut self, n: u64) -> ReadResult<()> {
        let n = usize::try_from(n).map_err(|_| InspectError::Truncated {
            needed: usize::MAX,
            available: self.remaining(),
        })?;
        self.skip(n)
    }

    pub(crate) fn read_u8(&mut self) -> ReadResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16_le(&mut self) -> ReadResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u32_le(&mut self) -> ReadResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u64_le(&mut self) -> ReadResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    /// RAR5 variable-length integer: 7 bits per byte, high bit = continuation.
    pub(crate) fn read_vint(&mut self) -> ReadResult<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(InspectError::Corrupt("vint longer than 10 bytes".into()))
    }

    /// 7z NUMBER: leading one-bits of the first byte count the extra bytes.
    pub(crate) fn read_7z_number(&mut self) -> ReadResult<u64> {
        let first = self.read_u8()?;
        let mut mask = 0x80u8;
        let mut value = 0u64;
        for i in 0..8 {
            if first & mask == 0 {
                let high = u64::from(first & mask.wrapping_sub(1));
                value |= high << (8 * i);
                return Ok(value);
            }
            value |= u64::from(self.read_u8()?) << (8 * i);
            mask >>= 1;
        }
        Ok(value)
    }

    /// 7z NUMBER narrowed to usize, for counts that index memory.
    pub(crate) fn read_7z_count(&mut self, limit: usize) -> ReadResult<usize> {
        let value = self.read_7z_number()?;
        usize::try_from(value)
            .ok()
            .filter(|v| *v <= limit)
            .ok_or_else(|| InspectError::Corrupt(format!("count {} exceeds {}", value, limit)))
    }
}
