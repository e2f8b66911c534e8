//! Low-level byte buffer reading and writing.
//!
//! Both backends read frames through [`WireReader`]; each one fixes its own
//! byte order when constructing the reader (MySQL is little-endian, Postgres
//! is big-endian). Reading past the end of the buffer is a protocol error.

use bytes::BufMut;

use crate::error::{Error, Result};

/// Length-encoded integer prefix bytes (MySQL).
pub const LENENC_NULL: u8 = 0xFB;
pub const LENENC_U16: u8 = 0xFC;
pub const LENENC_U24: u8 = 0xFD;
pub const LENENC_U64: u8 = 0xFE;

/// Byte order of multi-byte integers on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A cursor over an immutable frame payload.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    /// `None` once [`WireReader::read_all`] has consumed the buffer.
    pos: Option<usize>,
    endian: Endian,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self {
            data,
            pos: Some(0),
            endian,
        }
    }

    pub fn little_endian(data: &'a [u8]) -> Self {
        Self::new(data, Endian::Little)
    }

    pub fn big_endian(data: &'a [u8]) -> Self {
        Self::new(data, Endian::Big)
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos.unwrap_or(self.data.len())
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.pos.and_then(|pos| self.data.get(pos).copied())
    }

    /// Read exactly `n` bytes.
    pub fn read(&mut self, n: usize) -> Result<&'a [u8]> {
        let pos = self
            .pos
            .ok_or_else(|| Error::protocol("read after read_all"))?;
        let end = pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                Error::protocol(format!(
                    "frame too short: wanted {} bytes at offset {}, have {}",
                    n,
                    pos,
                    self.data.len()
                ))
            })?;
        self.pos = Some(end);
        Ok(&self.data[pos..end])
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read(n).map(|_| ())
    }

    /// Read everything that is left. Any further read fails.
    pub fn read_all(&mut self) -> &'a [u8] {
        let pos = self.position();
        self.pos = None;
        &self.data[pos..]
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read(2)?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes([b[0], b[1]]),
            Endian::Big => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let b = self.read(3)?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes([b[0], b[1], b[2], 0]),
            Endian::Big => u32::from_be_bytes([0, b[0], b[1], b[2]]),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read(4)?;
        let arr = [b[0], b[1], b[2], b[3]];
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(arr),
            Endian::Big => u32::from_be_bytes(arr),
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(arr),
            Endian::Big => u64::from_be_bytes(arr),
        })
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.read_u16().map(|v| v as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_u32().map(|v| v as i32)
    }

    /// Read a null-terminated string, without the terminator.
    ///
    /// Returns `None` (and leaves the position untouched) when no
    /// terminator is present.
    pub fn read_cstr(&mut self) -> Option<&'a [u8]> {
        let pos = self.pos?;
        let len = self.data[pos..].iter().position(|b| *b == 0)?;
        self.pos = Some(pos + len + 1);
        Some(&self.data[pos..pos + len])
    }

    /// Like [`WireReader::read_cstr`], but a missing terminator is an error.
    pub fn read_cstr_required(&mut self) -> Result<&'a [u8]> {
        self.read_cstr()
            .ok_or_else(|| Error::protocol("missing null terminator in string"))
    }

    /// Read a MySQL length-encoded integer. `None` is the NULL marker.
    ///
    /// The multi-byte forms are always little-endian.
    pub fn read_lenenc_int(&mut self) -> Result<Option<u64>> {
        let first = self.read_u8()?;
        let value = match first {
            0x00..=0xFA => u64::from(first),
            LENENC_NULL => return Ok(None),
            LENENC_U16 => {
                let b = self.read(2)?;
                u64::from(u16::from_le_bytes([b[0], b[1]]))
            }
            LENENC_U24 => {
                let b = self.read(3)?;
                u64::from(u32::from_le_bytes([b[0], b[1], b[2], 0]))
            }
            LENENC_U64 => {
                let b = self.read(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                u64::from_le_bytes(arr)
            }
            _ => {
                return Err(Error::protocol(format!(
                    "invalid length-encoded integer prefix 0x{:02x}",
                    first
                )))
            }
        };
        Ok(Some(value))
    }

    /// Read a MySQL length-encoded string. `None` is SQL NULL.
    pub fn read_lenenc_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        match self.read_lenenc_int()? {
            Some(len) => {
                let len = usize::try_from(len)
                    .map_err(|_| Error::protocol("length-encoded string too long"))?;
                self.read(len).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Write a MySQL length-encoded integer.
pub fn put_lenenc_int<B: BufMut>(buf: &mut B, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < (1 << 16) {
        buf.put_u8(LENENC_U16);
        buf.put_u16_le(value as u16);
    } else if value < (1 << 24) {
        buf.put_u8(LENENC_U24);
        buf.put_slice(&(value as u32).to_le_bytes()[..3]);
    } else {
        buf.put_u8(LENENC_U64);
        buf.put_u64_le(value);
    }
}

/// Write a MySQL length-encoded string.
pub fn put_lenenc_bytes<B: BufMut>(buf: &mut B, data: &[u8]) {
    put_lenenc_int(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Write a null-terminated string.
pub fn put_cstr<B: BufMut>(buf: &mut B, data: &[u8]) {
    buf.put_slice(data);
    buf.put_u8(0);
}
