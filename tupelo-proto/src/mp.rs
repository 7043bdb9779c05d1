//! Low-level msgpack wire primitives.
//!
//! Writers append the canonical (minimal-width) encoding of a value
//! through [`BufMut`]. [`MpReader`] is the bounds-checked reader the
//! reply decoder is built on; it distinguishes running out of bytes
//! from hitting a marker of the wrong type so callers can map the
//! former to "need more input".

use bytes::{BufMut, BytesMut};

// One-byte markers.
pub const NIL: u8 = 0xc0;
pub const FALSE: u8 = 0xc2;
pub const TRUE: u8 = 0xc3;
pub const BIN8: u8 = 0xc4;
pub const BIN16: u8 = 0xc5;
pub const BIN32: u8 = 0xc6;
pub const FLOAT32: u8 = 0xca;
pub const FLOAT64: u8 = 0xcb;
pub const UINT8: u8 = 0xcc;
pub const UINT16: u8 = 0xcd;
pub const UINT32: u8 = 0xce;
pub const UINT64: u8 = 0xcf;
pub const INT8: u8 = 0xd0;
pub const INT16: u8 = 0xd1;
pub const INT32: u8 = 0xd2;
pub const INT64: u8 = 0xd3;
pub const STR8: u8 = 0xd9;
pub const STR16: u8 = 0xda;
pub const STR32: u8 = 0xdb;
pub const ARRAY16: u8 = 0xdc;
pub const ARRAY32: u8 = 0xdd;
pub const MAP16: u8 = 0xde;
pub const MAP32: u8 = 0xdf;

/// Largest element count a fixarray/fixmap header can carry.
pub const FIX_CONTAINER_MAX: u32 = 15;

/// Errors from [`MpReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpError {
    /// The buffer ended before the value did.
    Truncated,
    /// The marker at the read position does not match the requested type.
    UnexpectedType,
}

pub fn put_nil(buf: &mut BytesMut) {
    buf.put_u8(NIL);
}

pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(if value { TRUE } else { FALSE });
}

pub fn put_uint(buf: &mut BytesMut, value: u64) {
    if value < 0x80 {
        buf.put_u8(value as u8);
    } else if value <= u8::MAX as u64 {
        buf.put_u8(UINT8);
        buf.put_u8(value as u8);
    } else if value <= u16::MAX as u64 {
        buf.put_u8(UINT16);
        buf.put_u16(value as u16);
    } else if value <= u32::MAX as u64 {
        buf.put_u8(UINT32);
        buf.put_u32(value as u32);
    } else {
        buf.put_u8(UINT64);
        buf.put_u64(value);
    }
}

pub fn put_int(buf: &mut BytesMut, value: i64) {
    if value >= 0 {
        put_uint(buf, value as u64);
    } else if value >= -32 {
        buf.put_u8(value as u8);
    } else if value >= i8::MIN as i64 {
        buf.put_u8(INT8);
        buf.put_i8(value as i8);
    } else if value >= i16::MIN as i64 {
        buf.put_u8(INT16);
        buf.put_i16(value as i16);
    } else if value >= i32::MIN as i64 {
        buf.put_u8(INT32);
        buf.put_i32(value as i32);
    } else {
        buf.put_u8(INT64);
        buf.put_i64(value);
    }
}

pub fn put_f32(buf: &mut BytesMut, value: f32) {
    buf.put_u8(FLOAT32);
    buf.put_f32(value);
}

pub fn put_f64(buf: &mut BytesMut, value: f64) {
    buf.put_u8(FLOAT64);
    buf.put_f64(value);
}

pub fn put_str(buf: &mut BytesMut, value: &str) {
    let len = value.len();
    if len < 32 {
        buf.put_u8(0xa0 | len as u8);
    } else if len <= u8::MAX as usize {
        buf.put_u8(STR8);
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(STR16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(STR32);
        buf.put_u32(len as u32);
    }
    buf.put_slice(value.as_bytes());
}

pub fn put_bin(buf: &mut BytesMut, value: &[u8]) {
    let len = value.len();
    if len <= u8::MAX as usize {
        buf.put_u8(BIN8);
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(BIN16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(BIN32);
        buf.put_u32(len as u32);
    }
    buf.put_slice(value);
}

/// Writes the minimal array header for `len` elements.
pub fn put_array_header(buf: &mut BytesMut, len: u32) {
    if len <= FIX_CONTAINER_MAX {
        buf.put_u8(0x90 | len as u8);
    } else if len <= u16::MAX as u32 {
        buf.put_u8(ARRAY16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(ARRAY32);
        buf.put_u32(len);
    }
}

/// Writes the minimal map header for `len` key/value pairs.
pub fn put_map_header(buf: &mut BytesMut, len: u32) {
    if len <= FIX_CONTAINER_MAX {
        buf.put_u8(0x80 | len as u8);
    } else if len <= u16::MAX as u32 {
        buf.put_u8(MAP16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(MAP32);
        buf.put_u32(len);
    }
}

/// Byte width of the minimal container header for `len` elements.
pub fn container_header_width(len: u32) -> usize {
    if len <= FIX_CONTAINER_MAX {
        1
    } else if len <= u16::MAX as u32 {
        3
    } else {
        5
    }
}

/// Writes a container header of exactly `width` bytes (1, 3 or 5) into
/// `out`, which must be at least `width` long. Used when patching a
/// previously written placeholder in place.
pub fn write_array_header_exact(out: &mut [u8], width: usize, len: u32) {
    match width {
        1 => out[0] = 0x90 | len as u8,
        3 => {
            out[0] = ARRAY16;
            out[1..3].copy_from_slice(&(len as u16).to_be_bytes());
        }
        5 => {
            out[0] = ARRAY32;
            out[1..5].copy_from_slice(&len.to_be_bytes());
        }
        _ => unreachable!("container header width must be 1, 3 or 5"),
    }
}

/// Map counterpart of [`write_array_header_exact`].
pub fn write_map_header_exact(out: &mut [u8], width: usize, len: u32) {
    match width {
        1 => out[0] = 0x80 | len as u8,
        3 => {
            out[0] = MAP16;
            out[1..3].copy_from_slice(&(len as u16).to_be_bytes());
        }
        5 => {
            out[0] = MAP32;
            out[1..5].copy_from_slice(&len.to_be_bytes());
        }
        _ => unreachable!("container header width must be 1, 3 or 5"),
    }
}

/// Bounds-checked msgpack reader over a borrowed slice.
///
/// A failed read may leave the position inside a partially consumed
/// value; callers that retry after [`MpError::Truncated`] restart from
/// a position they saved themselves.
pub struct MpReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MpReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn peek(&self) -> Result<u8, MpError> {
        self.buf.get(self.pos).copied().ok_or(MpError::Truncated)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MpError> {
        if self.remaining() < n {
            return Err(MpError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_be(&mut self, n: usize) -> Result<u64, MpError> {
        let bytes = self.take(n)?;
        let mut v = 0u64;
        for b in bytes {
            v = v << 8 | *b as u64;
        }
        Ok(v)
    }

    /// Reads an unsigned integer of any width.
    pub fn read_uint(&mut self) -> Result<u64, MpError> {
        let marker = self.peek()?;
        match marker {
            0x00..=0x7f => {
                self.pos += 1;
                Ok(marker as u64)
            }
            UINT8 => {
                self.check_len(2)?;
                self.pos += 1;
                self.take_be(1)
            }
            UINT16 => {
                self.check_len(3)?;
                self.pos += 1;
                self.take_be(2)
            }
            UINT32 => {
                self.check_len(5)?;
                self.pos += 1;
                self.take_be(4)
            }
            UINT64 => {
                self.check_len(9)?;
                self.pos += 1;
                self.take_be(8)
            }
            _ => Err(MpError::UnexpectedType),
        }
    }

    /// Reads a map header, returning the pair count.
    pub fn read_map_header(&mut self) -> Result<u32, MpError> {
        let marker = self.peek()?;
        match marker {
            0x80..=0x8f => {
                self.pos += 1;
                Ok((marker & 0x0f) as u32)
            }
            MAP16 => {
                self.check_len(3)?;
                self.pos += 1;
                Ok(self.take_be(2)? as u32)
            }
            MAP32 => {
                self.check_len(5)?;
                self.pos += 1;
                Ok(self.take_be(4)? as u32)
            }
            _ => Err(MpError::UnexpectedType),
        }
    }

    /// Reads an array header, returning the element count.
    pub fn read_array_header(&mut self) -> Result<u32, MpError> {
        let marker = self.peek()?;
        match marker {
            0x90..=0x9f => {
                self.pos += 1;
                Ok((marker & 0x0f) as u32)
            }
            ARRAY16 => {
                self.check_len(3)?;
                self.pos += 1;
                Ok(self.take_be(2)? as u32)
            }
            ARRAY32 => {
                self.check_len(5)?;
                self.pos += 1;
                Ok(self.take_be(4)? as u32)
            }
            _ => Err(MpError::UnexpectedType),
        }
    }

    /// Reads a string, returning its raw payload bytes.
    pub fn read_str(&mut self) -> Result<&'a [u8], MpError> {
        let marker = self.peek()?;
        let len = match marker {
            0xa0..=0xbf => {
                self.pos += 1;
                (marker & 0x1f) as usize
            }
            STR8 => {
                self.check_len(2)?;
                self.pos += 1;
                self.take_be(1)? as usize
            }
            STR16 => {
                self.check_len(3)?;
                self.pos += 1;
                self.take_be(2)? as usize
            }
            STR32 => {
                self.check_len(5)?;
                self.pos += 1;
                self.take_be(4)? as usize
            }
            _ => return Err(MpError::UnexpectedType),
        };
        self.take(len)
    }

    /// Skips exactly one complete value, containers included.
    pub fn skip_value(&mut self) -> Result<(), MpError> {
        // Count of values still to be skipped; containers add their
        // children to it instead of recursing.
        let mut pending: u64 = 1;
        while pending > 0 {
            pending -= 1;
            let marker = self.peek()?;
            self.pos += 1;
            match marker {
                0x00..=0x7f | 0xe0..=0xff | NIL | FALSE | TRUE => {}
                0x80..=0x8f => pending += 2 * (marker & 0x0f) as u64,
                0x90..=0x9f => pending += (marker & 0x0f) as u64,
                0xa0..=0xbf => {
                    self.take((marker & 0x1f) as usize)?;
                }
                UINT8 | INT8 => {
                    self.take(1)?;
                }
                UINT16 | INT16 => {
                    self.take(2)?;
                }
                UINT32 | INT32 | FLOAT32 => {
                    self.take(4)?;
                }
                UINT64 | INT64 | FLOAT64 => {
                    self.take(8)?;
                }
                BIN8 | STR8 => {
                    let len = self.take_be(1)? as usize;
                    self.take(len)?;
                }
                BIN16 | STR16 => {
                    let len = self.take_be(2)? as usize;
                    self.take(len)?;
                }
                BIN32 | STR32 => {
                    let len = self.take_be(4)? as usize;
                    self.take(len)?;
                }
                ARRAY16 => pending += self.take_be(2)?,
                ARRAY32 => pending += self.take_be(4)?,
                MAP16 => pending += 2 * self.take_be(2)?,
                MAP32 => pending += 2 * self.take_be(4)?,
                // fixext 1/2/4/8/16
                0xd4..=0xd8 => {
                    self.take(1 + (1usize << (marker - 0xd4)))?;
                }
                // ext 8/16/32
                0xc7 => {
                    let len = self.take_be(1)? as usize;
                    self.take(1 + len)?;
                }
                0xc8 => {
                    let len = self.take_be(2)? as usize;
                    self.take(1 + len)?;
                }
                0xc9 => {
                    let len = self.take_be(4)? as usize;
                    self.take(1 + len)?;
                }
                // 0xc1 is never a valid marker
                _ => return Err(MpError::UnexpectedType),
            }
        }
        Ok(())
    }

    fn check_len(&self, n: usize) -> Result<(), MpError> {
        if self.remaining() < n {
            Err(MpError::Truncated)
        } else {
            Ok(())
        }
    }
}
