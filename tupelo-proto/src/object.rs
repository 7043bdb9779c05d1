//! Msgpack value builder.
//!
//! An [`Object`] accumulates one msgpack value (or a top-level run of
//! values) into an owned buffer. Array and map headers can be encoded
//! with three strategies that trade header size against close cost:
//!
//! - [`LenStrategy::Simple`]: the caller declares the element count up
//!   front and the minimal header is written immediately. Closing with
//!   a different actual count is an error.
//! - [`LenStrategy::Sparse`]: a full-width 5-byte header is written as
//!   a placeholder and patched with the actual count on close. O(1)
//!   close, constant 5-byte cost.
//! - [`LenStrategy::Packed`]: a 1-byte fix header is written as a
//!   placeholder; if the actual count outgrows it on close, the
//!   payload is shifted right to make room for the wider header.
//!   Minimal wire size, O(payload) close in the worst case.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtoError;
use crate::mp;
use crate::MAX_OBJECT_SIZE;

/// Container kind for an open builder frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Array,
    Map,
}

/// Length-header encoding strategy for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenStrategy {
    /// Exact element count declared at open (pair count for maps).
    Simple(u32),
    /// 5-byte placeholder header, patched in place on close.
    Sparse,
    /// 1-byte placeholder header, widened on close if needed.
    Packed,
}

#[derive(Debug, Clone, Copy)]
struct ContainerFrame {
    /// Byte offset of the container header in the buffer.
    offset: usize,
    /// Elements appended so far (map entries count as two).
    count: u32,
    kind: ContainerKind,
    strategy: LenStrategy,
}

/// Typed shorthand for building a value without spelling out every
/// builder call. Containers opened by a token sequence all use the
/// strategy given to [`Object::from_tokens`].
#[derive(Debug, Clone, Copy)]
pub enum Token<'a> {
    ArrayOpen,
    MapOpen,
    Close,
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    F32(f32),
    F64(f64),
    Str(&'a str),
    Bytes(&'a [u8]),
}

/// Incremental msgpack value builder over an owned growable buffer.
#[derive(Debug, Default)]
pub struct Object {
    buf: BytesMut,
    stack: Vec<ContainerFrame>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            stack: Vec::new(),
        }
    }

    /// Builds a complete object from a token sequence.
    pub fn from_tokens(strategy: LenStrategy, tokens: &[Token<'_>]) -> Result<Self, ProtoError> {
        let mut obj = Self::new();
        for token in tokens {
            match *token {
                Token::ArrayOpen => obj.open_array(strategy)?,
                Token::MapOpen => obj.open_map(strategy)?,
                Token::Close => obj.close()?,
                Token::Nil => obj.add_nil()?,
                Token::Bool(v) => obj.add_bool(v)?,
                Token::Int(v) => obj.add_int(v)?,
                Token::Uint(v) => obj.add_uint(v)?,
                Token::F32(v) => obj.add_f32(v)?,
                Token::F64(v) => obj.add_f64(v)?,
                Token::Str(v) => obj.add_str(v)?,
                Token::Bytes(v) => obj.add_bytes(v)?,
            }
        }
        Ok(obj)
    }

    /// Opens an array container with the given length strategy.
    pub fn open_array(&mut self, strategy: LenStrategy) -> Result<(), ProtoError> {
        self.open(ContainerKind::Array, strategy)
    }

    /// Opens a map container with the given length strategy. The
    /// declared count of a `Simple` map is its pair count.
    pub fn open_map(&mut self, strategy: LenStrategy) -> Result<(), ProtoError> {
        self.open(ContainerKind::Map, strategy)
    }

    fn open(&mut self, kind: ContainerKind, strategy: LenStrategy) -> Result<(), ProtoError> {
        self.reserve(5)?;
        self.bump();
        let offset = self.buf.len();
        match (strategy, kind) {
            (LenStrategy::Simple(declared), ContainerKind::Array) => {
                mp::put_array_header(&mut self.buf, declared)
            }
            (LenStrategy::Simple(declared), ContainerKind::Map) => {
                mp::put_map_header(&mut self.buf, declared)
            }
            (LenStrategy::Sparse, ContainerKind::Array) => {
                self.buf.put_u8(mp::ARRAY32);
                self.buf.put_u32(0);
            }
            (LenStrategy::Sparse, ContainerKind::Map) => {
                self.buf.put_u8(mp::MAP32);
                self.buf.put_u32(0);
            }
            (LenStrategy::Packed, ContainerKind::Array) => self.buf.put_u8(0x90),
            (LenStrategy::Packed, ContainerKind::Map) => self.buf.put_u8(0x80),
        }
        self.stack.push(ContainerFrame {
            offset,
            count: 0,
            kind,
            strategy,
        });
        Ok(())
    }

    /// Closes the innermost open container, finalizing its length
    /// header according to the strategy it was opened with.
    pub fn close(&mut self) -> Result<(), ProtoError> {
        let frame = self.stack.pop().ok_or(ProtoError::UnbalancedContainer)?;
        let len = match frame.kind {
            ContainerKind::Array => frame.count,
            ContainerKind::Map => {
                if frame.count % 2 != 0 {
                    return Err(ProtoError::UnbalancedContainer);
                }
                frame.count / 2
            }
        };
        match frame.strategy {
            LenStrategy::Simple(declared) => {
                if len != declared {
                    return Err(ProtoError::UnbalancedContainer);
                }
            }
            LenStrategy::Sparse => {
                let header = &mut self.buf[frame.offset..frame.offset + 5];
                match frame.kind {
                    ContainerKind::Array => mp::write_array_header_exact(header, 5, len),
                    ContainerKind::Map => mp::write_map_header_exact(header, 5, len),
                }
            }
            LenStrategy::Packed => {
                let width = mp::container_header_width(len);
                if width > 1 {
                    // Widen the 1-byte placeholder: shift the payload
                    // right and rewrite the header at its final width.
                    let extra = width - 1;
                    self.reserve(extra)?;
                    let old_len = self.buf.len();
                    let payload = frame.offset + 1;
                    self.buf.resize(old_len + extra, 0);
                    self.buf.copy_within(payload..old_len, payload + extra);
                }
                let header = &mut self.buf[frame.offset..frame.offset + width];
                match frame.kind {
                    ContainerKind::Array => mp::write_array_header_exact(header, width, len),
                    ContainerKind::Map => mp::write_map_header_exact(header, width, len),
                }
            }
        }
        Ok(())
    }

    pub fn add_nil(&mut self) -> Result<(), ProtoError> {
        self.reserve(1)?;
        self.bump();
        mp::put_nil(&mut self.buf);
        Ok(())
    }

    pub fn add_bool(&mut self, value: bool) -> Result<(), ProtoError> {
        self.reserve(1)?;
        self.bump();
        mp::put_bool(&mut self.buf, value);
        Ok(())
    }

    pub fn add_int(&mut self, value: i64) -> Result<(), ProtoError> {
        self.reserve(9)?;
        self.bump();
        mp::put_int(&mut self.buf, value);
        Ok(())
    }

    pub fn add_uint(&mut self, value: u64) -> Result<(), ProtoError> {
        self.reserve(9)?;
        self.bump();
        mp::put_uint(&mut self.buf, value);
        Ok(())
    }

    pub fn add_f32(&mut self, value: f32) -> Result<(), ProtoError> {
        self.reserve(5)?;
        self.bump();
        mp::put_f32(&mut self.buf, value);
        Ok(())
    }

    pub fn add_f64(&mut self, value: f64) -> Result<(), ProtoError> {
        self.reserve(9)?;
        self.bump();
        mp::put_f64(&mut self.buf, value);
        Ok(())
    }

    pub fn add_str(&mut self, value: &str) -> Result<(), ProtoError> {
        self.reserve(5 + value.len())?;
        self.bump();
        mp::put_str(&mut self.buf, value);
        Ok(())
    }

    pub fn add_bytes(&mut self, value: &[u8]) -> Result<(), ProtoError> {
        self.reserve(5 + value.len())?;
        self.bump();
        mp::put_bin(&mut self.buf, value);
        Ok(())
    }

    /// Appends one already-encoded msgpack value verbatim. The span is
    /// trusted to hold exactly one value; it counts as a single element
    /// of the enclosing container.
    pub fn add_encoded(&mut self, span: &[u8]) -> Result<(), ProtoError> {
        self.reserve(span.len())?;
        self.bump();
        self.buf.put_slice(span);
        Ok(())
    }

    /// Number of containers currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes encoded so far. Only a finished object is guaranteed to
    /// be well-formed msgpack.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Discards all content and open containers, keeping the
    /// allocation for reuse.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.stack.clear();
    }

    /// Finalizes the object, failing if any container is still open.
    pub fn finish(self) -> Result<Bytes, ProtoError> {
        if !self.stack.is_empty() {
            return Err(ProtoError::UnbalancedContainer);
        }
        Ok(self.buf.freeze())
    }

    fn bump(&mut self) {
        if let Some(frame) = self.stack.last_mut() {
            frame.count += 1;
        }
    }

    fn reserve(&mut self, additional: usize) -> Result<(), ProtoError> {
        if self.buf.len().saturating_add(additional) > MAX_OBJECT_SIZE {
            return Err(ProtoError::OutOfMemory);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp::MpReader;
    use proptest::prelude::*;

    #[test]
    fn test_simple_array_exact_bytes() {
        let mut obj = Object::new();
        obj.open_array(LenStrategy::Simple(2)).unwrap();
        obj.add_int(1).unwrap();
        obj.add_int(2).unwrap();
        obj.close().unwrap();
        assert_eq!(obj.finish().unwrap().as_ref(), [0x92, 0x01, 0x02]);
    }

    #[test]
    fn test_simple_count_mismatch() {
        let mut obj = Object::new();
        obj.open_array(LenStrategy::Simple(2)).unwrap();
        obj.add_int(1).unwrap();
        assert_eq!(obj.close(), Err(ProtoError::UnbalancedContainer));
    }

    #[test]
    fn test_sparse_header_is_always_five_bytes() {
        for count in [0usize, 1, 70000] {
            let mut obj = Object::new();
            obj.open_array(LenStrategy::Sparse).unwrap();
            for _ in 0..count {
                obj.add_nil().unwrap();
            }
            obj.close().unwrap();
            let bytes = obj.finish().unwrap();
            assert_eq!(bytes.len(), 5 + count);
            assert_eq!(bytes[0], 0xdd);
            assert_eq!(
                u32::from_be_bytes(bytes[1..5].try_into().unwrap()),
                count as u32
            );
        }
    }

    #[test]
    fn test_sparse_map() {
        let mut obj = Object::new();
        obj.open_map(LenStrategy::Sparse).unwrap();
        obj.add_uint(1).unwrap();
        obj.add_str("v").unwrap();
        obj.close().unwrap();
        let bytes = obj.finish().unwrap();
        assert_eq!(bytes[0], 0xdf);
        assert_eq!(u32::from_be_bytes(bytes[1..5].try_into().unwrap()), 1);
    }

    #[test]
    fn test_packed_stays_narrow() {
        let mut obj = Object::new();
        obj.open_array(LenStrategy::Packed).unwrap();
        for i in 0..15u64 {
            obj.add_uint(i).unwrap();
        }
        obj.close().unwrap();
        let bytes = obj.finish().unwrap();
        assert_eq!(bytes[0], 0x9f);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn test_packed_widens_at_sixteen() {
        let mut obj = Object::new();
        obj.open_array(LenStrategy::Packed).unwrap();
        for i in 0..16u64 {
            obj.add_uint(i).unwrap();
        }
        obj.close().unwrap();
        let bytes = obj.finish().unwrap();
        assert_eq!(&bytes[..3], [0xdc, 0x00, 0x10]);
        // Payload must be intact after the shift.
        for i in 0..16u8 {
            assert_eq!(bytes[3 + i as usize], i);
        }
    }

    #[test]
    fn test_packed_width_boundaries() {
        for (count, marker, width) in [
            (15usize, 0x9fu8, 1usize),
            (16, 0xdc, 3),
            (65535, 0xdc, 3),
            (65536, 0xdd, 5),
        ] {
            let mut obj = Object::new();
            obj.open_array(LenStrategy::Packed).unwrap();
            for _ in 0..count {
                obj.add_nil().unwrap();
            }
            obj.close().unwrap();
            let bytes = obj.finish().unwrap();
            assert_eq!(bytes[0], marker, "count {count}");
            assert_eq!(bytes.len(), width + count, "count {count}");
            let mut r = MpReader::new(&bytes);
            assert_eq!(r.read_array_header(), Ok(count as u32));
        }
    }

    #[test]
    fn test_packed_map_pairs() {
        let mut obj = Object::new();
        obj.open_map(LenStrategy::Packed).unwrap();
        for i in 0..20u64 {
            obj.add_uint(i).unwrap();
            obj.add_bool(i % 2 == 0).unwrap();
        }
        obj.close().unwrap();
        let bytes = obj.finish().unwrap();
        let mut r = MpReader::new(&bytes);
        assert_eq!(r.read_map_header(), Ok(20));
    }

    #[test]
    fn test_map_odd_element_count() {
        let mut obj = Object::new();
        obj.open_map(LenStrategy::Packed).unwrap();
        obj.add_uint(1).unwrap();
        assert_eq!(obj.close(), Err(ProtoError::UnbalancedContainer));
    }

    #[test]
    fn test_close_without_open() {
        let mut obj = Object::new();
        assert_eq!(obj.close(), Err(ProtoError::UnbalancedContainer));
    }

    #[test]
    fn test_finish_with_open_container() {
        let mut obj = Object::new();
        obj.open_array(LenStrategy::Packed).unwrap();
        assert_eq!(obj.finish().unwrap_err(), ProtoError::UnbalancedContainer);
    }

    #[test]
    fn test_nested_containers() {
        let mut obj = Object::new();
        obj.open_array(LenStrategy::Packed).unwrap();
        obj.add_uint(42).unwrap();
        obj.open_map(LenStrategy::Packed).unwrap();
        obj.add_uint(0).unwrap();
        obj.add_str("false").unwrap();
        obj.add_uint(1).unwrap();
        obj.add_str("true").unwrap();
        obj.close().unwrap();
        obj.close().unwrap();
        let bytes = obj.finish().unwrap();
        let mut r = MpReader::new(&bytes);
        assert_eq!(r.read_array_header(), Ok(2));
        assert_eq!(r.read_uint(), Ok(42));
        assert_eq!(r.read_map_header(), Ok(2));
    }

    #[test]
    fn test_reset_reuses_buffer() {
        let mut obj = Object::new();
        obj.open_array(LenStrategy::Packed).unwrap();
        obj.add_uint(1).unwrap();
        obj.reset();
        assert!(obj.is_empty());
        assert_eq!(obj.depth(), 0);
        obj.add_uint(7).unwrap();
        assert_eq!(obj.finish().unwrap().as_ref(), [0x07]);
    }

    #[test]
    fn test_from_tokens_matches_manual() {
        let via_tokens = Object::from_tokens(
            LenStrategy::Packed,
            &[
                Token::ArrayOpen,
                Token::Int(42),
                Token::MapOpen,
                Token::Uint(0),
                Token::Str("false"),
                Token::Uint(1),
                Token::Str("true"),
                Token::Close,
                Token::Close,
            ],
        )
        .unwrap()
        .finish()
        .unwrap();

        let mut manual = Object::new();
        manual.open_array(LenStrategy::Packed).unwrap();
        manual.add_int(42).unwrap();
        manual.open_map(LenStrategy::Packed).unwrap();
        manual.add_uint(0).unwrap();
        manual.add_str("false").unwrap();
        manual.add_uint(1).unwrap();
        manual.add_str("true").unwrap();
        manual.close().unwrap();
        manual.close().unwrap();

        assert_eq!(via_tokens, manual.finish().unwrap());
    }

    #[test]
    fn test_add_encoded_counts_one_element() {
        let inner = Object::from_tokens(
            LenStrategy::Packed,
            &[Token::ArrayOpen, Token::Uint(1), Token::Uint(2), Token::Close],
        )
        .unwrap()
        .finish()
        .unwrap();

        let mut obj = Object::new();
        obj.open_array(LenStrategy::Simple(1)).unwrap();
        obj.add_encoded(&inner).unwrap();
        obj.close().unwrap();
        let bytes = obj.finish().unwrap();
        assert_eq!(bytes[0], 0x91);
        assert_eq!(&bytes[1..], inner.as_ref());
    }

    proptest! {
        #[test]
        fn prop_array_roundtrip_all_strategies(values in proptest::collection::vec(any::<u64>(), 0..64)) {
            for strategy in [
                LenStrategy::Simple(values.len() as u32),
                LenStrategy::Sparse,
                LenStrategy::Packed,
            ] {
                let mut obj = Object::new();
                obj.open_array(strategy).unwrap();
                for v in &values {
                    obj.add_uint(*v).unwrap();
                }
                obj.close().unwrap();
                let bytes = obj.finish().unwrap();

                let mut r = MpReader::new(&bytes);
                prop_assert_eq!(r.read_array_header(), Ok(values.len() as u32));
                for v in &values {
                    prop_assert_eq!(r.read_uint(), Ok(*v));
                }
                prop_assert_eq!(r.remaining(), 0);
            }
        }
    }
}
