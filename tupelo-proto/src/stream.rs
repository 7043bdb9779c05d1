//! Byte sink/source abstraction.
//!
//! Request encoders write through the [`Stream`] trait so the same
//! code path serves an in-memory buffer today and a transport adapter
//! in the client crate. Two backends live here: [`BufferStream`], a
//! growable owned FIFO, and [`ExternalBuffer`], a read-only view over
//! caller-provided bytes.

use bytes::{Bytes, BytesMut};

use crate::error::ProtoError;
use crate::reply::Reply;
use crate::MAX_OBJECT_SIZE;

/// Construction-time options for buffer-backed streams.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Initial capacity of the backing buffer in bytes.
    pub initial_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 16 * 1024,
        }
    }
}

/// Abstract byte sink/source.
///
/// A stream is exclusively owned by one logical call sequence; nothing
/// here is synchronized.
pub trait Stream {
    /// Appends `buf`, returning the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> Result<usize, ProtoError>;

    /// Appends every span in order as a single atomic write.
    fn writev(&mut self, spans: &[&[u8]]) -> Result<usize, ProtoError> {
        let mut total = 0;
        for span in spans {
            total += self.write(span)?;
        }
        Ok(total)
    }

    /// Consumes and returns up to `max` buffered bytes past the read
    /// cursor. Consumed bytes are never revisited.
    fn read(&mut self, max: usize) -> Bytes;

    /// Decodes one reply frame from the buffered unread bytes.
    ///
    /// Returns `Ok(None)` when a complete frame is not yet buffered;
    /// the read cursor advances only on success.
    fn read_reply(&mut self) -> Result<Option<Reply>, ProtoError>;
}

/// Growable owned buffer stream.
///
/// Writes append at the tail, reads consume from the head. Also owns
/// the outbound request-id counter used to stamp request headers.
#[derive(Debug)]
pub struct BufferStream {
    buf: BytesMut,
    sync: u64,
    poisoned: bool,
}

impl BufferStream {
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(config.initial_capacity),
            sync: 0,
            poisoned: false,
        }
    }

    /// Next request correlation id. Monotonic per stream.
    pub fn next_sync(&mut self) -> u64 {
        let sync = self.sync;
        self.sync = self.sync.wrapping_add(1);
        sync
    }

    /// Unread buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn check_writable(&self, additional: usize) -> Result<(), ProtoError> {
        if self.poisoned || self.buf.len().saturating_add(additional) > MAX_OBJECT_SIZE {
            return Err(ProtoError::OutOfMemory);
        }
        Ok(())
    }
}

impl Default for BufferStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream for BufferStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize, ProtoError> {
        if let Err(e) = self.check_writable(buf.len()) {
            self.poisoned = true;
            return Err(e);
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn writev(&mut self, spans: &[&[u8]]) -> Result<usize, ProtoError> {
        let total: usize = spans.iter().map(|s| s.len()).sum();
        if let Err(e) = self.check_writable(total) {
            self.poisoned = true;
            return Err(e);
        }
        self.buf.reserve(total);
        for span in spans {
            self.buf.extend_from_slice(span);
        }
        Ok(total)
    }

    fn read(&mut self, max: usize) -> Bytes {
        let n = max.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }

    fn read_reply(&mut self) -> Result<Option<Reply>, ProtoError> {
        Reply::decode(&mut self.buf)
    }
}

/// Read-only stream over caller-provided bytes.
///
/// Construction marks the buffer immutable for good: every write
/// fails without touching the underlying storage. Reads share the
/// source's storage without copying.
#[derive(Debug)]
pub struct ExternalBuffer {
    buf: Bytes,
}

impl ExternalBuffer {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Unread bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Stream for ExternalBuffer {
    fn write(&mut self, _buf: &[u8]) -> Result<usize, ProtoError> {
        Err(ProtoError::ImmutableWrite)
    }

    fn writev(&mut self, _spans: &[&[u8]]) -> Result<usize, ProtoError> {
        Err(ProtoError::ImmutableWrite)
    }

    fn read(&mut self, max: usize) -> Bytes {
        let n = max.min(self.buf.len());
        self.buf.split_to(n)
    }

    fn read_reply(&mut self) -> Result<Option<Reply>, ProtoError> {
        Reply::decode_shared(&mut self.buf)
    }
}
