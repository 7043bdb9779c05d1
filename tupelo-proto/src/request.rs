//! Request frame encoders.
//!
//! One variant per server operation. Key/tuple/args/ops payloads
//! arrive as already-encoded msgpack spans built with [`Object`] and
//! are forwarded verbatim: the frame prefix, header and body scalars
//! are assembled into a small scratch buffer and everything is handed
//! to the stream in a single `writev`, so payload spans are copied
//! exactly once.
//!
//! [`Object`]: crate::object::Object

use bytes::BytesMut;
use tracing::trace;

use crate::error::ProtoError;
use crate::mp;
use crate::proto::{self, IteratorKind, RequestType};
use crate::stream::Stream;

/// Select limit meaning "no limit".
pub const LIMIT_UNBOUNDED: u32 = u32::MAX;

/// One outbound request, borrowing its payload spans.
#[derive(Debug, Clone)]
pub enum Request<'a> {
    Ping,
    Insert {
        space: u32,
        tuple: &'a [u8],
    },
    Replace {
        space: u32,
        tuple: &'a [u8],
    },
    Delete {
        space: u32,
        index: u32,
        key: &'a [u8],
    },
    Update {
        space: u32,
        index: u32,
        key: &'a [u8],
        ops: &'a [u8],
    },
    Upsert {
        space: u32,
        tuple: &'a [u8],
        ops: &'a [u8],
    },
    Select {
        space: u32,
        index: u32,
        limit: u32,
        offset: u32,
        iterator: IteratorKind,
        key: &'a [u8],
    },
    Call {
        function: &'a str,
        args: &'a [u8],
    },
    Eval {
        expression: &'a str,
        args: &'a [u8],
    },
}

impl Request<'_> {
    /// Operation code written into the frame header.
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Ping => RequestType::Ping,
            Request::Insert { .. } => RequestType::Insert,
            Request::Replace { .. } => RequestType::Replace,
            Request::Delete { .. } => RequestType::Delete,
            Request::Update { .. } => RequestType::Update,
            Request::Upsert { .. } => RequestType::Upsert,
            Request::Select { .. } => RequestType::Select,
            Request::Call { .. } => RequestType::Call,
            Request::Eval { .. } => RequestType::Eval,
        }
    }

    /// Encodes the complete frame into `out`, returning the number of
    /// bytes written (length prefix included). `sync` is the caller's
    /// correlation id, echoed back in the matching reply.
    pub fn encode(&self, sync: u64, out: &mut dyn Stream) -> Result<usize, ProtoError> {
        // Single-byte msgpack keys for span-valued body entries that
        // follow another span in the writev sequence.
        const TUPLE_KEY: [u8; 1] = [proto::KEY_TUPLE];
        const OPS_KEY: [u8; 1] = [proto::KEY_OPS];

        let mut head = BytesMut::with_capacity(64);
        mp::put_map_header(&mut head, 2);
        mp::put_uint(&mut head, proto::KEY_CODE as u64);
        mp::put_uint(&mut head, self.request_type() as u64);
        mp::put_uint(&mut head, proto::KEY_SYNC as u64);
        mp::put_uint(&mut head, sync);

        let mut tail: Vec<&[u8]> = Vec::with_capacity(3);
        match *self {
            Request::Ping => {}
            Request::Insert { space, tuple } | Request::Replace { space, tuple } => {
                mp::put_map_header(&mut head, 2);
                mp::put_uint(&mut head, proto::KEY_SPACE as u64);
                mp::put_uint(&mut head, space as u64);
                mp::put_uint(&mut head, proto::KEY_TUPLE as u64);
                tail.push(tuple);
            }
            Request::Delete { space, index, key } => {
                mp::put_map_header(&mut head, 3);
                mp::put_uint(&mut head, proto::KEY_SPACE as u64);
                mp::put_uint(&mut head, space as u64);
                mp::put_uint(&mut head, proto::KEY_INDEX as u64);
                mp::put_uint(&mut head, index as u64);
                mp::put_uint(&mut head, proto::KEY_KEY as u64);
                tail.push(key);
            }
            Request::Update {
                space,
                index,
                key,
                ops,
            } => {
                mp::put_map_header(&mut head, 4);
                mp::put_uint(&mut head, proto::KEY_SPACE as u64);
                mp::put_uint(&mut head, space as u64);
                mp::put_uint(&mut head, proto::KEY_INDEX as u64);
                mp::put_uint(&mut head, index as u64);
                mp::put_uint(&mut head, proto::KEY_KEY as u64);
                tail.push(key);
                // Update carries its ops under the tuple key.
                tail.push(&TUPLE_KEY);
                tail.push(ops);
            }
            Request::Upsert { space, tuple, ops } => {
                mp::put_map_header(&mut head, 3);
                mp::put_uint(&mut head, proto::KEY_SPACE as u64);
                mp::put_uint(&mut head, space as u64);
                mp::put_uint(&mut head, proto::KEY_TUPLE as u64);
                tail.push(tuple);
                tail.push(&OPS_KEY);
                tail.push(ops);
            }
            Request::Select {
                space,
                index,
                limit,
                offset,
                iterator,
                key,
            } => {
                mp::put_map_header(&mut head, 6);
                mp::put_uint(&mut head, proto::KEY_SPACE as u64);
                mp::put_uint(&mut head, space as u64);
                mp::put_uint(&mut head, proto::KEY_INDEX as u64);
                mp::put_uint(&mut head, index as u64);
                mp::put_uint(&mut head, proto::KEY_LIMIT as u64);
                mp::put_uint(&mut head, limit as u64);
                mp::put_uint(&mut head, proto::KEY_OFFSET as u64);
                mp::put_uint(&mut head, offset as u64);
                mp::put_uint(&mut head, proto::KEY_ITERATOR as u64);
                mp::put_uint(&mut head, iterator as u64);
                mp::put_uint(&mut head, proto::KEY_KEY as u64);
                tail.push(key);
            }
            Request::Call { function, args } => {
                mp::put_map_header(&mut head, 2);
                mp::put_uint(&mut head, proto::KEY_FUNCTION as u64);
                mp::put_str(&mut head, function);
                mp::put_uint(&mut head, proto::KEY_TUPLE as u64);
                tail.push(args);
            }
            Request::Eval { expression, args } => {
                mp::put_map_header(&mut head, 2);
                mp::put_uint(&mut head, proto::KEY_EXPRESSION as u64);
                mp::put_str(&mut head, expression);
                mp::put_uint(&mut head, proto::KEY_TUPLE as u64);
                tail.push(args);
            }
        }

        let frame_len = head.len() + tail.iter().map(|s| s.len()).sum::<usize>();
        if frame_len > u32::MAX as usize {
            return Err(ProtoError::OutOfMemory);
        }
        // Fixed-width prefix so the frame length is known before the
        // body is sized.
        let mut prefix = [0u8; 5];
        prefix[0] = mp::UINT32;
        prefix[1..5].copy_from_slice(&(frame_len as u32).to_be_bytes());

        let mut iov: Vec<&[u8]> = Vec::with_capacity(2 + tail.len());
        iov.push(&prefix);
        iov.push(&head);
        iov.extend_from_slice(&tail);
        let written = out.writev(&iov)?;
        trace!(
            request_type = self.request_type() as u8,
            sync,
            bytes = written,
            "encoded request frame"
        );
        Ok(written)
    }
}
