//! Incremental reply frame decoder.
//!
//! A reply frame is a msgpack uint length prefix, a header map
//! (response code, sync id, schema id) and an optional body map
//! carrying either an error string or a data array. Decoding consumes
//! at most one complete frame per call and reports a partially
//! buffered frame as `Ok(None)` so the caller can retry after reading
//! more bytes. A frame that is length-complete but violates the
//! expected shape is fatal: the byte stream can no longer be
//! re-aligned.

use std::ops::Range;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::ProtoError;
use crate::mp::{MpError, MpReader};
use crate::proto;

/// One decoded reply frame.
///
/// `error` and `data` are zero-copy views sharing the receive
/// buffer's storage. `error` is the raw server error text; `data` is
/// the complete msgpack value (normally an array of tuples). Neither
/// is interpreted further here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response code: 0 for success, otherwise the error flag plus a
    /// server error number.
    pub code: u64,
    /// Correlation id matching the request that produced this reply.
    pub sync: u64,
    /// Server schema generation at the time of the reply.
    pub schema_id: u64,
    /// Server error text, present when `code` indicates failure.
    pub error: Option<Bytes>,
    /// Result payload, present when `code` indicates success.
    pub data: Option<Bytes>,
}

struct RawReply {
    frame_end: usize,
    code: u64,
    sync: u64,
    schema_id: u64,
    error: Option<Range<usize>>,
    data: Option<Range<usize>>,
}

impl Reply {
    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(reply))` and splits the frame off the buffer,
    /// `Ok(None)` when the frame is not completely buffered yet (the
    /// buffer is left untouched), or `Err` when the stream is
    /// desynchronized.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtoError> {
        match parse(buf)? {
            None => Ok(None),
            Some(raw) => {
                let frame = buf.split_to(raw.frame_end).freeze();
                Ok(Some(Self::from_raw(raw, &frame)))
            }
        }
    }

    /// [`Reply::decode`] over a shared read-only buffer.
    pub fn decode_shared(buf: &mut Bytes) -> Result<Option<Self>, ProtoError> {
        match parse(buf)? {
            None => Ok(None),
            Some(raw) => {
                let frame = buf.split_to(raw.frame_end);
                Ok(Some(Self::from_raw(raw, &frame)))
            }
        }
    }

    fn from_raw(raw: RawReply, frame: &Bytes) -> Self {
        trace!(
            code = raw.code,
            sync = raw.sync,
            schema_id = raw.schema_id,
            frame_len = raw.frame_end,
            "decoded reply frame"
        );
        Self {
            code: raw.code,
            sync: raw.sync,
            schema_id: raw.schema_id,
            error: raw.error.map(|r| frame.slice(r)),
            data: raw.data.map(|r| frame.slice(r)),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Raw server error text, when present. UTF-8 conversion is the
    /// caller's concern.
    pub fn error_message(&self) -> Option<&[u8]> {
        self.error.as_deref()
    }

    /// Server error number with the error flag masked off.
    pub fn error_code(&self) -> u64 {
        self.code & (proto::RESPONSE_ERROR_FLAG - 1)
    }
}

fn parse(buf: &[u8]) -> Result<Option<RawReply>, ProtoError> {
    let mut prefix = MpReader::new(buf);
    let frame_len = match prefix.read_uint() {
        Ok(v) => v as usize,
        Err(MpError::Truncated) => return Ok(None),
        Err(MpError::UnexpectedType) => {
            return Err(ProtoError::MalformedFrame(
                "length prefix is not an unsigned integer",
            ))
        }
    };
    let frame_end = match prefix.pos().checked_add(frame_len) {
        Some(end) => end,
        None => return Err(ProtoError::MalformedFrame("length prefix overflows")),
    };
    if buf.len() < frame_end {
        return Ok(None);
    }

    // The frame is fully buffered: from here on every shape violation,
    // truncation included, means the stream is desynchronized.
    let mut r = MpReader::new(&buf[..frame_end]);
    r.read_uint()
        .map_err(|_| ProtoError::MalformedFrame("length prefix reparse"))?;

    let pairs = r
        .read_map_header()
        .map_err(|_| ProtoError::MalformedFrame("header is not a map"))?;
    let mut code = None;
    let mut sync = None;
    let mut schema_id = 0;
    for _ in 0..pairs {
        let key = r
            .read_uint()
            .map_err(|_| ProtoError::MalformedFrame("header key is not an integer"))?;
        match key {
            k if k == proto::KEY_CODE as u64 => {
                code = Some(r.read_uint().map_err(bad("response code"))?);
            }
            k if k == proto::KEY_SYNC as u64 => {
                sync = Some(r.read_uint().map_err(bad("sync id"))?);
            }
            k if k == proto::KEY_SCHEMA_ID as u64 => {
                schema_id = r.read_uint().map_err(bad("schema id"))?;
            }
            _ => {
                r.skip_value().map_err(bad("header value"))?;
            }
        }
    }
    let code = code.ok_or(ProtoError::MalformedFrame("header missing response code"))?;
    let sync = sync.ok_or(ProtoError::MalformedFrame("header missing sync id"))?;

    let mut error = None;
    let mut data = None;
    // Ping replies carry no body at all.
    if r.remaining() > 0 {
        let pairs = r
            .read_map_header()
            .map_err(|_| ProtoError::MalformedFrame("body is not a map"))?;
        for _ in 0..pairs {
            let key = r
                .read_uint()
                .map_err(|_| ProtoError::MalformedFrame("body key is not an integer"))?;
            match key {
                k if k == proto::KEY_ERROR as u64 => {
                    let text = r.read_str().map_err(bad("error text"))?;
                    error = Some(r.pos() - text.len()..r.pos());
                }
                k if k == proto::KEY_DATA as u64 => {
                    let start = r.pos();
                    r.skip_value().map_err(bad("data value"))?;
                    data = Some(start..r.pos());
                }
                _ => {
                    r.skip_value().map_err(bad("body value"))?;
                }
            }
        }
    }

    Ok(Some(RawReply {
        frame_end,
        code,
        sync,
        schema_id,
        error,
        data,
    }))
}

fn bad(what: &'static str) -> impl Fn(MpError) -> ProtoError {
    move |_| ProtoError::MalformedFrame(what)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp;
    use bytes::BufMut;

    fn frame(code: u64, sync: u64, schema_id: u64, body: Option<&[u8]>) -> BytesMut {
        let mut inner = BytesMut::new();
        mp::put_map_header(&mut inner, 3);
        mp::put_uint(&mut inner, proto::KEY_CODE as u64);
        mp::put_uint(&mut inner, code);
        mp::put_uint(&mut inner, proto::KEY_SYNC as u64);
        mp::put_uint(&mut inner, sync);
        mp::put_uint(&mut inner, proto::KEY_SCHEMA_ID as u64);
        mp::put_uint(&mut inner, schema_id);
        if let Some(body) = body {
            inner.extend_from_slice(body);
        }

        let mut out = BytesMut::new();
        out.put_u8(mp::UINT32);
        out.put_u32(inner.len() as u32);
        out.extend_from_slice(&inner);
        out
    }

    fn data_body(tuples: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
        let mut body = BytesMut::new();
        mp::put_map_header(&mut body, 1);
        mp::put_uint(&mut body, proto::KEY_DATA as u64);
        tuples(&mut body);
        body.to_vec()
    }

    #[test]
    fn test_decode_success_with_data() {
        let body = data_body(|b| {
            mp::put_array_header(b, 1);
            mp::put_array_header(b, 2);
            mp::put_uint(b, 1);
            mp::put_uint(b, 2);
        });
        let mut buf = frame(0, 7, 3, Some(&body));
        let reply = Reply::decode(&mut buf).unwrap().unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.sync, 7);
        assert_eq!(reply.schema_id, 3);
        assert!(reply.error.is_none());
        // The data span covers the whole msgpack value.
        assert_eq!(reply.data.as_deref(), Some(&[0x91, 0x92, 0x01, 0x02][..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_error_reply() {
        let mut body = BytesMut::new();
        mp::put_map_header(&mut body, 1);
        mp::put_uint(&mut body, proto::KEY_ERROR as u64);
        mp::put_str(&mut body, "Space '513' does not exist");
        let mut buf = frame(proto::RESPONSE_ERROR_FLAG | 36, 1, 0, Some(&body));

        let reply = Reply::decode(&mut buf).unwrap().unwrap();
        assert!(!reply.is_ok());
        assert_eq!(reply.error_code(), 36);
        assert_eq!(
            reply.error_message(),
            Some(&b"Space '513' does not exist"[..])
        );
        assert!(reply.data.is_none());
    }

    #[test]
    fn test_decode_ping_reply_without_body() {
        let mut buf = frame(0, 42, 0, None);
        let reply = Reply::decode(&mut buf).unwrap().unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.sync, 42);
        assert!(reply.error.is_none());
        assert!(reply.data.is_none());
    }

    #[test]
    fn test_incremental_every_prefix_is_incomplete() {
        let body = data_body(|b| {
            mp::put_array_header(b, 1);
            mp::put_array_header(b, 1);
            mp::put_uint(b, 99);
        });
        let full = frame(0, 5, 1, Some(&body));

        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            let before = partial.len();
            assert!(
                Reply::decode(&mut partial).unwrap().is_none(),
                "prefix of {cut} bytes must be incomplete"
            );
            // Incomplete decode must leave the buffer untouched.
            assert_eq!(partial.len(), before);
        }

        let mut buf = full;
        let reply = Reply::decode(&mut buf).unwrap().unwrap();
        assert_eq!(reply.sync, 5);
        assert_eq!(reply.schema_id, 1);
    }

    #[test]
    fn test_decode_two_frames_in_sequence() {
        let mut buf = frame(0, 1, 0, None);
        buf.extend_from_slice(&frame(0, 2, 0, None));

        let first = Reply::decode(&mut buf).unwrap().unwrap();
        let second = Reply::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.sync, 1);
        assert_eq!(second.sync, 2);
        assert!(buf.is_empty());
        assert!(Reply::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_shared_zero_copy() {
        let body = data_body(|b| {
            mp::put_array_header(b, 0);
        });
        let mut buf = frame(0, 9, 0, Some(&body)).freeze();
        let reply = Reply::decode_shared(&mut buf).unwrap().unwrap();
        assert_eq!(reply.sync, 9);
        assert_eq!(reply.data.as_deref(), Some(&[0x90][..]));
    }

    #[test]
    fn test_malformed_length_prefix() {
        let mut buf = BytesMut::from(&[0xa3, b'b', b'a', b'd'][..]);
        assert!(matches!(
            Reply::decode(&mut buf),
            Err(ProtoError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_malformed_header_not_a_map() {
        let mut buf = BytesMut::new();
        buf.put_u8(mp::UINT32);
        buf.put_u32(1);
        buf.put_u8(0x01); // fixint where a map must start
        assert!(matches!(
            Reply::decode(&mut buf),
            Err(ProtoError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_malformed_header_missing_sync() {
        let mut inner = BytesMut::new();
        mp::put_map_header(&mut inner, 1);
        mp::put_uint(&mut inner, proto::KEY_CODE as u64);
        mp::put_uint(&mut inner, 0);
        let mut buf = BytesMut::new();
        buf.put_u8(mp::UINT32);
        buf.put_u32(inner.len() as u32);
        buf.extend_from_slice(&inner);
        assert_eq!(
            Reply::decode(&mut buf),
            Err(ProtoError::MalformedFrame("header missing sync id"))
        );
    }

    #[test]
    fn test_unknown_header_and_body_keys_skipped() {
        let mut inner = BytesMut::new();
        mp::put_map_header(&mut inner, 3);
        mp::put_uint(&mut inner, proto::KEY_CODE as u64);
        mp::put_uint(&mut inner, 0);
        mp::put_uint(&mut inner, proto::KEY_SYNC as u64);
        mp::put_uint(&mut inner, 8);
        mp::put_uint(&mut inner, 0x7b); // unknown key
        mp::put_str(&mut inner, "ignored");
        mp::put_map_header(&mut inner, 2);
        mp::put_uint(&mut inner, 0x55); // unknown body key
        mp::put_nil(&mut inner);
        mp::put_uint(&mut inner, proto::KEY_DATA as u64);
        mp::put_array_header(&mut inner, 0);

        let mut buf = BytesMut::new();
        buf.put_u8(mp::UINT32);
        buf.put_u32(inner.len() as u32);
        buf.extend_from_slice(&inner);

        let reply = Reply::decode(&mut buf).unwrap().unwrap();
        assert_eq!(reply.sync, 8);
        assert_eq!(reply.data.as_deref(), Some(&[0x90][..]));
    }
}
