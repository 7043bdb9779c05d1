//! Codec error types.

use thiserror::Error;

/// Errors produced while encoding requests or decoding replies.
///
/// An incomplete inbound frame is not an error: decoders report it as
/// `Ok(None)` and the caller retries once more bytes arrive.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("write would exceed the maximum encodable size")]
    OutOfMemory,

    #[error("write attempted on a read-only buffer")]
    ImmutableWrite,

    #[error("container close without a matching open, or element count mismatch")]
    UnbalancedContainer,

    #[error("unknown update operator code: {0:#04x}")]
    InvalidOperator(u8),

    #[error("operand type not accepted by this update operator")]
    InvalidArgumentType,

    #[error("operand value out of range for this update operator")]
    ArgumentOutOfRange,

    #[error("malformed reply frame: {0}")]
    MalformedFrame(&'static str),
}
