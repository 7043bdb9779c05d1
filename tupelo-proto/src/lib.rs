//! # tupelo-proto
//!
//! Client-side wire codec for the tupelo row server.
//!
//! This crate provides:
//! - A byte sink/source abstraction over growable and read-only buffers
//! - A msgpack value builder with three container length strategies
//! - Per-operation request frame encoders
//! - An update-operation codec for update/upsert
//! - An incremental, zero-copy reply decoder
//!
//! It never touches the network: transport, name resolution and host
//! value marshalling are the caller's business. Everything here is
//! synchronous and CPU-bound, and every instance is exclusively owned
//! by one call sequence.

pub mod error;
pub mod mp;
pub mod object;
pub mod proto;
pub mod reply;
pub mod request;
pub mod stream;
pub mod update;

pub use error::ProtoError;
pub use object::{ContainerKind, LenStrategy, Object, Token};
pub use proto::{IteratorKind, RequestType};
pub use reply::Reply;
pub use request::{Request, LIMIT_UNBOUNDED};
pub use stream::{BufferStream, ExternalBuffer, Stream, StreamConfig};
pub use update::{Operand, UpdateOp, UpdateOps};

/// Default port for the tupelo server.
pub const DEFAULT_PORT: u16 = 3301;

/// Hard ceiling on any single encoded object or frame: the widest
/// length the wire format can carry. Writes that would cross it fail
/// with [`ProtoError::OutOfMemory`].
pub const MAX_OBJECT_SIZE: usize = u32::MAX as usize;
