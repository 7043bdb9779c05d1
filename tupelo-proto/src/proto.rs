//! Wire protocol constants.
//!
//! Every frame is a msgpack uint length prefix followed by a header
//! map and an optional body map. Map keys are fixed small integers;
//! all of them fit in a positive fixint, so on the wire each key is
//! its own single byte.

/// Header map keys. `KEY_CODE` carries the request type in requests
/// and the response code in replies.
pub const KEY_CODE: u8 = 0x00;
pub const KEY_SYNC: u8 = 0x01;
pub const KEY_SCHEMA_ID: u8 = 0x05;

/// Request body map keys.
pub const KEY_SPACE: u8 = 0x10;
pub const KEY_INDEX: u8 = 0x11;
pub const KEY_LIMIT: u8 = 0x12;
pub const KEY_OFFSET: u8 = 0x13;
pub const KEY_ITERATOR: u8 = 0x14;
pub const KEY_KEY: u8 = 0x20;
pub const KEY_TUPLE: u8 = 0x21;
pub const KEY_FUNCTION: u8 = 0x22;
pub const KEY_EXPRESSION: u8 = 0x27;
pub const KEY_OPS: u8 = 0x28;

/// Response body map keys.
pub const KEY_DATA: u8 = 0x30;
pub const KEY_ERROR: u8 = 0x31;

/// Bit set in a reply's response code when the server reports an error.
/// The remaining bits carry the server-side error number.
pub const RESPONSE_ERROR_FLAG: u64 = 0x8000;

/// Server operation codes carried in the request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestType {
    Select = 0x01,
    Insert = 0x02,
    Replace = 0x03,
    Update = 0x04,
    Delete = 0x05,
    Call = 0x06,
    Eval = 0x08,
    Upsert = 0x09,
    Ping = 0x40,
}

/// Index iteration strategy for select requests.
///
/// The codes are a stable part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum IteratorKind {
    /// Equality match, ascending.
    #[default]
    Eq = 0,
    /// Equality match, descending.
    Req = 1,
    /// Every tuple in index order.
    All = 2,
    Lt = 3,
    Le = 4,
    Ge = 5,
    Gt = 6,
    /// Bitset index: all key bits set.
    BitsAllSet = 7,
    /// Bitset index: at least one key bit set.
    BitsAnySet = 8,
    /// Bitset index: no key bit set.
    BitsAllNotSet = 9,
    /// Spatial index: rectangle overlap.
    Overlaps = 10,
    /// Spatial index: nearest neighbor.
    Neighbor = 11,
}
