//! Update-operation codec for update and upsert requests.
//!
//! Mutations are encoded as an array of `[op, field_no, operand]`
//! triples. The outer array is built in packed mode since the
//! operation count is small and rarely known up front.

use bytes::Bytes;

use crate::error::ProtoError;
use crate::object::{LenStrategy, Object};

/// Field mutation operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOp {
    Add,
    Subtract,
    BitAnd,
    BitOr,
    BitXor,
    Assign,
    Delete,
    InsertBefore,
}

impl UpdateOp {
    /// Single-character wire code of the operator.
    pub fn code(self) -> u8 {
        match self {
            UpdateOp::Add => b'+',
            UpdateOp::Subtract => b'-',
            UpdateOp::BitAnd => b'&',
            UpdateOp::BitOr => b'|',
            UpdateOp::BitXor => b'^',
            UpdateOp::Assign => b'=',
            UpdateOp::Delete => b'#',
            UpdateOp::InsertBefore => b'!',
        }
    }

    /// Maps a wire code back to its operator.
    pub fn from_code(code: u8) -> Result<Self, ProtoError> {
        match code {
            b'+' => Ok(UpdateOp::Add),
            b'-' => Ok(UpdateOp::Subtract),
            b'&' => Ok(UpdateOp::BitAnd),
            b'|' => Ok(UpdateOp::BitOr),
            b'^' => Ok(UpdateOp::BitXor),
            b'=' => Ok(UpdateOp::Assign),
            b'#' => Ok(UpdateOp::Delete),
            b'!' => Ok(UpdateOp::InsertBefore),
            other => Err(ProtoError::InvalidOperator(other)),
        }
    }
}

/// Operand of one field mutation.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Int(i64),
    Uint(u64),
    Float(f64),
    /// A pre-encoded msgpack value, copied in verbatim.
    Encoded(&'a [u8]),
}

/// Builder for the operation array passed to update/upsert.
#[derive(Debug)]
pub struct UpdateOps {
    obj: Object,
    count: u32,
}

impl UpdateOps {
    pub fn new() -> Result<Self, ProtoError> {
        let mut obj = Object::new();
        obj.open_array(LenStrategy::Packed)?;
        Ok(Self { obj, count: 0 })
    }

    /// Appends one `[op, field_no, operand]` triple, validating the
    /// operand against what the operator accepts.
    pub fn push(
        &mut self,
        field_no: u32,
        op: UpdateOp,
        operand: Operand<'_>,
    ) -> Result<(), ProtoError> {
        validate(op, &operand)?;
        self.obj.open_array(LenStrategy::Simple(3))?;
        // Operator codes go on the wire as one-character strings.
        self.obj.add_encoded(&[0xa1, op.code()])?;
        self.obj.add_uint(field_no as u64)?;
        match operand {
            Operand::Int(v) => self.obj.add_int(v)?,
            Operand::Uint(v) => self.obj.add_uint(v)?,
            Operand::Float(v) => self.obj.add_f64(v)?,
            Operand::Encoded(span) => self.obj.add_encoded(span)?,
        }
        self.obj.close()?;
        self.count += 1;
        Ok(())
    }

    /// Operations appended so far.
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Closes the operation array, yielding the encoded ops span for
    /// the update/upsert request encoders.
    pub fn finish(mut self) -> Result<Bytes, ProtoError> {
        self.obj.close()?;
        self.obj.finish()
    }
}

fn validate(op: UpdateOp, operand: &Operand<'_>) -> Result<(), ProtoError> {
    match op {
        UpdateOp::Add | UpdateOp::Subtract => match operand {
            Operand::Int(_) | Operand::Uint(_) | Operand::Float(_) => Ok(()),
            Operand::Encoded(_) => Err(ProtoError::InvalidArgumentType),
        },
        UpdateOp::BitAnd | UpdateOp::BitOr | UpdateOp::BitXor | UpdateOp::Delete => match operand {
            Operand::Uint(_) => Ok(()),
            Operand::Int(v) if *v >= 0 => Ok(()),
            Operand::Int(_) => Err(ProtoError::ArgumentOutOfRange),
            Operand::Float(_) | Operand::Encoded(_) => Err(ProtoError::InvalidArgumentType),
        },
        UpdateOp::Assign | UpdateOp::InsertBefore => Ok(()),
    }
}
