//! String values: integer or raw-bytes internal form.
//!
//! A string whose bytes are a canonical decimal i64 is held as the integer
//! itself; anything else is an opaque byte buffer. `get` always produces
//! the canonical byte form, so the stored representation is invisible to
//! clients. Arithmetic is defined only on the integer form.

use bytes::Bytes;

use super::parse_canonical_i64;

/// Error from `incr_by` on a non-integer value or on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotAnInteger;

/// A string value with two encodings: 64-bit integer or byte buffer.
#[derive(Debug, Clone)]
pub enum StringValue {
    Int(i64),
    Raw(Bytes),
}

impl StringValue {
    /// Stores `bytes`, as an integer when they form a canonical decimal.
    pub fn from_bytes(bytes: Bytes) -> Self {
        match parse_canonical_i64(&bytes) {
            Some(v) => StringValue::Int(v),
            None => StringValue::Raw(bytes),
        }
    }

    /// The canonical byte form.
    pub fn get(&self) -> Bytes {
        match self {
            StringValue::Int(v) => {
                let mut buf = itoa::Buffer::new();
                Bytes::copy_from_slice(buf.format(*v).as_bytes())
            }
            StringValue::Raw(b) => b.clone(),
        }
    }

    /// Overwrites the value, re-deciding the encoding.
    pub fn set(&mut self, bytes: Bytes) {
        *self = StringValue::from_bytes(bytes);
    }

    /// Byte length of the canonical form.
    pub fn len(&self) -> usize {
        match self {
            StringValue::Int(v) => {
                let mut buf = itoa::Buffer::new();
                buf.format(*v).len()
            }
            StringValue::Raw(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, StringValue::Raw(b) if b.is_empty())
    }

    /// Adds `delta` to the integer form. Fails on the raw form and on
    /// overflow past the representable range; the value is unchanged on
    /// failure.
    pub fn incr_by(&mut self, delta: i64) -> Result<i64, NotAnInteger> {
        match self {
            StringValue::Int(v) => {
                let next = v.checked_add(delta).ok_or(NotAnInteger)?;
                *v = next;
                Ok(next)
            }
            StringValue::Raw(_) => Err(NotAnInteger),
        }
    }
}
