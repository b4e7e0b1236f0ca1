//! RESP frame types.
//!
//! The [`Frame`] enum represents a single RESP value, used for both parsed
//! requests and generated replies. Bulk payloads use `Bytes` so frames can
//! move through the pipeline without copying.

use bytes::Bytes;

/// A single RESP protocol frame.
///
/// Bulk strings and arrays carry an `Option` so the RESP null forms
/// (`$-1\r\n` and `*-1\r\n`) are representable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string, e.g. `+OK\r\n`. Short, non-binary status replies.
    Simple(String),

    /// Error reply, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Bulk (binary-safe) string, e.g. `$5\r\nhello\r\n`.
    /// `None` is the null bulk `$-1\r\n`.
    Bulk(Option<Bytes>),

    /// Ordered array of frames, e.g. `*2\r\n+a\r\n+b\r\n`.
    /// `None` is the null array `*-1\r\n`.
    Array(Option<Vec<Frame>>),
}

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

impl Frame {
    /// The `+OK` reply.
    pub fn ok() -> Frame {
        Frame::Simple("OK".into())
    }

    /// An error reply with the given message.
    pub fn error(msg: impl Into<String>) -> Frame {
        Frame::Error(msg.into())
    }

    /// The reserved wrong-kind error reply.
    pub fn wrong_type() -> Frame {
        Frame::Error(WRONGTYPE.into())
    }

    /// The `ERR wrong number of arguments for '<name>' command` reply.
    pub fn arity_error(name: &str) -> Frame {
        Frame::Error(format!("ERR wrong number of arguments for '{name}' command"))
    }

    /// A non-null bulk string reply.
    pub fn bulk(data: impl Into<Bytes>) -> Frame {
        Frame::Bulk(Some(data.into()))
    }

    /// The null bulk reply `$-1\r\n`.
    pub fn null_bulk() -> Frame {
        Frame::Bulk(None)
    }

    /// An array of bulk strings, `None` entries becoming null bulks.
    pub fn multi_bulk(items: Vec<Option<Bytes>>) -> Frame {
        Frame::Array(Some(items.into_iter().map(Frame::Bulk).collect()))
    }

    /// Returns `true` if this frame is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }
}
