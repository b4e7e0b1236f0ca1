//! Protocol error types for RESP parsing.

use thiserror::Error;

/// Errors that can occur when parsing the RESP wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input buffer doesn't contain a complete frame yet.
    /// The caller should read more data and try again.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The first byte of a frame didn't match any known RESP type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// Failed to parse an integer value from a length or integer line.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A bulk string or array declared an invalid length.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// A bulk string declared a length beyond the 512 MB limit.
    #[error("bulk string too large: {0} bytes")]
    BulkStringTooLarge(usize),

    /// An array declared more elements than the parser allows.
    #[error("too many array elements: {0}")]
    TooManyElements(usize),

    /// Arrays nested deeper than the parser allows.
    #[error("frame nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// A line was not terminated by CRLF where one was required.
    #[error("line not terminated by CRLF")]
    BadLineEnding,

    /// A simple string or error frame contained invalid UTF-8.
    #[error("invalid utf-8 in {0} frame")]
    InvalidUtf8(&'static str),
}
