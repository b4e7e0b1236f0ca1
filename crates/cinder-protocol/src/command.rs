//! Command lines on the wire.
//!
//! A request is always an array of bulk strings; [`cmdline_from_frame`]
//! extracts the argument vector from a parsed frame, and
//! [`encode_command`] produces the multi-bulk encoding used by the client,
//! the AOF engine, and the replication stream — all three carry the same
//! bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::Frame;

/// A command line: the command name followed by its arguments, as raw
/// byte strings.
pub type CmdLine = Vec<Bytes>;

/// Extracts a command line from a parsed frame.
///
/// Returns `None` when the frame is not a non-empty array of non-null
/// bulk strings.
pub fn cmdline_from_frame(frame: Frame) -> Option<CmdLine> {
    let items = match frame {
        Frame::Array(Some(items)) if !items.is_empty() => items,
        _ => return None,
    };

    let mut line = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Frame::Bulk(Some(data)) => line.push(data),
            _ => return None,
        }
    }
    Some(line)
}

/// Encodes a command line as a RESP multi-bulk frame.
///
/// This is the exact byte sequence written to the AOF and broadcast to
/// replicas for mutator commands.
pub fn encode_command(parts: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(b'*');
    let mut itoa_buf = itoa::Buffer::new();
    buf.put_slice(itoa_buf.format(parts.len()).as_bytes());
    buf.put_slice(b"\r\n");
    for part in parts {
        buf.put_u8(b'$');
        buf.put_slice(itoa_buf.format(part.len()).as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(part);
        buf.put_slice(b"\r\n");
    }
    buf.freeze()
}
