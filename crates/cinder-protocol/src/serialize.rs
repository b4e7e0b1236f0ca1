//! Direct-to-buffer RESP serialization.
//!
//! Writes frames into a `BytesMut` with no intermediate allocations.
//! Integer-to-string conversion uses `itoa` for stack-based formatting.

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::Frame;

impl Frame {
    /// Serializes this frame into the provided buffer.
    ///
    /// Writes the full RESP wire representation, including type prefix
    /// and trailing `\r\n` delimiters.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Error(msg) => {
                dst.put_u8(b'-');
                dst.put_slice(msg.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                dst.put_u8(b':');
                write_i64(*n, dst);
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(Some(data)) => {
                dst.put_u8(b'$');
                write_i64(data.len() as i64, dst);
                dst.put_slice(b"\r\n");
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(None) => {
                dst.put_slice(b"$-1\r\n");
            }
            Frame::Array(Some(items)) => {
                dst.put_u8(b'*');
                write_i64(items.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst);
                }
            }
            Frame::Array(None) => {
                dst.put_slice(b"*-1\r\n");
            }
        }
    }

    /// Returns the complete RESP payload for this frame.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf);
        buf.freeze()
    }
}

/// Writes an i64 as its decimal ASCII representation directly into the buffer.
fn write_i64(val: i64, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(val).as_bytes());
}
