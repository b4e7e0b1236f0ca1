//! cinder-protocol: RESP wire protocol implementation.
//!
//! Provides incremental parsing and direct-to-buffer serialization of the
//! RESP dialect spoken by cinder: simple strings, errors, integers, bulk
//! strings (nullable) and arrays (nullable).
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use cinder_protocol::{parse_frame, Frame};
//!
//! // parse a simple string
//! let (frame, consumed) = parse_frame(b"+OK\r\n").unwrap().unwrap();
//! assert_eq!(frame, Frame::Simple("OK".into()));
//! assert_eq!(consumed, 5);
//!
//! // serialize a frame
//! let mut buf = BytesMut::new();
//! frame.serialize(&mut buf);
//! assert_eq!(&buf[..], b"+OK\r\n");
//! ```

pub mod command;
pub mod error;
pub mod frame;
pub mod parse;
mod serialize;

pub use command::{cmdline_from_frame, encode_command, CmdLine};
pub use error::ProtocolError;
pub use frame::Frame;
pub use parse::parse_frame;
