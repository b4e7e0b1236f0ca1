//! Client-side connection: one request frame out, one reply frame in.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use cinder_protocol::{encode_command, parse_frame, Frame, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("server closed the connection")]
    Disconnected,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// A connected client session.
pub struct Connection {
    stream: TcpStream,
    buf: BytesMut,
}

impl Connection {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            buf: BytesMut::with_capacity(4096),
        })
    }

    /// Sends one command and reads one reply.
    pub async fn send_command(&mut self, parts: &[String]) -> Result<Frame, ClientError> {
        let line: Vec<Bytes> = parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        self.stream.write_all(&encode_command(&line)).await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Frame, ClientError> {
        loop {
            if let Some((frame, consumed)) = parse_frame(&self.buf)? {
                self.buf.advance(consumed);
                return Ok(frame);
            }
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(ClientError::Disconnected);
            }
        }
    }
}
