//! Per-connection handler.
//!
//! Reads RESP frames from the socket, routes them through the executor,
//! and writes replies back. PSYNC and REPLCONF are intercepted before the
//! executor; a server running as a replica refuses mutators from ordinary
//! clients. A connection promoted to the replica role stops receiving
//! command replies — its socket carries the replication stream instead.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use cinder_core::commands::is_mutator;
use cinder_core::{Role, Session};
use cinder_protocol::{cmdline_from_frame, parse_frame, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tracing::debug;

use crate::replication;
use crate::server::ServerState;

/// Initial read buffer capacity. 4KB covers most commands comfortably.
const BUF_CAPACITY: usize = 4096;

/// Maximum read buffer size before the client is disconnected. Caps what
/// a single connection with an incomplete frame can hold in memory.
const MAX_BUF_SIZE: usize = 64 * 1024 * 1024;

const READONLY_MSG: &[u8] = b"-READONLY You can't write against a read only replica.\r\n";

/// Shared write half of a connection.
///
/// Cloned into the replication forwarder task once a connection is
/// promoted to a replica, so stream frames and handshake writes are
/// serialized on the same socket.
#[derive(Clone)]
pub struct ConnWriter {
    inner: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
}

impl ConnWriter {
    pub fn new(half: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(half)),
        }
    }

    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut half = self.inner.lock().await;
        half.write_all(data).await
    }
}

/// Drives one accepted connection to completion.
pub async fn handle(state: Arc<ServerState>, stream: TcpStream, peer: SocketAddr) {
    let (mut read_half, write_half) = stream.into_split();
    let writer = ConnWriter::new(write_half);
    let mut session = Session::client(peer.to_string());
    let mut buf = BytesMut::with_capacity(BUF_CAPACITY);

    let result = async {
        loop {
            if buf.len() > MAX_BUF_SIZE {
                let _ = writer
                    .write_all(b"-ERR max buffer size exceeded, closing connection\r\n")
                    .await;
                return Ok(());
            }

            match read_half.read_buf(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }

            // drain as many complete frames as the buffer holds (pipelining)
            loop {
                let (frame, consumed) = match parse_frame(&buf) {
                    Ok(Some(parsed)) => parsed,
                    Ok(None) => break,
                    Err(e) => {
                        let reply = Frame::error(format!("ERR protocol error: {e}"));
                        let _ = writer.write_all(&reply.to_bytes()).await;
                        return Ok(());
                    }
                };
                buf.advance(consumed);

                let cmdline = match cmdline_from_frame(frame) {
                    Some(line) => line,
                    None => {
                        let reply =
                            Frame::error("ERR protocol error: expected an array of bulk strings");
                        let _ = writer.write_all(&reply.to_bytes()).await;
                        return Ok(());
                    }
                };

                let name = String::from_utf8_lossy(&cmdline[0]).to_ascii_lowercase();
                match name.as_str() {
                    "psync" => {
                        replication::handle_psync(
                            &state.router,
                            &state.repl,
                            &writer,
                            &mut session,
                            &cmdline,
                        )
                        .await?;
                    }
                    "replconf" => {
                        replication::handle_replconf(&state.repl, &writer, &session, &cmdline)
                            .await?;
                    }
                    "quit" => {
                        let _ = writer.write_all(b"+OK\r\n").await;
                        return Ok(());
                    }
                    _ => {
                        if state.is_replica
                            && session.role() == Role::Normal
                            && is_mutator(&name)
                        {
                            writer.write_all(READONLY_MSG).await?;
                            continue;
                        }

                        let reply = state.router.execute(&mut session, &cmdline).await;
                        // a promoted connection carries the replication
                        // stream; command replies would corrupt it
                        if !session.is_replica() {
                            writer.write_all(&reply.to_bytes()).await?;
                        }
                    }
                }
            }
        }
    }
    .await;

    if let Err(e) = result {
        debug!(peer = %peer, "connection error: {e}");
    }

    if session.is_replica() {
        state.router.default_db().aof().remove_replica(session.addr());
        state.repl.remove_replica(session.addr());
        debug!(peer = %peer, "replica detached");
    }
    session.close();
}
