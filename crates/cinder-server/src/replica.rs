//! Replica-side synchronization.
//!
//! Connects to the configured master, sends PSYNC (first `? 0`, then the
//! remembered id and offset), and applies the resulting stream: either the
//! full AOF transfer after `+FULLRESYNC`, or the incremental tail after
//! `+CONTINUE`. Applied commands run through the local executor with the
//! replies discarded; the advertised offset is the local AOF engine's
//! offset, reported back with `REPLCONF ACK` every 3 seconds. Any error
//! drops the connection, waits 2 seconds, and retries from the top.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use cinder_core::Session;
use cinder_protocol::{cmdline_from_frame, encode_command, parse_frame, Frame};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::connection::ConnWriter;
use crate::server::ServerState;

/// Delay between reconnection attempts.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Interval between `REPLCONF ACK` reports while applying the stream.
const ACK_INTERVAL: Duration = Duration::from_secs(3);

/// What the replica knows about its master across reconnects.
#[derive(Debug)]
struct MasterLink {
    repl_id: String,
    offset: i64,
}

/// The replica-side client. One per process when `--replicaof` is set.
pub struct ReplicaClient {
    master_addr: String,
    state: Arc<ServerState>,
    link: Mutex<MasterLink>,
}

impl ReplicaClient {
    /// Spawns the replication loop in a background task.
    pub fn start(master_addr: String, state: Arc<ServerState>) {
        let client = Arc::new(Self {
            master_addr,
            state,
            link: Mutex::new(MasterLink {
                repl_id: "?".into(),
                offset: 0,
            }),
        });
        tokio::spawn(async move {
            client.run().await;
        });
    }

    async fn run(&self) {
        loop {
            info!(master = %self.master_addr, "connecting to master");
            match self.sync_once().await {
                Ok(()) => info!("replication connection ended"),
                Err(e) => warn!("replication error: {e}; retrying"),
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    /// One connection's worth of replication: handshake, then apply loop.
    async fn sync_once(&self) -> io::Result<()> {
        let stream = TcpStream::connect(&self.master_addr).await?;
        let (mut read_half, write_half) = stream.into_split();
        let writer = ConnWriter::new(write_half);

        // PSYNC <repl-id> <offset>
        let psync = {
            let link = self.link.lock().unwrap();
            encode_command(&[
                Bytes::from_static(b"PSYNC"),
                Bytes::from(link.repl_id.clone()),
                Bytes::from(link.offset.to_string()),
            ])
        };
        writer.write_all(&psync).await?;

        let mut buf = BytesMut::with_capacity(4096);
        let first = read_frame(&mut read_half, &mut buf).await?;
        let text = match first {
            Frame::Simple(text) => text,
            other => {
                return Err(invalid_data(format!(
                    "unexpected master reply to PSYNC: {other:?}"
                )))
            }
        };

        if let Some(rest) = text.strip_prefix("FULLRESYNC ") {
            let mut parts = rest.split_whitespace();
            let master_id = parts
                .next()
                .ok_or_else(|| invalid_data("FULLRESYNC missing repl-id"))?;
            let start_offset: i64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| invalid_data("FULLRESYNC missing offset"))?;

            info!(master_id, start_offset, "full resync from master");
            {
                let mut link = self.link.lock().unwrap();
                link.repl_id = master_id.to_owned();
                link.offset = start_offset;
            }

            // wipe local state and re-anchor log and backlog at the
            // master's offset before applying the transferred snapshot
            let db = self.state.router.default_db();
            db.clear();
            db.aof()
                .reset(start_offset)
                .map_err(|e| invalid_data(format!("aof reset: {e}")))?;
            self.state.repl.reinit_backlog(start_offset);

            self.apply_loop(read_half, writer, buf).await
        } else if text == "CONTINUE" {
            info!("partial resync from master");
            self.apply_loop(read_half, writer, buf).await
        } else {
            Err(invalid_data(format!("unexpected master reply: {text}")))
        }
    }

    /// Applies parsed frames from the master until the connection fails.
    async fn apply_loop(
        &self,
        mut read_half: OwnedReadHalf,
        writer: ConnWriter,
        mut buf: BytesMut,
    ) -> io::Result<()> {
        let mut session = Session::master_link(self.master_addr.clone());
        let mut ack = tokio::time::interval(ACK_INTERVAL);
        ack.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // drain whatever is already buffered before reading again
            loop {
                let (frame, consumed) = match parse_frame(&buf) {
                    Ok(Some(parsed)) => parsed,
                    Ok(None) => break,
                    Err(e) => return Err(invalid_data(format!("master stream: {e}"))),
                };
                buf.advance(consumed);

                let cmdline = match cmdline_from_frame(frame) {
                    Some(line) => line,
                    None => {
                        warn!("non-command frame in master stream, skipping");
                        continue;
                    }
                };

                // replies are discarded; applying the mutator appends to
                // the local AOF, which is what advances our offset
                let _ = self.state.router.execute(&mut session, &cmdline).await;
                let offset = self.state.router.default_db().aof().current_offset();
                self.link.lock().unwrap().offset = offset;
            }

            tokio::select! {
                _ = ack.tick() => {
                    self.send_ack(&writer).await?;
                }
                read = read_half.read_buf(&mut buf) => {
                    match read {
                        Ok(0) => return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "master closed the replication stream",
                        )),
                        Ok(_) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn send_ack(&self, writer: &ConnWriter) -> io::Result<()> {
        let offset = self.link.lock().unwrap().offset;
        let ack = encode_command(&[
            Bytes::from_static(b"REPLCONF"),
            Bytes::from_static(b"ACK"),
            Bytes::from(offset.to_string()),
        ]);
        writer.write_all(&ack).await
    }
}

/// Reads until one complete frame is available at the front of `buf`.
async fn read_frame(read_half: &mut OwnedReadHalf, buf: &mut BytesMut) -> io::Result<Frame> {
    loop {
        match parse_frame(buf) {
            Ok(Some((frame, consumed))) => {
                buf.advance(consumed);
                return Ok(frame);
            }
            Ok(None) => {}
            Err(e) => return Err(invalid_data(format!("master handshake: {e}"))),
        }
        match read_half.read_buf(buf).await {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "master closed during handshake",
                ))
            }
            Ok(_) => {}
            Err(e) => return Err(e),
        }
    }
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
