//! Master-side replication: the PSYNC handshake and replica bookkeeping.
//!
//! A replica presents a replication ID and an offset. When the ID matches
//! this server and the backlog still holds that offset, the replica gets
//! `+CONTINUE` plus the missing slice of the stream; otherwise it gets
//! `+FULLRESYNC <id> <offset>` followed by the entire current AOF. Either
//! way the connection is attached to the AOF engine's fan-out set, so
//! every subsequent mutator frame reaches it in log order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use cinder_core::{DbRouter, Session};
use cinder_persistence::aof::ReplicaSink;
use cinder_persistence::Backlog;
use cinder_protocol::CmdLine;
use rand::RngCore;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::ConnWriter;

/// Backlog window: 1 MiB, matching Redis.
pub const DEFAULT_BACKLOG_SIZE: i64 = 1 << 20;

/// Per-replica acknowledgement record, for lag observability.
#[derive(Debug, Clone)]
pub struct ReplicaInfo {
    pub addr: String,
    pub ack_offset: i64,
    pub last_ack: Instant,
}

/// Replication state on the master side.
pub struct Replication {
    repl_id: String,
    backlog: Arc<Mutex<Backlog>>,
    replicas: Mutex<HashMap<String, ReplicaInfo>>,
}

impl Replication {
    pub fn new(backlog: Arc<Mutex<Backlog>>) -> Self {
        Self {
            repl_id: gen_repl_id(),
            backlog,
            replicas: Mutex::new(HashMap::new()),
        }
    }

    /// This server's 40-hex-char replication identity.
    pub fn repl_id(&self) -> &str {
        &self.repl_id
    }

    pub fn backlog(&self) -> &Arc<Mutex<Backlog>> {
        &self.backlog
    }

    /// Replaces the backlog window, re-anchored at `offset`. Used by the
    /// replica side after a full resynchronization.
    pub fn reinit_backlog(&self, offset: i64) {
        *self.backlog.lock().unwrap() = Backlog::new(DEFAULT_BACKLOG_SIZE, offset);
    }

    pub fn add_replica(&self, addr: &str) {
        self.replicas.lock().unwrap().insert(
            addr.to_owned(),
            ReplicaInfo {
                addr: addr.to_owned(),
                ack_offset: 0,
                last_ack: Instant::now(),
            },
        );
    }

    pub fn remove_replica(&self, addr: &str) {
        self.replicas.lock().unwrap().remove(addr);
    }

    /// Records a `REPLCONF ACK` from the replica at `addr`.
    pub fn handle_ack(&self, addr: &str, offset: i64) {
        let mut replicas = self.replicas.lock().unwrap();
        if let Some(info) = replicas.get_mut(addr) {
            info.ack_offset = offset;
            info.last_ack = Instant::now();
        }
    }

    /// Snapshot of every attached replica's acknowledgement state.
    pub fn replicas(&self) -> Vec<ReplicaInfo> {
        self.replicas.lock().unwrap().values().cloned().collect()
    }
}

/// Generates a fresh 40-hex-char replication ID.
pub fn gen_repl_id() -> String {
    let mut raw = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut raw);
    raw.iter().map(|b| format!("{b:02x}")).collect()
}

/// Serves `PSYNC <repl-id> <offset>` on an accepted connection.
///
/// On success the session is promoted to the replica role and the
/// connection's write half feeds from the AOF engine's fan-out.
pub async fn handle_psync(
    router: &DbRouter,
    repl: &Replication,
    writer: &ConnWriter,
    session: &mut Session,
    cmdline: &CmdLine,
) -> std::io::Result<()> {
    let (slave_id, slave_offset) = parse_psync_args(cmdline);
    let engine = router.default_db().aof();

    let partial = slave_id == repl.repl_id() && {
        let backlog = repl.backlog().lock().unwrap();
        backlog.can_serve(slave_offset)
    };

    if partial {
        let slice = repl
            .backlog()
            .lock()
            .unwrap()
            .read_from(slave_offset)
            .unwrap_or_default();
        writer.write_all(b"+CONTINUE\r\n").await?;
        writer.write_all(&slice).await?;
        info!(replica = session.addr(), offset = slave_offset, "partial resync served");
    } else {
        let (data, start_offset) = engine
            .read_all()
            .map_err(|e| std::io::Error::other(format!("aof read for full resync: {e}")))?;
        let header = format!("+FULLRESYNC {} {}\r\n", repl.repl_id(), start_offset);
        writer.write_all(header.as_bytes()).await?;
        writer.write_all(&data).await?;
        info!(
            replica = session.addr(),
            bytes = data.len(),
            start_offset,
            "full resync served"
        );
    }

    // fan-out: a forwarder task copies broadcast frames onto this socket
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.add_replica(ReplicaSink {
        addr: session.addr().to_owned(),
        tx,
    });
    let forward_writer = writer.clone();
    let forward_addr = session.addr().to_owned();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = forward_writer.write_all(&frame).await {
                debug!(replica = %forward_addr, "replica stream write failed: {e}");
                break;
            }
        }
    });

    repl.add_replica(session.addr());
    session.promote_to_replica();
    Ok(())
}

/// Handles `REPLCONF` from a replica. `ACK <offset>` updates the replica
/// record and sends nothing back; other subcommands are acknowledged.
pub async fn handle_replconf(
    repl: &Replication,
    writer: &ConnWriter,
    session: &Session,
    cmdline: &CmdLine,
) -> std::io::Result<()> {
    let sub = cmdline
        .get(1)
        .map(|arg| String::from_utf8_lossy(arg).to_ascii_uppercase())
        .unwrap_or_default();

    if sub == "ACK" {
        let offset = cmdline
            .get(2)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|s| s.parse().ok());
        match offset {
            Some(offset) => repl.handle_ack(session.addr(), offset),
            None => warn!(replica = session.addr(), "malformed REPLCONF ACK"),
        }
        return Ok(());
    }

    writer.write_all(b"+OK\r\n").await
}

fn parse_psync_args(cmdline: &CmdLine) -> (String, i64) {
    if cmdline.len() < 3 {
        return (String::new(), 0);
    }
    let id = String::from_utf8_lossy(&cmdline[1]).into_owned();
    let offset = std::str::from_utf8(&cmdline[2])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    (id, offset)
}
