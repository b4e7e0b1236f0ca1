//! Multi-database router and command executor.
//!
//! Holds one [`Keyspace`] per logical database and the immutable command
//! registry. `select` is handled here, before per-database dispatch, so a
//! database's AOF never contains a frame that would re-route the rest of
//! the file. Everything else flows: normalize name → look up → check
//! arity → run handler → append successful mutators to the current
//! database's AOF.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cinder_persistence::{AofEngine, AofError, Backlog};
use cinder_protocol::{encode_command, CmdLine, Frame};
use tracing::{error, info, warn};

use crate::commands::{arity_ok, is_mutator, lower, CommandRegistry};
use crate::keyspace::Keyspace;
use crate::session::Session;

/// Default number of logical databases.
pub const DEFAULT_DB_COUNT: usize = 16;

/// All logical databases plus the command table.
pub struct DbRouter {
    dbs: Vec<Arc<Keyspace>>,
    registry: CommandRegistry,
}

impl DbRouter {
    /// Opens `db_count` keyspaces with their AOF engines under `aof_dir`.
    /// The replication backlog, when given, attaches to database 0's
    /// engine — the stream PSYNC serves.
    pub fn open(
        aof_dir: impl AsRef<Path>,
        db_count: usize,
        backlog: Option<Arc<Mutex<Backlog>>>,
    ) -> Result<Self, AofError> {
        let aof_dir = aof_dir.as_ref();
        let mut dbs = Vec::with_capacity(db_count);
        for index in 0..db_count {
            let attached = if index == 0 { backlog.clone() } else { None };
            let aof = AofEngine::open(aof_dir, index, attached)?;
            dbs.push(Arc::new(Keyspace::new(index, aof)));
        }
        Ok(Self {
            dbs,
            registry: CommandRegistry::new(),
        })
    }

    pub fn db(&self, index: usize) -> Option<&Arc<Keyspace>> {
        self.dbs.get(index)
    }

    /// Database 0: the default selection and the replicated stream.
    pub fn default_db(&self) -> &Arc<Keyspace> {
        &self.dbs[0]
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    /// Executes one command line for a session. Successful mutators from
    /// AOF-recording sessions are appended (with backpressure) to the
    /// current database's log.
    pub async fn execute(&self, session: &mut Session, cmdline: &CmdLine) -> Frame {
        let (reply, persist) = self.dispatch(session, cmdline);
        if let Some((aof, frame)) = persist {
            aof.submit(frame).await;
        }
        reply
    }

    /// Synchronous dispatch. Returns the reply plus the AOF append the
    /// command earned, if any. Used directly by the startup replay, which
    /// never persists.
    pub fn dispatch(
        &self,
        session: &mut Session,
        cmdline: &CmdLine,
    ) -> (Frame, Option<(Arc<AofEngine>, Bytes)>) {
        let name = match cmdline.first() {
            Some(first) => lower(first),
            None => return (Frame::error("ERR empty command"), None),
        };

        if name == "select" {
            return (self.exec_select(session, cmdline), None);
        }

        let ks = match self.dbs.get(session.db_index()) {
            Some(ks) => ks,
            None => return (Frame::error("ERR DB index is out of range"), None),
        };

        let spec = match self.registry.get(name.as_str()) {
            Some(spec) => spec,
            None => {
                return (
                    Frame::error(format!("ERR unknown command '{name}'")),
                    None,
                )
            }
        };
        if !arity_ok(spec.arity, cmdline.len()) {
            return (Frame::arity_error(&name), None);
        }

        let reply = (spec.handler)(ks, &cmdline[1..]);

        let persist = (!reply.is_error() && is_mutator(&name) && session.records_aof())
            .then(|| (Arc::clone(ks.aof()), encode_command(cmdline)));

        (reply, persist)
    }

    /// SELECT n — changes the session's database. A bad index fails the
    /// command but leaves the connection (and its selection) intact.
    fn exec_select(&self, session: &mut Session, cmdline: &CmdLine) -> Frame {
        if cmdline.len() != 2 {
            return Frame::arity_error("select");
        }
        let index: i64 = match std::str::from_utf8(&cmdline[1])
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(index) => index,
            None => return Frame::error("ERR invalid DB index"),
        };
        if index < 0 || index as usize >= self.dbs.len() {
            return Frame::error("ERR DB index is out of range");
        }
        session.select(index as usize);
        Frame::ok()
    }

    /// Replays every non-empty AOF through an internal session, rebuilding
    /// the in-memory state before the server accepts connections.
    pub fn load_all(&self) -> Result<(), AofError> {
        for ks in &self.dbs {
            let engine = Arc::clone(ks.aof());
            if !engine.has_data() {
                continue;
            }

            let mut session = Session::internal(ks.index());
            let mut frames = 0usize;
            engine.load(|line| {
                let (reply, _) = self.dispatch(&mut session, &line);
                if reply.is_error() {
                    warn!(
                        db = ks.index(),
                        cmd = %String::from_utf8_lossy(&line[0]),
                        "aof replay produced an error reply"
                    );
                }
                frames += 1;
            })?;
            info!(db = ks.index(), frames, "aof replay complete");
        }
        Ok(())
    }

    /// Spawns the per-database maintenance tasks: the 1 Hz expiration
    /// sampler and the 10 s rewrite checker.
    pub fn start_background_tasks(&self) {
        for ks in &self.dbs {
            let sampler = Arc::clone(ks);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(1));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    sampler.expire_cycle();
                }
            });

            let rewriter = Arc::clone(ks);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(10));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    let engine = Arc::clone(rewriter.aof());
                    if !engine.should_rewrite() {
                        continue;
                    }
                    let snapshot_src = Arc::clone(&rewriter);
                    let joined = tokio::task::spawn_blocking(move || {
                        engine.rewrite(|| snapshot_src.rewrite_frames())
                    })
                    .await;
                    match joined {
                        Ok(Ok(true)) => info!(db = rewriter.index(), "aof rewritten"),
                        Ok(Ok(false)) => {}
                        Ok(Err(e)) => error!(db = rewriter.index(), "aof rewrite failed: {e}"),
                        Err(e) => error!(db = rewriter.index(), "rewrite task failed: {e}"),
                    }
                }
            });
        }
    }

    /// Flushes and fsyncs every database's AOF. Called on shutdown.
    pub fn flush_all(&self) {
        for ks in &self.dbs {
            ks.aof().flush_sync();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn line(parts: &[&str]) -> CmdLine {
        parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect()
    }

    async fn wait_for_offset(engine: &AofEngine, at_least: i64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while engine.current_offset() < at_least {
            assert!(Instant::now() < deadline, "aof writer did not catch up");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn execute_routes_and_replies() {
        let dir = tempfile::tempdir().unwrap();
        let router = DbRouter::open(dir.path(), 2, None).unwrap();
        let mut session = Session::client("test");

        assert_eq!(
            router.execute(&mut session, &line(&["SET", "k", "v"])).await,
            Frame::ok()
        );
        assert_eq!(
            router.execute(&mut session, &line(&["get", "k"])).await,
            Frame::bulk(Bytes::from_static(b"v"))
        );
    }

    #[tokio::test]
    async fn unknown_command_and_arity() {
        let dir = tempfile::tempdir().unwrap();
        let router = DbRouter::open(dir.path(), 1, None).unwrap();
        let mut session = Session::client("test");

        assert_eq!(
            router.execute(&mut session, &line(&["nosuch", "x"])).await,
            Frame::error("ERR unknown command 'nosuch'")
        );
        assert_eq!(
            router.execute(&mut session, &line(&["get"])).await,
            Frame::arity_error("get")
        );
        assert_eq!(
            router.execute(&mut session, &line(&["set", "k"])).await,
            Frame::arity_error("set")
        );
    }

    #[tokio::test]
    async fn select_switches_databases() {
        let dir = tempfile::tempdir().unwrap();
        let router = DbRouter::open(dir.path(), 4, None).unwrap();
        let mut session = Session::client("test");

        router.execute(&mut session, &line(&["set", "k", "db0"])).await;
        assert_eq!(
            router.execute(&mut session, &line(&["select", "1"])).await,
            Frame::ok()
        );
        assert_eq!(
            router.execute(&mut session, &line(&["get", "k"])).await,
            Frame::null_bulk()
        );
        router.execute(&mut session, &line(&["set", "k", "db1"])).await;

        router.execute(&mut session, &line(&["select", "0"])).await;
        assert_eq!(
            router.execute(&mut session, &line(&["get", "k"])).await,
            Frame::bulk(Bytes::from_static(b"db0"))
        );
    }

    #[tokio::test]
    async fn select_errors_keep_session_usable() {
        let dir = tempfile::tempdir().unwrap();
        let router = DbRouter::open(dir.path(), 2, None).unwrap();
        let mut session = Session::client("test");

        assert_eq!(
            router.execute(&mut session, &line(&["select", "nine"])).await,
            Frame::error("ERR invalid DB index")
        );
        assert_eq!(
            router.execute(&mut session, &line(&["select", "5"])).await,
            Frame::error("ERR DB index is out of range")
        );
        assert_eq!(session.db_index(), 0);
        assert_eq!(
            router.execute(&mut session, &line(&["set", "k", "v"])).await,
            Frame::ok()
        );
    }

    #[tokio::test]
    async fn mutators_reach_the_aof_and_reads_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let router = DbRouter::open(dir.path(), 1, None).unwrap();
        let mut session = Session::client("test");

        let set_line = line(&["set", "k", "v"]);
        let expected = encode_command(&set_line).len() as i64;
        router.execute(&mut session, &set_line).await;
        router.execute(&mut session, &line(&["get", "k"])).await;
        router.execute(&mut session, &line(&["strlen", "k"])).await;

        let engine = Arc::clone(router.default_db().aof());
        wait_for_offset(&engine, expected).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            engine.current_offset(),
            expected,
            "only the mutator may be appended"
        );
    }

    #[tokio::test]
    async fn failed_mutators_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let router = DbRouter::open(dir.path(), 1, None).unwrap();
        let mut session = Session::client("test");

        router.execute(&mut session, &line(&["set", "k", "v"])).await;
        // WRONGTYPE error: must not be appended
        let reply = router.execute(&mut session, &line(&["lpush", "k", "x"])).await;
        assert!(reply.is_error());

        let expected = encode_command(&line(&["set", "k", "v"])).len() as i64;
        let engine = Arc::clone(router.default_db().aof());
        wait_for_offset(&engine, expected).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.current_offset(), expected);
    }

    #[tokio::test]
    async fn internal_sessions_do_not_reappend() {
        let dir = tempfile::tempdir().unwrap();
        let router = DbRouter::open(dir.path(), 1, None).unwrap();
        let mut session = Session::internal(0);

        router.execute(&mut session, &line(&["set", "k", "v"])).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(router.default_db().aof().current_offset(), 0);
        assert!(router.default_db().exists(b"k"));
    }

    #[tokio::test]
    async fn aof_round_trip_across_restart() {
        let dir = tempfile::tempdir().unwrap();

        let mutators = [
            line(&["set", "k1", "v1"]),
            line(&["mset", "k2", "v2", "k3", "v3"]),
            line(&["rpush", "l", "a", "b", "c"]),
            line(&["ltrim", "l", "1", "-1"]),
            line(&["sadd", "s", "1", "2"]),
            line(&["zadd", "z", "1", "a", "2", "b"]),
            line(&["hset", "h", "f", "v"]),
            line(&["del", "k3"]),
        ];
        let expected: i64 = mutators
            .iter()
            .map(|l| encode_command(l).len() as i64)
            .sum();

        {
            let router = DbRouter::open(dir.path(), 1, None).unwrap();
            let mut session = Session::client("test");
            for cmd in &mutators {
                let reply = router.execute(&mut session, cmd).await;
                assert!(!reply.is_error(), "{cmd:?} -> {reply:?}");
            }
            let engine = Arc::clone(router.default_db().aof());
            wait_for_offset(&engine, expected).await;
            router.flush_all();
        }

        // "restart": fresh router over the same directory
        let router = DbRouter::open(dir.path(), 1, None).unwrap();
        router.load_all().unwrap();
        let mut session = Session::client("test");

        assert_eq!(
            router.execute(&mut session, &line(&["get", "k1"])).await,
            Frame::bulk(Bytes::from_static(b"v1"))
        );
        assert_eq!(
            router.execute(&mut session, &line(&["get", "k2"])).await,
            Frame::bulk(Bytes::from_static(b"v2"))
        );
        assert_eq!(
            router.execute(&mut session, &line(&["get", "k3"])).await,
            Frame::null_bulk()
        );
        assert_eq!(
            router.execute(&mut session, &line(&["lrange", "l", "0", "-1"])).await,
            Frame::multi_bulk(vec![
                Some(Bytes::from_static(b"b")),
                Some(Bytes::from_static(b"c")),
            ])
        );
        assert_eq!(
            router.execute(&mut session, &line(&["scard", "s"])).await,
            Frame::Integer(2)
        );
        assert_eq!(
            router.execute(&mut session, &line(&["zrank", "z", "b"])).await,
            Frame::Integer(1)
        );
        assert_eq!(
            router.execute(&mut session, &line(&["hget", "h", "f"])).await,
            Frame::bulk(Bytes::from_static(b"v"))
        );
    }
}
