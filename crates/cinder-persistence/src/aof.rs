//! Append-only file engine.
//!
//! One engine per database file (`db<i>.aof`). Mutator commands arrive on a
//! bounded channel as pre-encoded RESP multi-bulk frames — the same bytes
//! the client sent — and a single writer task drains the channel into a
//! buffered writer. The writer task also appends every frame to the
//! replication backlog and fans it out to attached replica sinks, so AOF
//! order, backlog order, and broadcast order are one and the same.
//!
//! Durability: the writer flushes and fsyncs after 1024 buffered frames or
//! once per second, whichever comes first. A failed append is logged
//! immediately and surfaced again at the next flush.
//!
//! Rewrite compacts the log: a snapshot of the live keyspace is written to
//! `db<i>.aof.tmp` as minimal reconstruction commands, frames that arrive
//! mid-rewrite are parked in a buffer and drained into the temp file, and
//! the temp file is atomically renamed over the live log.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cinder_protocol::{cmdline_from_frame, parse_frame, CmdLine};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::backlog::Backlog;

/// Capacity of the submit channel. Senders experience backpressure once
/// this many frames are queued; frames are never dropped.
const CHANNEL_CAPACITY: usize = 4096;

/// Flush after this many frames have been buffered since the last flush.
const FLUSH_BATCH: usize = 1024;

/// Flush at least this often while frames are pending.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Rewrite is considered only once the file reaches this size.
const REWRITE_MIN_SIZE: i64 = 64 * 1024 * 1024;

/// ...and only when it has grown by this percentage over the baseline.
const REWRITE_GROWTH_PCT: i64 = 25;

const STATE_NORMAL: u8 = 0;
const STATE_REWRITING: u8 = 1;

/// Errors surfaced by the AOF engine.
#[derive(Debug, Error)]
pub enum AofError {
    #[error("aof io error: {0}")]
    Io(#[from] io::Error),
}

/// A replica attached to this engine's fan-out set.
///
/// The engine pushes raw frame bytes into the sink's channel; a forwarder
/// task owned by the server copies them onto the replica's socket. A closed
/// channel means the replica is gone and the sink is dropped.
#[derive(Debug, Clone)]
pub struct ReplicaSink {
    /// Remote address, used as the identity within the fan-out set.
    pub addr: String,
    pub tx: mpsc::UnboundedSender<Bytes>,
}

/// Append-only log for one database.
pub struct AofEngine {
    db_index: usize,
    tx: mpsc::Sender<Bytes>,
    shared: Arc<Shared>,
}

struct Shared {
    path: PathBuf,
    file: Mutex<LogFile>,
    /// Global write offset: total stream bytes produced by this engine.
    offset: AtomicI64,
    state: AtomicU8,
    /// Frames that arrived while a rewrite was in progress.
    rewrite_buf: Mutex<Vec<Bytes>>,
    /// File size at the end of the previous rewrite (or at open).
    baseline: AtomicI64,
    write_failed: AtomicBool,
    backlog: Option<Arc<Mutex<Backlog>>>,
    replicas: Mutex<Vec<ReplicaSink>>,
}

struct LogFile {
    writer: BufWriter<File>,
}

impl AofEngine {
    /// Opens (or creates) `<dir>/db<index>.aof` and starts the writer task.
    ///
    /// Must be called from within a tokio runtime. When `backlog` is given,
    /// every appended frame is mirrored into it.
    pub fn open(
        dir: impl AsRef<Path>,
        db_index: usize,
        backlog: Option<Arc<Mutex<Backlog>>>,
    ) -> Result<Arc<Self>, AofError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path = dir.join(format!("db{db_index}.aof"));
        let file = open_append(&path)?;
        let size = file.metadata()?.len() as i64;

        let shared = Arc::new(Shared {
            path,
            file: Mutex::new(LogFile {
                writer: BufWriter::new(file),
            }),
            offset: AtomicI64::new(size),
            state: AtomicU8::new(STATE_NORMAL),
            rewrite_buf: Mutex::new(Vec::new()),
            baseline: AtomicI64::new(size),
            write_failed: AtomicBool::new(false),
            backlog,
            replicas: Mutex::new(Vec::new()),
        });

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run_writer(rx, Arc::clone(&shared)));

        Ok(Arc::new(Self {
            db_index,
            tx,
            shared,
        }))
    }

    /// Submits one encoded command frame for appending.
    ///
    /// Awaits briefly when the channel is full (bounded backpressure); the
    /// frame is only lost if the writer task has already shut down.
    pub async fn submit(&self, frame: Bytes) {
        if self.tx.send(frame).await.is_err() {
            warn!(db = self.db_index, "aof writer task gone; frame not recorded");
        }
    }

    /// The global write offset: total stream bytes this engine has produced.
    pub fn current_offset(&self) -> i64 {
        self.shared.offset.load(Ordering::Acquire)
    }

    /// Returns `true` when the log file holds any data.
    pub fn has_data(&self) -> bool {
        fs::metadata(&self.shared.path)
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Current log file size in bytes.
    pub fn log_size(&self) -> i64 {
        fs::metadata(&self.shared.path)
            .map(|m| m.len() as i64)
            .unwrap_or(0)
    }

    /// Path of the live log file.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn db_index(&self) -> usize {
        self.db_index
    }

    /// Replays the log, handing each decoded command line to `replay`.
    ///
    /// Stops cleanly at end-of-file; a corrupt or truncated tail aborts the
    /// replay at the last successfully parsed frame, with a warning.
    /// Returns the number of frames replayed.
    pub fn load(&self, mut replay: impl FnMut(CmdLine)) -> Result<usize, AofError> {
        let data = fs::read(&self.shared.path)?;
        let mut pos = 0;
        let mut count = 0;

        while pos < data.len() {
            match parse_frame(&data[pos..]) {
                Ok(Some((frame, consumed))) => {
                    pos += consumed;
                    match cmdline_from_frame(frame) {
                        Some(line) => {
                            replay(line);
                            count += 1;
                        }
                        None => warn!(
                            db = self.db_index,
                            at = pos,
                            "non-command frame in aof, skipping"
                        ),
                    }
                }
                Ok(None) => {
                    warn!(
                        db = self.db_index,
                        trailing = data.len() - pos,
                        "aof ends in a partial frame; stopping replay"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        db = self.db_index,
                        at = pos,
                        "corrupt aof tail ({e}); stopping replay"
                    );
                    break;
                }
            }
        }
        Ok(count)
    }

    /// Returns the full log contents and the global offset of their first
    /// byte. Used to serve a full resynchronization.
    pub fn read_all(&self) -> Result<(Vec<u8>, i64), AofError> {
        let mut lf = self.shared.file.lock().unwrap();
        lf.writer.flush()?;
        let data = fs::read(&self.shared.path)?;

        let end = match &self.shared.backlog {
            Some(b) => b.lock().unwrap().end_offset(),
            None => self.shared.offset.load(Ordering::Acquire),
        };
        let start = end - data.len() as i64;
        Ok((data, start))
    }

    /// Truncates the log to zero length and re-seeds the write offset.
    /// Used by a replica at the start of a full resynchronization.
    pub fn reset(&self, offset: i64) -> Result<(), AofError> {
        let mut lf = self.shared.file.lock().unwrap();
        lf.writer.flush()?;
        let file = lf.writer.get_ref();
        file.set_len(0)?;
        file.sync_all()?;

        self.shared.rewrite_buf.lock().unwrap().clear();
        self.shared.offset.store(offset, Ordering::Release);
        self.shared.baseline.store(0, Ordering::Release);
        Ok(())
    }

    /// Returns `true` when the file is big enough and has grown enough
    /// past the rewrite baseline to justify a rewrite.
    pub fn should_rewrite(&self) -> bool {
        let size = self.log_size();
        let baseline = self.shared.baseline.load(Ordering::Acquire).max(1);
        size >= REWRITE_MIN_SIZE && (size - baseline) * 100 / baseline >= REWRITE_GROWTH_PCT
    }

    /// Compacts the log.
    ///
    /// `snapshot` is invoked only after the engine has won the rewrite
    /// state transition; it must return the minimal reconstruction frames
    /// for the current keyspace. Returns `Ok(false)` when another rewrite
    /// is already running.
    pub fn rewrite(&self, snapshot: impl FnOnce() -> Vec<Bytes>) -> Result<bool, AofError> {
        if self
            .shared
            .state
            .compare_exchange(
                STATE_NORMAL,
                STATE_REWRITING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(false);
        }

        let tmp_path = self.shared.path.with_extension("aof.tmp");
        match self.shared.run_rewrite(snapshot(), &tmp_path) {
            Ok(()) => {
                info!(
                    db = self.db_index,
                    size = self.log_size(),
                    "aof rewrite complete"
                );
                Ok(true)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                self.shared.abort_rewrite();
                Err(e)
            }
        }
    }

    /// Attaches a replica sink; subsequent frames are broadcast to it.
    pub fn add_replica(&self, sink: ReplicaSink) {
        let mut replicas = self.shared.replicas.lock().unwrap();
        replicas.retain(|s| s.addr != sink.addr);
        replicas.push(sink);
    }

    /// Detaches the replica sink registered under `addr`.
    pub fn remove_replica(&self, addr: &str) {
        self.shared.replicas.lock().unwrap().retain(|s| s.addr != addr);
    }

    pub fn replica_count(&self) -> usize {
        self.shared.replicas.lock().unwrap().len()
    }

    /// Flushes and fsyncs whatever the writer task has produced so far.
    /// Called on shutdown after the submit side has quiesced.
    pub fn flush_sync(&self) {
        self.shared.flush();
    }
}

impl Shared {
    /// Appends one frame: file (or rewrite buffer), offset, backlog.
    fn append_frame(&self, frame: &Bytes) {
        let mut redirected = false;
        if self.state.load(Ordering::Acquire) == STATE_REWRITING {
            let mut buf = self.rewrite_buf.lock().unwrap();
            // recheck under the lock: a rewrite finishing concurrently must
            // not leave this frame stranded in a buffer nobody drains
            if self.state.load(Ordering::Acquire) == STATE_REWRITING {
                buf.push(frame.clone());
                redirected = true;
            }
        }

        if !redirected {
            let mut lf = self.file.lock().unwrap();
            if let Err(e) = lf.writer.write_all(frame) {
                self.write_failed.store(true, Ordering::Release);
                error!(path = %self.path.display(), "aof append failed: {e}");
            }
        }

        self.offset.fetch_add(frame.len() as i64, Ordering::AcqRel);

        if let Some(backlog) = &self.backlog {
            backlog.lock().unwrap().append(frame);
        }
    }

    /// Fans a frame out to all attached replicas, dropping dead sinks.
    fn broadcast(&self, frame: &Bytes) {
        let mut replicas = self.replicas.lock().unwrap();
        if replicas.is_empty() {
            return;
        }
        replicas.retain(|sink| {
            if sink.tx.send(frame.clone()).is_ok() {
                true
            } else {
                warn!(replica = %sink.addr, "replica sink closed; removing from fan-out");
                false
            }
        });
    }

    fn flush(&self) {
        if self.write_failed.swap(false, Ordering::AcqRel) {
            error!(
                path = %self.path.display(),
                "aof appends failed since the last flush; the log is missing frames"
            );
        }

        let mut lf = self.file.lock().unwrap();
        if let Err(e) = lf.writer.flush() {
            error!(path = %self.path.display(), "aof flush failed: {e}");
            return;
        }
        if let Err(e) = lf.writer.get_ref().sync_all() {
            error!(path = %self.path.display(), "aof fsync failed: {e}");
        }
    }

    fn run_rewrite(&self, frames: Vec<Bytes>, tmp_path: &Path) -> Result<(), AofError> {
        let tmp = File::create(tmp_path)?;
        let mut w = BufWriter::new(tmp);
        for frame in &frames {
            w.write_all(frame)?;
        }

        // hold the buffer lock through the swap: the writer task rechecks
        // the state under this lock, so no frame can slip in between the
        // drain and the state reset
        let mut buf = self.rewrite_buf.lock().unwrap();
        for frame in buf.iter() {
            w.write_all(frame)?;
        }
        w.flush()?;
        w.get_ref().sync_all()?;
        drop(w);

        fs::rename(tmp_path, &self.path)?;

        let file = open_append(&self.path)?;
        let size = file.metadata()?.len() as i64;
        {
            let mut lf = self.file.lock().unwrap();
            lf.writer = BufWriter::new(file);
        }
        buf.clear();
        self.offset.store(size, Ordering::Release);
        self.baseline.store(size, Ordering::Release);
        self.state.store(STATE_NORMAL, Ordering::Release);
        Ok(())
    }

    /// Failure path: the old file stays authoritative, and frames parked in
    /// the rewrite buffer are appended to it so none are lost.
    fn abort_rewrite(&self) {
        let mut buf = self.rewrite_buf.lock().unwrap();
        {
            let mut lf = self.file.lock().unwrap();
            for frame in buf.iter() {
                if let Err(e) = lf.writer.write_all(frame) {
                    self.write_failed.store(true, Ordering::Release);
                    error!(path = %self.path.display(), "aof append failed: {e}");
                    break;
                }
            }
        }
        buf.clear();
        self.state.store(STATE_NORMAL, Ordering::Release);
    }
}

/// Single consumer of the submit channel. Exits (after a final flush) when
/// every engine handle has been dropped.
async fn run_writer(mut rx: mpsc::Receiver<Bytes>, shared: Arc<Shared>) {
    let mut tick = tokio::time::interval(FLUSH_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut buffered = 0usize;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    shared.append_frame(&frame);
                    shared.broadcast(&frame);
                    buffered += 1;
                    if buffered >= FLUSH_BATCH {
                        shared.flush();
                        buffered = 0;
                    }
                }
                None => {
                    shared.flush();
                    break;
                }
            },
            _ = tick.tick() => {
                if buffered > 0 {
                    shared.flush();
                    buffered = 0;
                }
            }
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true).read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o644);
    }
    opts.open(path)
}
