//! The per-database keyspace.
//!
//! Two dictionaries: `data` maps keys to values, `ttl` maps a subset of
//! those keys to absolute expiry instants. Expired keys are removed lazily
//! on access — correctness never depends on the active sampler — and a
//! background cycle additionally samples the TTL dict to evict dead keys
//! that nobody reads. The keyspace owns the AOF engine for its database.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cinder_persistence::AofEngine;
use cinder_protocol::encode_command;

use crate::dict::ShardedDict;
use crate::types::Value;

/// Keys sampled from the TTL dict per active-expiration round.
pub const EXPIRE_SAMPLE_SIZE: usize = 20;

/// One logical database: data dict, TTL dict, AOF handle.
pub struct Keyspace {
    index: usize,
    data: ShardedDict<Value>,
    ttl: ShardedDict<Instant>,
    aof: Arc<AofEngine>,
}

impl Keyspace {
    pub fn new(index: usize, aof: Arc<AofEngine>) -> Self {
        Self {
            index,
            data: ShardedDict::new(),
            ttl: ShardedDict::new(),
            aof,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn aof(&self) -> &Arc<AofEngine> {
        &self.aof
    }

    /// Removes the key now if its TTL has passed. Returns `true` when the
    /// key was expired and purged.
    fn purge_if_expired(&self, key: &[u8]) -> bool {
        match self.ttl.get(key) {
            Some(at) if Instant::now() > at => {
                self.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Read access to a live value.
    pub fn with_value<R>(&self, key: &[u8], f: impl FnOnce(&Value) -> R) -> Option<R> {
        if self.purge_if_expired(key) {
            return None;
        }
        self.data.with(key, f)
    }

    /// Write access to a live value.
    pub fn with_value_mut<R>(&self, key: &[u8], f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        if self.purge_if_expired(key) {
            return None;
        }
        self.data.with_mut(key, f)
    }

    /// Write access, creating the value with `make` when the key is absent
    /// (or freshly expired).
    pub fn get_or_create<R>(
        &self,
        key: &Bytes,
        make: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> R,
    ) -> R {
        self.purge_if_expired(key);
        self.data.get_or_insert_with(key, make, f)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.with_value(key, |_| ()).is_some()
    }

    /// Unconditional put. TTL handling is the caller's business: only the
    /// SET-family handlers clear it.
    pub fn put(&self, key: &Bytes, value: Value) -> i64 {
        self.data.put(key, value)
    }

    pub fn put_if_absent(&self, key: &Bytes, value: Value) -> i64 {
        self.purge_if_expired(key);
        self.data.put_if_absent(key, value)
    }

    pub fn put_if_exists(&self, key: &Bytes, value: Value) -> i64 {
        self.purge_if_expired(key);
        self.data.put_if_exists(key, value)
    }

    /// Removes a key; the TTL entry goes with the data entry.
    pub fn remove(&self, key: &[u8]) -> bool {
        self.ttl.remove(key);
        self.data.remove(key) == 1
    }

    /// Removes a live key and returns its value and expiry.
    pub fn take(&self, key: &[u8]) -> Option<(Value, Option<Instant>)> {
        if self.purge_if_expired(key) {
            return None;
        }
        let ttl = self.ttl.take(key);
        self.data.take(key).map(|v| (v, ttl))
    }

    pub fn set_expire(&self, key: &Bytes, at: Instant) {
        self.ttl.put(key, at);
    }

    pub fn delete_ttl(&self, key: &[u8]) {
        self.ttl.remove(key);
    }

    pub fn expire_time(&self, key: &[u8]) -> Option<Instant> {
        self.ttl.get(key)
    }

    pub fn is_expired(&self, key: &[u8]) -> bool {
        matches!(self.ttl.get(key), Some(at) if Instant::now() > at)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> Vec<Bytes> {
        self.data.keys()
    }

    pub fn for_each(&self, f: impl FnMut(&Bytes, &Value) -> bool) {
        self.data.for_each(f)
    }

    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        self.data.random_keys(limit)
    }

    /// Drops every key and TTL entry.
    pub fn clear(&self) {
        self.data.clear();
        self.ttl.clear();
    }

    /// One active-expiration round: sample up to [`EXPIRE_SAMPLE_SIZE`]
    /// keys from the TTL dict and purge the dead ones. Returns the number
    /// removed.
    pub fn expire_cycle(&self) -> usize {
        let keys = self.ttl.random_keys(EXPIRE_SAMPLE_SIZE);
        if keys.is_empty() {
            return 0;
        }

        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some(at) = self.ttl.get(&key) {
                if now > at {
                    self.remove(&key);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Deep copy of the live keyspace, with remaining TTLs. Used
    /// exclusively by the AOF rewrite; already-expired keys are skipped.
    pub fn snapshot(&self) -> Vec<(Bytes, Value, Option<Duration>)> {
        let now = Instant::now();
        let mut out = Vec::with_capacity(self.data.len());
        self.data.for_each(|key, value| {
            let remaining = match self.ttl.get(key) {
                Some(at) => {
                    if at <= now {
                        return true;
                    }
                    Some(at - now)
                }
                None => None,
            };
            out.push((key.clone(), value.clone(), remaining));
            true
        });
        out
    }

    /// The minimal frame sequence that reconstructs the current state:
    /// one command per live key, plus an `expire` per remaining TTL.
    pub fn rewrite_frames(&self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        for (key, value, remaining) in self.snapshot() {
            let line = match value.to_write_cmdline(&key) {
                Some(line) => line,
                None => continue,
            };
            frames.push(encode_command(&line));

            if let Some(left) = remaining {
                let secs = left.as_secs_f64().ceil().max(1.0) as u64;
                frames.push(encode_command(&[
                    Bytes::from_static(b"expire"),
                    key.clone(),
                    Bytes::from(secs.to_string()),
                ]));
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StringValue;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn str_value(s: &str) -> Value {
        Value::Str(StringValue::from_bytes(b(s)))
    }

    async fn keyspace() -> (tempfile::TempDir, Keyspace) {
        let dir = tempfile::tempdir().unwrap();
        let aof = AofEngine::open(dir.path(), 0, None).unwrap();
        (dir, Keyspace::new(0, aof))
    }

    #[tokio::test]
    async fn put_get_remove() {
        let (_dir, ks) = keyspace().await;
        assert_eq!(ks.put(&b("k"), str_value("v")), 1);
        assert_eq!(ks.put(&b("k"), str_value("v2")), 0);

        let got = ks.with_value(b"k", |v| match v {
            Value::Str(s) => s.get(),
            other => panic!("unexpected kind {}", other.kind_name()),
        });
        assert_eq!(got, Some(b("v2")));

        assert!(ks.remove(b"k"));
        assert!(!ks.remove(b"k"));
        assert!(ks.with_value(b"k", |_| ()).is_none());
    }

    #[tokio::test]
    async fn lazy_expiration_purges_both_dicts() {
        let (_dir, ks) = keyspace().await;
        ks.put(&b("k"), str_value("v"));
        ks.set_expire(&b("k"), Instant::now() - Duration::from_millis(1));

        assert!(ks.with_value(b"k", |_| ()).is_none());
        assert_eq!(ks.len(), 0, "data entry must be gone");
        assert!(ks.expire_time(b"k").is_none(), "ttl entry must be gone");
    }

    #[tokio::test]
    async fn unexpired_ttl_keeps_key_visible() {
        let (_dir, ks) = keyspace().await;
        ks.put(&b("k"), str_value("v"));
        ks.set_expire(&b("k"), Instant::now() + Duration::from_secs(60));

        assert!(ks.exists(b"k"));
        assert!(ks.expire_time(b"k").is_some());
        assert!(!ks.is_expired(b"k"));
    }

    #[tokio::test]
    async fn put_if_absent_sees_expired_key_as_absent() {
        let (_dir, ks) = keyspace().await;
        ks.put(&b("k"), str_value("old"));
        ks.set_expire(&b("k"), Instant::now() - Duration::from_millis(1));

        assert_eq!(ks.put_if_absent(&b("k"), str_value("new")), 1);
        let got = ks.with_value(b"k", |v| match v {
            Value::Str(s) => s.get(),
            _ => unreachable!(),
        });
        assert_eq!(got, Some(b("new")));
    }

    #[tokio::test]
    async fn take_moves_value_and_ttl() {
        let (_dir, ks) = keyspace().await;
        ks.put(&b("k"), str_value("v"));
        let at = Instant::now() + Duration::from_secs(60);
        ks.set_expire(&b("k"), at);

        let (value, ttl) = ks.take(b"k").unwrap();
        assert!(matches!(value, Value::Str(_)));
        assert_eq!(ttl, Some(at));
        assert!(!ks.exists(b"k"));
        assert!(ks.take(b"missing").is_none());
    }

    #[tokio::test]
    async fn expire_cycle_reaps_dead_keys() {
        let (_dir, ks) = keyspace().await;
        for i in 0..10 {
            let key = Bytes::from(format!("dead{i}"));
            ks.put(&key, str_value("v"));
            ks.set_expire(&key, Instant::now() - Duration::from_millis(1));
        }
        ks.put(&b("alive"), str_value("v"));
        ks.set_expire(&b("alive"), Instant::now() + Duration::from_secs(60));

        // a bounded number of rounds clears every dead key
        for _ in 0..10 {
            ks.expire_cycle();
        }
        assert_eq!(ks.len(), 1);
        assert!(ks.exists(b"alive"));
    }

    #[tokio::test]
    async fn snapshot_is_deep_and_skips_expired() {
        let (_dir, ks) = keyspace().await;
        ks.put(&b("live"), str_value("v"));
        ks.put(&b("dead"), str_value("v"));
        ks.set_expire(&b("dead"), Instant::now() - Duration::from_millis(1));
        ks.set_expire(&b("live"), Instant::now() + Duration::from_secs(60));

        let snap = ks.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].0, b("live"));
        assert!(snap[0].2.is_some());

        // mutating the live keyspace must not touch the snapshot
        ks.with_value_mut(b"live", |v| {
            if let Value::Str(s) = v {
                s.set(b("changed"));
            }
        });
        match &snap[0].1 {
            Value::Str(s) => assert_eq!(s.get(), b("v")),
            other => panic!("unexpected kind {}", other.kind_name()),
        }
    }

    #[tokio::test]
    async fn rewrite_frames_reconstruct_state() {
        let (_dir, ks) = keyspace().await;
        ks.put(&b("s"), str_value("hello"));
        ks.put(&b("ttl"), str_value("x"));
        ks.set_expire(&b("ttl"), Instant::now() + Duration::from_secs(3600));

        let frames = ks.rewrite_frames();
        // one frame for "s", one for "ttl", one expire for "ttl"
        assert_eq!(frames.len(), 3);

        let joined: Vec<u8> = frames.iter().flat_map(|f| f.to_vec()).collect();
        let text = String::from_utf8_lossy(&joined);
        assert!(text.contains("hello"));
        assert!(text.contains("expire"));
        assert!(text.contains("3600"));
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let (_dir, ks) = keyspace().await;
        ks.put(&b("a"), str_value("1"));
        ks.put(&b("b"), str_value("2"));
        ks.set_expire(&b("a"), Instant::now() + Duration::from_secs(60));

        ks.clear();
        assert_eq!(ks.len(), 0);
        assert!(ks.expire_time(b"a").is_none());
    }
}
