//! Sharded concurrent dictionary.
//!
//! A fixed array of shards, each an independent map behind its own
//! reader/writer lock. A key's shard is chosen by 32-bit FNV-1a over the
//! key bytes, modulo the shard count. An atomic counter tracks the total
//! entry count so `len` is O(1) without touching any shard.
//!
//! Operations on the same key are linearized by the shard lock; operations
//! on different keys may commit in any order. Whole-table walks
//! (`keys`, `for_each`, `random_keys`) take one shard lock at a time, so
//! their snapshots need not be consistent across shards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use ahash::AHashMap;
use bytes::Bytes;
use rand::Rng;

/// Default shard count. A power of two; more shards mean finer-grained
/// locking at a small memory cost.
pub const DEFAULT_SHARD_COUNT: usize = 1024;

/// Concurrent `key → V` mapping over byte-string keys.
pub struct ShardedDict<V> {
    shards: Vec<RwLock<AHashMap<Bytes, V>>>,
    count: AtomicUsize,
}

impl<V> ShardedDict<V> {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARD_COUNT)
    }

    pub fn with_shards(shard_count: usize) -> Self {
        assert!(shard_count > 0, "shard count must be positive");
        let shards = (0..shard_count)
            .map(|_| RwLock::new(AHashMap::new()))
            .collect();
        Self {
            shards,
            count: AtomicUsize::new(0),
        }
    }

    fn shard(&self, key: &[u8]) -> &RwLock<AHashMap<Bytes, V>> {
        let idx = fnv1a(key) as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Total entry count, from the atomic counter.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` against the value for `key` under the shard's read lock.
    pub fn with<R>(&self, key: &[u8], f: impl FnOnce(&V) -> R) -> Option<R> {
        let shard = self.shard(key).read().unwrap();
        shard.get(key).map(f)
    }

    /// Runs `f` against the value for `key` under the shard's write lock.
    pub fn with_mut<R>(&self, key: &[u8], f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut shard = self.shard(key).write().unwrap();
        shard.get_mut(key).map(f)
    }

    /// Inserts the value built by `make` when `key` is absent, then runs
    /// `f` on the (existing or fresh) value under the write lock.
    pub fn get_or_insert_with<R>(
        &self,
        key: &Bytes,
        make: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let mut shard = self.shard(key).write().unwrap();
        let value = shard.entry(key.clone()).or_insert_with(|| {
            self.count.fetch_add(1, Ordering::AcqRel);
            make()
        });
        f(value)
    }

    /// Unconditional insert. Returns 1 when the key was newly inserted,
    /// 0 when an existing value was overwritten.
    pub fn put(&self, key: &Bytes, val: V) -> i64 {
        let mut shard = self.shard(key).write().unwrap();
        if shard.insert(key.clone(), val).is_some() {
            0
        } else {
            self.count.fetch_add(1, Ordering::AcqRel);
            1
        }
    }

    /// Inserts only when the key is absent. Returns 1 on insert, 0 otherwise.
    pub fn put_if_absent(&self, key: &Bytes, val: V) -> i64 {
        let mut shard = self.shard(key).write().unwrap();
        if shard.contains_key(key.as_ref()) {
            return 0;
        }
        shard.insert(key.clone(), val);
        self.count.fetch_add(1, Ordering::AcqRel);
        1
    }

    /// Overwrites only when the key is present. Returns 1 on update, 0 otherwise.
    pub fn put_if_exists(&self, key: &Bytes, val: V) -> i64 {
        let mut shard = self.shard(key).write().unwrap();
        match shard.get_mut(key.as_ref()) {
            Some(slot) => {
                *slot = val;
                1
            }
            None => 0,
        }
    }

    /// Removes the key. Returns 1 when an entry was removed, 0 otherwise.
    pub fn remove(&self, key: &[u8]) -> i64 {
        self.take(key).map(|_| 1).unwrap_or(0)
    }

    /// Removes the key and returns its value.
    pub fn take(&self, key: &[u8]) -> Option<V> {
        let mut shard = self.shard(key).write().unwrap();
        let removed = shard.remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Returns a clone of the value for `key`.
    pub fn get(&self, key: &[u8]) -> Option<V>
    where
        V: Clone,
    {
        self.with(key, |v| v.clone())
    }

    /// All keys. Each shard is briefly read-locked in turn; the result is
    /// not a consistent cross-shard snapshot.
    pub fn keys(&self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Walks every entry, one shard lock at a time. `f` returning `false`
    /// stops the walk at the next shard boundary check.
    pub fn for_each(&self, mut f: impl FnMut(&Bytes, &V) -> bool) {
        for shard in &self.shards {
            let guard = shard.read().unwrap();
            let mut keep_going = true;
            for (key, val) in guard.iter() {
                keep_going = f(key, val);
                if !keep_going {
                    break;
                }
            }
            if !keep_going {
                break;
            }
        }
    }

    /// Up to `limit` distinct keys picked by uniform shard sampling with
    /// rejection of duplicates. Falls back to `keys()` when `limit` covers
    /// the whole dict.
    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        let size = self.len();
        if limit >= size {
            return self.keys();
        }

        let mut rng = rand::thread_rng();
        let mut picked: Vec<Bytes> = Vec::with_capacity(limit);
        // bounded attempts so a concurrently shrinking dict can't spin us
        let mut attempts = limit * 16 + 64;

        while picked.len() < limit && attempts > 0 {
            attempts -= 1;
            let shard = &self.shards[rng.gen_range(0..self.shards.len())];
            let guard = shard.read().unwrap();
            if guard.is_empty() {
                continue;
            }
            let nth = rng.gen_range(0..guard.len());
            if let Some(key) = guard.keys().nth(nth) {
                if !picked.iter().any(|k| k == key) {
                    picked.push(key.clone());
                }
            }
        }
        picked
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.write().unwrap();
            removed += guard.len();
            guard.clear();
        }
        self.count.fetch_sub(removed, Ordering::AcqRel);
    }
}

impl<V> Default for ShardedDict<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Clone for ShardedDict<V> {
    fn clone(&self) -> Self {
        let shards: Vec<_> = self
            .shards
            .iter()
            .map(|s| RwLock::new(s.read().unwrap().clone()))
            .collect();
        let count = shards
            .iter()
            .map(|s| s.read().unwrap().len())
            .sum::<usize>();
        Self {
            shards,
            count: AtomicUsize::new(count),
        }
    }
}

impl<V> std::fmt::Debug for ShardedDict<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedDict")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

/// 32-bit FNV-1a over the key bytes.
fn fnv1a(data: &[u8]) -> u32 {
    const PRIME: u32 = 16_777_619;
    let mut hash: u32 = 2_166_136_261;
    for &b in data {
        hash = hash.wrapping_mul(PRIME);
        hash ^= u32::from(b);
    }
    hash
}
