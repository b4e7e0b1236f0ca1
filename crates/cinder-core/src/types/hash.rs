//! Hash values: field → value maps with two encodings.
//!
//! Small hashes live in a single pack of alternating field/value entries
//! with linear lookups. Past the field threshold the hash is promoted to a
//! sharded dict. The crossover is encoding-level only; command semantics
//! are identical on both sides.

use bytes::Bytes;

use super::pack::Pack;
use crate::dict::ShardedDict;

/// Field count past which the pack encoding is promoted to a dict.
pub const HASH_MAX_PACK_FIELDS: usize = 64;

/// Shards used by the general (dict) encoding.
const HASH_DICT_SHARDS: usize = 32;

/// The hash value.
#[derive(Debug, Clone)]
pub enum HashValue {
    /// Alternating field/value entries, scanned linearly.
    Pack(Pack),
    /// Concurrent dict keyed by field name.
    Dict(ShardedDict<Bytes>),
}

impl HashValue {
    pub fn new() -> Self {
        HashValue::Pack(Pack::new())
    }

    /// Sets a field. Returns 1 when the field was newly created, 0 when an
    /// existing field was updated.
    pub fn hset(&mut self, field: Bytes, value: Bytes) -> i64 {
        let created = match self {
            HashValue::Pack(pack) => {
                if let Some(idx) = pack_find(pack, &field) {
                    pack.set(idx as i64 + 1, value);
                    return 0;
                }
                pack.push_back(field);
                pack.push_back(value);
                1
            }
            HashValue::Dict(dict) => return dict.put(&field, value),
        };
        if matches!(&*self, HashValue::Pack(p) if p.len() / 2 > HASH_MAX_PACK_FIELDS) {
            self.promote();
        }
        created
    }

    pub fn hget(&self, field: &[u8]) -> Option<Bytes> {
        match self {
            HashValue::Pack(pack) => {
                pack_find(pack, field).and_then(|idx| pack.get(idx as i64 + 1).cloned())
            }
            HashValue::Dict(dict) => dict.get(field),
        }
    }

    /// Removes a field. Returns `true` when it existed.
    pub fn hdel(&mut self, field: &[u8]) -> bool {
        match self {
            HashValue::Pack(pack) => match pack_find(pack, field) {
                Some(idx) => {
                    // field and its value are adjacent entries
                    let mut rebuilt = Pack::new();
                    for (i, entry) in pack.iter().enumerate() {
                        if i != idx && i != idx + 1 {
                            rebuilt.push_back(entry.clone());
                        }
                    }
                    *pack = rebuilt;
                    true
                }
                None => false,
            },
            HashValue::Dict(dict) => dict.remove(field) == 1,
        }
    }

    pub fn hexists(&self, field: &[u8]) -> bool {
        match self {
            HashValue::Pack(pack) => pack_find(pack, field).is_some(),
            HashValue::Dict(dict) => dict.with(field, |_| ()).is_some(),
        }
    }

    pub fn hlen(&self) -> usize {
        match self {
            HashValue::Pack(pack) => pack.len() / 2,
            HashValue::Dict(dict) => dict.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hlen() == 0
    }

    pub fn hkeys(&self) -> Vec<Bytes> {
        match self {
            HashValue::Pack(pack) => pack.iter().step_by(2).cloned().collect(),
            HashValue::Dict(dict) => dict.keys(),
        }
    }

    pub fn hvals(&self) -> Vec<Bytes> {
        match self {
            HashValue::Pack(pack) => pack.iter().skip(1).step_by(2).cloned().collect(),
            HashValue::Dict(dict) => {
                let mut vals = Vec::with_capacity(dict.len());
                dict.for_each(|_, v| {
                    vals.push(v.clone());
                    true
                });
                vals
            }
        }
    }

    /// All (field, value) pairs.
    pub fn entries(&self) -> Vec<(Bytes, Bytes)> {
        match self {
            HashValue::Pack(pack) => {
                let items: Vec<_> = pack.iter().cloned().collect();
                items
                    .chunks_exact(2)
                    .map(|c| (c[0].clone(), c[1].clone()))
                    .collect()
            }
            HashValue::Dict(dict) => {
                let mut out = Vec::with_capacity(dict.len());
                dict.for_each(|k, v| {
                    out.push((k.clone(), v.clone()));
                    true
                });
                out
            }
        }
    }

    pub fn is_pack_encoded(&self) -> bool {
        matches!(self, HashValue::Pack(_))
    }

    fn promote(&mut self) {
        if let HashValue::Pack(pack) = self {
            let dict = ShardedDict::with_shards(HASH_DICT_SHARDS);
            let items: Vec<_> = pack.iter().cloned().collect();
            for chunk in items.chunks_exact(2) {
                dict.put(&chunk[0], chunk[1].clone());
            }
            *self = HashValue::Dict(dict);
        }
    }
}

impl Default for HashValue {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of `field` within the pack (always an even position), or `None`.
fn pack_find(pack: &Pack, field: &[u8]) -> Option<usize> {
    pack.iter()
        .step_by(2)
        .position(|f| f.as_ref() == field)
        .map(|pos| pos * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn set_get_update() {
        let mut h = HashValue::new();
        assert_eq!(h.hset(b("f1"), b("v1")), 1);
        assert_eq!(h.hset(b("f1"), b("v2")), 0);
        assert_eq!(h.hget(b"f1"), Some(b("v2")));
        assert_eq!(h.hget(b"missing"), None);
        assert_eq!(h.hlen(), 1);
    }

    #[test]
    fn delete_removes_pair() {
        let mut h = HashValue::new();
        h.hset(b("f1"), b("v1"));
        h.hset(b("f2"), b("v2"));

        assert!(h.hdel(b"f1"));
        assert!(!h.hdel(b"f1"));
        assert!(!h.hexists(b"f1"));
        assert_eq!(h.hget(b"f2"), Some(b("v2")));
        assert_eq!(h.hlen(), 1);
    }

    #[test]
    fn keys_vals_entries_align() {
        let mut h = HashValue::new();
        h.hset(b("a"), b("1"));
        h.hset(b("b"), b("2"));

        let mut keys = h.hkeys();
        keys.sort();
        assert_eq!(keys, vec![b("a"), b("b")]);

        let mut vals = h.hvals();
        vals.sort();
        assert_eq!(vals, vec![b("1"), b("2")]);

        let mut entries = h.entries();
        entries.sort();
        assert_eq!(entries, vec![(b("a"), b("1")), (b("b"), b("2"))]);
    }

    #[test]
    fn promotes_past_field_threshold() {
        let mut h = HashValue::new();
        for i in 0..HASH_MAX_PACK_FIELDS {
            h.hset(Bytes::from(format!("f{i}")), b("v"));
        }
        assert!(h.is_pack_encoded());

        h.hset(b("one-more"), b("v"));
        assert!(!h.is_pack_encoded(), "must promote past {HASH_MAX_PACK_FIELDS} fields");
        assert_eq!(h.hlen(), HASH_MAX_PACK_FIELDS + 1);

        // everything survives the promotion
        for i in 0..HASH_MAX_PACK_FIELDS {
            assert!(h.hexists(format!("f{i}").as_bytes()));
        }
        assert!(h.hexists(b"one-more"));
    }

    #[test]
    fn semantics_identical_after_promotion() {
        let mut h = HashValue::new();
        for i in 0..100 {
            h.hset(Bytes::from(format!("f{i}")), Bytes::from(format!("v{i}")));
        }
        assert!(!h.is_pack_encoded());

        assert_eq!(h.hset(b("f5"), b("updated")), 0);
        assert_eq!(h.hget(b"f5"), Some(b("updated")));
        assert!(h.hdel(b"f6"));
        assert_eq!(h.hlen(), 99);
    }
}
