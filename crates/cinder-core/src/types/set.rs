//! Set values: int-set and hash-set encodings.
//!
//! A set of canonical integer members is a sorted `i64` array with binary
//! search (the "int-set"). The first non-integer member, or growth past
//! the size bound, promotes the set to a hash set of byte strings.
//! Promotion is one-way.

use ahash::AHashSet;
use bytes::Bytes;
use rand::Rng;

use super::parse_canonical_i64;

/// Int-set entries past which the set is promoted to the hash encoding.
pub const SET_MAX_INTSET_ENTRIES: usize = 512;

/// Sorted array of distinct 64-bit integers.
#[derive(Debug, Clone, Default)]
pub struct IntSet {
    values: Vec<i64>,
}

impl IntSet {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// O(log n) membership via binary search.
    pub fn contains(&self, v: i64) -> bool {
        self.values.binary_search(&v).is_ok()
    }

    /// Returns `true` when `v` was newly inserted.
    pub fn add(&mut self, v: i64) -> bool {
        match self.values.binary_search(&v) {
            Ok(_) => false,
            Err(idx) => {
                self.values.insert(idx, v);
                true
            }
        }
    }

    /// Returns `true` when `v` was present and removed.
    pub fn remove(&mut self, v: i64) -> bool {
        match self.values.binary_search(&v) {
            Ok(idx) => {
                self.values.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    /// Uniform random member, not removed.
    pub fn random(&self) -> Option<i64> {
        if self.values.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..self.values.len());
        Some(self.values[idx])
    }

    /// Removes and returns a uniform random member.
    pub fn pop(&mut self) -> Option<i64> {
        if self.values.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..self.values.len());
        Some(self.values.remove(idx))
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }
}

/// The set value.
#[derive(Debug, Clone)]
pub enum SetValue {
    Ints(IntSet),
    Members(AHashSet<Bytes>),
}

impl SetValue {
    pub fn new() -> Self {
        SetValue::Ints(IntSet::new())
    }

    /// Adds a member. Returns `true` when it was newly inserted.
    pub fn add(&mut self, member: Bytes) -> bool {
        let as_int = match self {
            SetValue::Ints(_) => parse_canonical_i64(&member),
            SetValue::Members(hs) => return hs.insert(member),
        };

        match as_int {
            Some(v) => {
                let (added, overflow) = match self {
                    SetValue::Ints(is) => {
                        let added = is.add(v);
                        (added, is.len() > SET_MAX_INTSET_ENTRIES)
                    }
                    SetValue::Members(_) => return false,
                };
                if overflow {
                    self.promote();
                }
                added
            }
            None => {
                // non-integer member forces the general encoding
                self.promote();
                match self {
                    SetValue::Members(hs) => hs.insert(member),
                    SetValue::Ints(_) => false,
                }
            }
        }
    }

    /// Removes a member. Returns `true` when it was present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self {
            SetValue::Ints(is) => match parse_canonical_i64(member) {
                Some(v) => is.remove(v),
                None => false,
            },
            SetValue::Members(hs) => hs.remove(member),
        }
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        match self {
            SetValue::Ints(is) => match parse_canonical_i64(member) {
                Some(v) => is.contains(v),
                None => false,
            },
            SetValue::Members(hs) => hs.contains(member),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SetValue::Ints(is) => is.len(),
            SetValue::Members(hs) => hs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn members(&self) -> Vec<Bytes> {
        match self {
            SetValue::Ints(is) => is.values().iter().map(|v| int_bytes(*v)).collect(),
            SetValue::Members(hs) => hs.iter().cloned().collect(),
        }
    }

    /// Uniform random member, not removed.
    pub fn random(&self) -> Option<Bytes> {
        match self {
            SetValue::Ints(is) => is.random().map(int_bytes),
            SetValue::Members(hs) => {
                if hs.is_empty() {
                    return None;
                }
                let nth = rand::thread_rng().gen_range(0..hs.len());
                hs.iter().nth(nth).cloned()
            }
        }
    }

    /// Removes and returns a uniform random member.
    pub fn pop(&mut self) -> Option<Bytes> {
        match self {
            SetValue::Ints(is) => is.pop().map(int_bytes),
            SetValue::Members(hs) => {
                if hs.is_empty() {
                    return None;
                }
                let nth = rand::thread_rng().gen_range(0..hs.len());
                let member = hs.iter().nth(nth).cloned()?;
                hs.remove(&member);
                Some(member)
            }
        }
    }

    pub fn is_intset_encoded(&self) -> bool {
        matches!(self, SetValue::Ints(_))
    }

    fn promote(&mut self) {
        if let SetValue::Ints(is) = self {
            let mut hs = AHashSet::with_capacity(is.len() + 1);
            for v in is.values() {
                hs.insert(int_bytes(*v));
            }
            *self = SetValue::Members(hs);
        }
    }
}

impl Default for SetValue {
    fn default() -> Self {
        Self::new()
    }
}

fn int_bytes(v: i64) -> Bytes {
    let mut buf = itoa::Buffer::new();
    Bytes::copy_from_slice(buf.format(v).as_bytes())
}
