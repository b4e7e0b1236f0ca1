//! Quicklist: the list encoding.
//!
//! A chain of packs. A fresh list is a single pack; any pack that grows
//! past [`PACK_MAX_ENTRIES`] is split at its midpoint, the right half
//! becoming a new node just after the original. Packs drained to empty are
//! dropped, so no pack is ever empty except transiently inside a mutation.

use std::collections::VecDeque;

use bytes::Bytes;

use super::normalize_range;
use super::pack::{Pack, PACK_MAX_ENTRIES};

/// The list value: an ordered chain of packs.
#[derive(Debug, Clone, Default)]
pub struct QuickList {
    packs: VecDeque<Pack>,
    len: usize,
}

impl QuickList {
    pub fn new() -> Self {
        Self {
            packs: VecDeque::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of pack nodes currently in the chain.
    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    pub fn push_front(&mut self, val: Bytes) {
        match self.packs.front_mut() {
            Some(pack) => {
                pack.push_front(val);
                if pack.len() > PACK_MAX_ENTRIES {
                    self.split_at(0);
                }
            }
            None => {
                let mut pack = Pack::new();
                pack.push_front(val);
                self.packs.push_front(pack);
            }
        }
        self.len += 1;
    }

    pub fn push_back(&mut self, val: Bytes) {
        match self.packs.back_mut() {
            Some(pack) => {
                pack.push_back(val);
                if pack.len() > PACK_MAX_ENTRIES {
                    self.split_at(self.packs.len() - 1);
                }
            }
            None => {
                let mut pack = Pack::new();
                pack.push_back(val);
                self.packs.push_back(pack);
            }
        }
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<Bytes> {
        let pack = self.packs.front_mut()?;
        let val = pack.pop_front()?;
        if pack.is_empty() {
            self.packs.pop_front();
        }
        self.len -= 1;
        Some(val)
    }

    pub fn pop_back(&mut self) -> Option<Bytes> {
        let pack = self.packs.back_mut()?;
        let val = pack.pop_back()?;
        if pack.is_empty() {
            self.packs.pop_back();
        }
        self.len -= 1;
        Some(val)
    }

    /// Positional get; negative indices count from the tail.
    pub fn get(&self, index: i64) -> Option<Bytes> {
        let mut n = self.resolve_index(index)?;
        for pack in &self.packs {
            if n < pack.len() {
                return pack.get(n as i64).cloned();
            }
            n -= pack.len();
        }
        None
    }

    /// Positional overwrite; returns `false` when the index is out of range.
    pub fn set(&mut self, index: i64, val: Bytes) -> bool {
        let mut n = match self.resolve_index(index) {
            Some(n) => n,
            None => return false,
        };
        for pack in &mut self.packs {
            if n < pack.len() {
                return pack.set(n as i64, val);
            }
            n -= pack.len();
        }
        false
    }

    /// Entries in `[start, stop]` after clamping; empty when the clamped
    /// window is empty.
    pub fn range(&self, start: i64, stop: i64) -> Vec<Bytes> {
        let (start, stop) = match normalize_range(start, stop, self.len) {
            Some(window) => window,
            None => return Vec::new(),
        };

        let mut out = Vec::with_capacity(stop - start + 1);
        let mut idx = 0;
        for pack in &self.packs {
            for val in pack.iter() {
                if idx > stop {
                    return out;
                }
                if idx >= start {
                    out.push(val.clone());
                }
                idx += 1;
            }
        }
        out
    }

    /// Removes entries equal to `val` with signed-count semantics:
    /// 0 removes every match, positive removes the first `count` from the
    /// head, negative removes the last `|count|` from the tail.
    pub fn remove_by_value(&mut self, count: i64, val: &[u8]) -> usize {
        let mut removed = 0;

        if count == 0 {
            for pack in &mut self.packs {
                removed += pack.remove_by_value(0, val);
            }
        } else if count > 0 {
            let mut remaining = count as usize;
            for pack in &mut self.packs {
                if remaining == 0 {
                    break;
                }
                let n = pack.remove_by_value(remaining as i64, val);
                removed += n;
                remaining -= n;
            }
        } else {
            let mut remaining = count.unsigned_abs() as usize;
            for pack in self.packs.iter_mut().rev() {
                if remaining == 0 {
                    break;
                }
                let n = pack.remove_by_value(-(remaining as i64), val);
                removed += n;
                remaining -= n;
            }
        }

        self.packs.retain(|p| !p.is_empty());
        self.len -= removed;
        removed
    }

    /// Keeps only the clamped `[start, stop]` window; an empty window
    /// empties the whole list.
    pub fn trim(&mut self, start: i64, stop: i64) {
        let (start, stop) = match normalize_range(start, stop, self.len) {
            Some(window) => window,
            None => {
                self.packs.clear();
                self.len = 0;
                return;
            }
        };

        for _ in 0..start {
            self.pop_front();
        }
        let drop_back = self.len - (stop - start + 1);
        for _ in 0..drop_back {
            self.pop_back();
        }
    }

    fn split_at(&mut self, pack_idx: usize) {
        let right = self.packs[pack_idx].split_off_back();
        self.packs.insert(pack_idx + 1, right);
    }

    fn resolve_index(&self, index: i64) -> Option<usize> {
        let len = self.len as i64;
        let idx = if index < 0 { len + index } else { index };
        (idx >= 0 && idx < len).then_some(idx as usize)
    }

    #[cfg(test)]
    fn max_pack_len(&self) -> usize {
        self.packs.iter().map(Pack::len).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn bi(i: usize) -> Bytes {
        Bytes::from(format!("v{i}"))
    }

    #[test]
    fn push_order_front_and_back() {
        let mut l = QuickList::new();
        for m in ["a", "b", "c"] {
            l.push_front(b(m));
        }
        assert_eq!(l.range(0, -1), vec![b("c"), b("b"), b("a")]);

        let mut l = QuickList::new();
        for m in ["a", "b", "c"] {
            l.push_back(b(m));
        }
        assert_eq!(l.range(0, -1), vec![b("a"), b("b"), b("c")]);
    }

    #[test]
    fn pops_shrink_and_drop_packs() {
        let mut l = QuickList::new();
        l.push_back(b("a"));
        l.push_back(b("b"));

        assert_eq!(l.pop_front(), Some(b("a")));
        assert_eq!(l.pop_back(), Some(b("b")));
        assert_eq!(l.pop_front(), None);
        assert_eq!(l.pop_back(), None);
        assert_eq!(l.len(), 0);
        assert_eq!(l.pack_count(), 0);
    }

    #[test]
    fn splits_keep_packs_bounded() {
        let mut l = QuickList::new();
        for i in 0..(PACK_MAX_ENTRIES * 3 + 10) {
            l.push_back(bi(i));
        }
        assert_eq!(l.len(), PACK_MAX_ENTRIES * 3 + 10);
        assert!(l.pack_count() >= 3);
        assert!(
            l.max_pack_len() <= PACK_MAX_ENTRIES,
            "no pack may exceed the split bound"
        );

        // order preserved across all splits
        for i in [0, 1, PACK_MAX_ENTRIES, PACK_MAX_ENTRIES * 2 + 5, l.len() - 1] {
            assert_eq!(l.get(i as i64), Some(bi(i)), "index {i}");
        }
    }

    #[test]
    fn front_splits_too() {
        let mut l = QuickList::new();
        for i in 0..(PACK_MAX_ENTRIES + 5) {
            l.push_front(bi(i));
        }
        assert!(l.max_pack_len() <= PACK_MAX_ENTRIES);
        assert_eq!(l.get(0), Some(bi(PACK_MAX_ENTRIES + 4)));
        assert_eq!(l.get(-1), Some(bi(0)));
    }

    #[test]
    fn get_and_set_across_packs() {
        let mut l = QuickList::new();
        for i in 0..(PACK_MAX_ENTRIES + 50) {
            l.push_back(bi(i));
        }
        let idx = PACK_MAX_ENTRIES as i64 + 10;
        assert!(l.set(idx, b("changed")));
        assert_eq!(l.get(idx), Some(b("changed")));
        assert!(l.set(-1, b("tail")));
        assert_eq!(l.get(-1), Some(b("tail")));
        assert!(!l.set(l.len() as i64, b("oob")));
        assert_eq!(l.get(l.len() as i64), None);
    }

    #[test]
    fn range_clamps_like_pack() {
        let mut l = QuickList::new();
        for m in ["a", "b", "c", "d", "e"] {
            l.push_back(b(m));
        }
        assert_eq!(l.range(1, -2), vec![b("b"), b("c"), b("d")]);
        assert_eq!(l.range(3, 1), Vec::<Bytes>::new());
        assert_eq!(l.range(-100, 100).len(), 5);
    }

    #[test]
    fn remove_by_value_signed_counts() {
        let make = || {
            let mut l = QuickList::new();
            for m in ["x", "a", "x", "b", "x"] {
                l.push_back(b(m));
            }
            l
        };

        let mut l = make();
        assert_eq!(l.remove_by_value(0, b"x"), 3);
        assert_eq!(l.range(0, -1), vec![b("a"), b("b")]);

        let mut l = make();
        assert_eq!(l.remove_by_value(2, b"x"), 2);
        assert_eq!(l.range(0, -1), vec![b("a"), b("b"), b("x")]);

        let mut l = make();
        assert_eq!(l.remove_by_value(-2, b"x"), 2);
        assert_eq!(l.range(0, -1), vec![b("x"), b("a"), b("b")]);
    }

    #[test]
    fn remove_negative_count_spans_packs() {
        // matches in separate packs: a negative count must consume
        // tail-side matches first
        let mut l = QuickList::new();
        l.push_back(b("x"));
        for i in 0..PACK_MAX_ENTRIES {
            l.push_back(bi(i));
        }
        l.push_back(b("x"));

        assert_eq!(l.remove_by_value(-1, b"x"), 1);
        assert_eq!(l.get(0), Some(b("x")), "head-side match must survive");
        assert_eq!(l.get(-1), Some(bi(PACK_MAX_ENTRIES - 1)));
    }

    #[test]
    fn trim_keeps_window() {
        let mut l = QuickList::new();
        for m in ["a", "b", "c", "d", "e"] {
            l.push_back(b(m));
        }
        l.trim(1, -2);
        assert_eq!(l.range(0, -1), vec![b("b"), b("c"), b("d")]);
        assert_eq!(l.len(), 3);
    }

    #[test]
    fn trim_to_empty_window_clears() {
        let mut l = QuickList::new();
        for m in ["a", "b", "c"] {
            l.push_back(b(m));
        }
        l.trim(5, 9);
        assert!(l.is_empty());
        assert_eq!(l.pack_count(), 0);
    }
}
