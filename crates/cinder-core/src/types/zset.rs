//! Sorted-set values.
//!
//! Small sorted sets live in a single pack whose entries encode
//! `score_text:member_bytes`; operations decode and sort on demand. Past
//! the size bound the set is promoted to the general encoding: the
//! order-statistic skip list paired with a member → score dict, both
//! updated on every insertion and deletion.

use ahash::AHashMap;
use bytes::{BufMut, Bytes, BytesMut};

use super::pack::Pack;
use super::{fmt_score, normalize_range};
use crate::skiplist::SkipList;

/// Pack entries past which the set is promoted to the skip-list encoding.
pub const ZSET_MAX_PACK_ENTRIES: usize = 128;

/// The sorted-set value.
#[derive(Debug, Clone)]
pub struct SortedSet {
    repr: Repr,
}

#[derive(Debug, Clone)]
enum Repr {
    Pack(Pack),
    Index {
        list: SkipList,
        scores: AHashMap<Bytes, f64>,
    },
}

impl SortedSet {
    pub fn new() -> Self {
        Self {
            repr: Repr::Pack(Pack::new()),
        }
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Pack(pack) => pack.len(),
            Repr::Index { scores, .. } => scores.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pack_encoded(&self) -> bool {
        matches!(self.repr, Repr::Pack(_))
    }

    /// ZADD for a single (score, member) pair.
    ///
    /// Returns 1 when the member was newly added, 0 otherwise — including
    /// score updates and NX/XX no-ops.
    pub fn add(&mut self, nx: bool, xx: bool, score: f64, member: Bytes) -> i64 {
        let added = match &mut self.repr {
            Repr::Pack(pack) => {
                let mut entries = decode_all(pack);
                match entries.iter().position(|(_, m)| m.as_ref() == member.as_ref()) {
                    Some(idx) => {
                        if nx {
                            return 0;
                        }
                        if entries[idx].0 != score {
                            entries[idx].0 = score;
                            *pack = encode_all(&entries);
                        }
                        0
                    }
                    None => {
                        if xx {
                            return 0;
                        }
                        entries.push((score, member));
                        *pack = encode_all(&entries);
                        1
                    }
                }
            }
            Repr::Index { list, scores } => match scores.get(&member).copied() {
                Some(old) => {
                    if nx {
                        return 0;
                    }
                    if old != score {
                        list.remove(old, &member);
                        list.insert(score, member.clone());
                        scores.insert(member, score);
                    }
                    0
                }
                None => {
                    if xx {
                        return 0;
                    }
                    list.insert(score, member.clone());
                    scores.insert(member, score);
                    1
                }
            },
        };

        if matches!(&self.repr, Repr::Pack(p) if p.len() > ZSET_MAX_PACK_ENTRIES) {
            self.promote();
        }
        added
    }

    /// Removes a member. Returns `true` when it existed.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match &mut self.repr {
            Repr::Pack(pack) => {
                let mut entries = decode_all(pack);
                let before = entries.len();
                entries.retain(|(_, m)| m.as_ref() != member);
                if entries.len() == before {
                    return false;
                }
                *pack = encode_all(&entries);
                true
            }
            Repr::Index { list, scores } => match scores.remove(member) {
                Some(score) => {
                    list.remove(score, member);
                    true
                }
                None => false,
            },
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        match &self.repr {
            Repr::Pack(pack) => decode_all(pack)
                .into_iter()
                .find(|(_, m)| m.as_ref() == member)
                .map(|(s, _)| s),
            Repr::Index { scores, .. } => scores.get(member).copied(),
        }
    }

    /// 0-based rank in ascending (score, member) order.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        match &self.repr {
            Repr::Pack(pack) => {
                let entries = sorted_entries(pack);
                entries.iter().position(|(_, m)| m.as_ref() == member)
            }
            Repr::Index { list, scores } => {
                let score = scores.get(member).copied()?;
                list.rank_of(score, member)
            }
        }
    }

    /// 0-based rank counted from the highest (score, member).
    pub fn rev_rank(&self, member: &[u8]) -> Option<usize> {
        self.rank(member).map(|r| self.len() - 1 - r)
    }

    /// Members with ranks in the clamped `[start, stop]` window, ascending;
    /// with `with_scores` each member is followed by its score text.
    pub fn range(&self, start: i64, stop: i64, with_scores: bool) -> Vec<Bytes> {
        self.range_impl(start, stop, with_scores, true)
    }

    /// Same window, descending order.
    pub fn rev_range(&self, start: i64, stop: i64, with_scores: bool) -> Vec<Bytes> {
        self.range_impl(start, stop, with_scores, false)
    }

    fn range_impl(&self, start: i64, stop: i64, with_scores: bool, forward: bool) -> Vec<Bytes> {
        let (start, stop) = match normalize_range(start, stop, self.len()) {
            Some(window) => window,
            None => return Vec::new(),
        };

        let mut out = Vec::new();
        match &self.repr {
            Repr::Pack(pack) => {
                let mut entries = sorted_entries(pack);
                if !forward {
                    entries.reverse();
                }
                for (score, member) in &entries[start..=stop] {
                    out.push(member.clone());
                    if with_scores {
                        out.push(Bytes::from(fmt_score(*score)));
                    }
                }
            }
            Repr::Index { list, .. } => {
                for elem in list.range_by_rank(start, stop, forward) {
                    out.push(elem.member.clone());
                    if with_scores {
                        out.push(Bytes::from(fmt_score(elem.score)));
                    }
                }
            }
        }
        out
    }

    /// Number of members whose score lies in the closed `[min, max]`.
    pub fn count(&self, min: f64, max: f64) -> usize {
        match &self.repr {
            Repr::Pack(pack) => decode_all(pack)
                .iter()
                .filter(|(s, _)| *s >= min && *s <= max)
                .count(),
            Repr::Index { list, .. } => list.range_by_score(min, max, true).len(),
        }
    }

    /// Adds `delta` to the member's score (0 when absent) and returns the
    /// new score.
    pub fn incr_by(&mut self, delta: f64, member: Bytes) -> f64 {
        let new_score = self.score(&member).unwrap_or(0.0) + delta;
        self.add(false, false, new_score, member);
        new_score
    }

    /// All (score, member) pairs in ascending (score, member) order.
    pub fn entries(&self) -> Vec<(f64, Bytes)> {
        match &self.repr {
            Repr::Pack(pack) => sorted_entries(pack),
            Repr::Index { list, .. } => {
                list.iter().map(|e| (e.score, e.member.clone())).collect()
            }
        }
    }

    fn promote(&mut self) {
        if let Repr::Pack(pack) = &self.repr {
            let mut list = SkipList::new();
            let mut scores = AHashMap::with_capacity(pack.len());
            for (score, member) in decode_all(pack) {
                list.insert(score, member.clone());
                scores.insert(member, score);
            }
            self.repr = Repr::Index { list, scores };
        }
    }
}

impl Default for SortedSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Pack entry layout: `score_text ':' member_bytes`. The score text never
/// contains a colon, so the first colon delimits the member.
fn encode_entry(score: f64, member: &[u8]) -> Bytes {
    let text = fmt_score(score);
    let mut buf = BytesMut::with_capacity(text.len() + 1 + member.len());
    buf.put_slice(text.as_bytes());
    buf.put_u8(b':');
    buf.put_slice(member);
    buf.freeze()
}

fn decode_entry(entry: &Bytes) -> (f64, Bytes) {
    match entry.iter().position(|&b| b == b':') {
        Some(sep) => {
            let score = std::str::from_utf8(&entry[..sep])
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            (score, entry.slice(sep + 1..))
        }
        None => (0.0, entry.clone()),
    }
}

fn decode_all(pack: &Pack) -> Vec<(f64, Bytes)> {
    pack.iter().map(decode_entry).collect()
}

fn sorted_entries(pack: &Pack) -> Vec<(f64, Bytes)> {
    let mut entries = decode_all(pack);
    entries.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    entries
}

fn encode_all(entries: &[(f64, Bytes)]) -> Pack {
    let mut pack = Pack::with_capacity(entries.len());
    for (score, member) in entries {
        pack.push_back(encode_entry(*score, member));
    }
    pack
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn add_and_score() {
        let mut z = SortedSet::new();
        assert_eq!(z.add(false, false, 1.0, b("a")), 1);
        assert_eq!(z.add(false, false, 2.0, b("b")), 1);
        assert_eq!(z.len(), 2);
        assert_eq!(z.score(b"a"), Some(1.0));
        assert_eq!(z.score(b"missing"), None);
    }

    #[test]
    fn update_in_place_returns_zero() {
        let mut z = SortedSet::new();
        z.add(false, false, 1.0, b("m"));
        assert_eq!(z.add(false, false, 2.0, b("m")), 0);
        assert_eq!(z.len(), 1);
        assert_eq!(z.score(b"m"), Some(2.0));
    }

    #[test]
    fn nx_and_xx_flags() {
        let mut z = SortedSet::new();
        z.add(false, false, 1.0, b("m"));

        // NX: member present → no-op
        assert_eq!(z.add(true, false, 9.0, b("m")), 0);
        assert_eq!(z.score(b"m"), Some(1.0));

        // XX: member absent → no-op
        assert_eq!(z.add(false, true, 9.0, b("new")), 0);
        assert_eq!(z.score(b"new"), None);

        // XX: member present → update
        assert_eq!(z.add(false, true, 5.0, b("m")), 0);
        assert_eq!(z.score(b"m"), Some(5.0));
    }

    #[test]
    fn remove_member() {
        let mut z = SortedSet::new();
        z.add(false, false, 1.0, b("a"));
        z.add(false, false, 2.0, b("b"));

        assert!(z.remove(b"a"));
        assert!(!z.remove(b"a"));
        assert_eq!(z.len(), 1);
        assert_eq!(z.rank(b"b"), Some(0));
    }

    #[test]
    fn ranks_follow_score_then_member() {
        let mut z = SortedSet::new();
        z.add(false, false, 2.0, b("b"));
        z.add(false, false, 1.0, b("a"));
        z.add(false, false, 3.0, b("c"));
        z.add(false, false, 2.0, b("bb"));

        assert_eq!(z.rank(b"a"), Some(0));
        assert_eq!(z.rank(b"b"), Some(1));
        assert_eq!(z.rank(b"bb"), Some(2));
        assert_eq!(z.rank(b"c"), Some(3));
        assert_eq!(z.rank(b"zz"), None);

        assert_eq!(z.rev_rank(b"c"), Some(0));
        assert_eq!(z.rev_rank(b"a"), Some(3));
    }

    #[test]
    fn range_with_scores() {
        let mut z = SortedSet::new();
        z.add(false, false, 1.0, b("a"));
        z.add(false, false, 2.0, b("b"));
        z.add(false, false, 3.0, b("c"));

        assert_eq!(
            z.range(0, -1, true),
            vec![b("a"), b("1"), b("b"), b("2"), b("c"), b("3")]
        );
        assert_eq!(z.range(1, 1, false), vec![b("b")]);
        assert_eq!(z.rev_range(0, 0, false), vec![b("c")]);
        assert_eq!(
            z.rev_range(0, -1, false),
            vec![b("c"), b("b"), b("a")]
        );
        assert!(z.range(5, 9, false).is_empty());
    }

    #[test]
    fn count_is_inclusive() {
        let mut z = SortedSet::new();
        for (s, m) in [(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")] {
            z.add(false, false, s, b(m));
        }
        assert_eq!(z.count(2.0, 3.0), 2);
        assert_eq!(z.count(0.0, 10.0), 4);
        assert_eq!(z.count(5.0, 9.0), 0);
        assert_eq!(z.count(f64::NEG_INFINITY, f64::INFINITY), 4);
    }

    #[test]
    fn incr_by_creates_and_updates() {
        let mut z = SortedSet::new();
        assert_eq!(z.incr_by(2.5, b("m")), 2.5);
        assert_eq!(z.incr_by(1.5, b("m")), 4.0);
        assert_eq!(z.score(b"m"), Some(4.0));
        assert_eq!(z.len(), 1);
    }

    #[test]
    fn promotes_past_pack_bound() {
        let mut z = SortedSet::new();
        for i in 0..ZSET_MAX_PACK_ENTRIES {
            z.add(false, false, i as f64, Bytes::from(format!("m{i:04}")));
        }
        assert!(z.is_pack_encoded());

        z.add(false, false, 9999.0, b("straw"));
        assert!(!z.is_pack_encoded(), "must promote past the pack bound");
        assert_eq!(z.len(), ZSET_MAX_PACK_ENTRIES + 1);

        // order and scores survive the promotion
        assert_eq!(z.rank(b"m0000"), Some(0));
        assert_eq!(z.rev_rank(b"straw"), Some(0));
        assert_eq!(z.score(b"m0042"), Some(42.0));
    }

    #[test]
    fn semantics_identical_after_promotion() {
        let mut z = SortedSet::new();
        for i in 0..200 {
            z.add(false, false, (i % 50) as f64, Bytes::from(format!("m{i:03}")));
        }
        assert!(!z.is_pack_encoded());

        assert_eq!(z.add(false, false, 7.0, b("m000")), 0);
        assert_eq!(z.score(b"m000"), Some(7.0));
        assert!(z.remove(b"m001"));
        assert_eq!(z.len(), 199);

        let members = z.range(0, -1, false);
        assert_eq!(members.len(), 199);
    }

    #[test]
    fn entry_codec_handles_colons_in_members() {
        let entry = encode_entry(1.5, b"a:b:c");
        let (score, member) = decode_entry(&entry);
        assert_eq!(score, 1.5);
        assert_eq!(member, b("a:b:c"));
    }

    #[test]
    fn pack_members_with_colons() {
        let mut z = SortedSet::new();
        z.add(false, false, 1.0, b("user:1"));
        z.add(false, false, 2.0, b("user:2"));
        assert_eq!(z.score(b"user:1"), Some(1.0));
        assert_eq!(z.range(0, -1, false), vec![b("user:1"), b("user:2")]);
    }
}
