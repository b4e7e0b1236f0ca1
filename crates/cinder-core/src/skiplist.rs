//! Order-statistic skip list.
//!
//! Backs the general sorted-set encoding. Elements are ordered by
//! `(score, member bytes)`. Every forward pointer carries a span counter —
//! the number of level-0 nodes it skips, plus one — which turns rank and
//! range-by-rank queries into O(log n) descents.
//!
//! Nodes live in an arena `Vec` and refer to each other by index; index 0
//! is a header sentinel with the maximum level. Deleted slots go on a free
//! list for reuse. The level-0 chain also carries backward indices for
//! reverse iteration from the tail.

use bytes::Bytes;
use rand::Rng;

/// Maximum node height.
const MAX_LEVEL: usize = 32;

/// Probability of promoting a node one more level.
const P: f64 = 0.25;

/// A sorted-set element: member bytes and score.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub member: Bytes,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct Node {
    /// `None` only for the header sentinel.
    element: Option<Element>,
    forward: Vec<Option<usize>>,
    /// `span[i]` is the number of level-0 nodes `forward[i]` skips, plus one.
    span: Vec<usize>,
    backward: Option<usize>,
}

impl Node {
    fn new(level: usize, element: Option<Element>) -> Self {
        Self {
            element,
            forward: vec![None; level],
            span: vec![0; level],
            backward: None,
        }
    }
}

/// Probabilistic ordered index over `(score, member)` with per-level spans.
#[derive(Debug, Clone)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    tail: Option<usize>,
    level: usize,
    length: usize,
}

const HEADER: usize = 0;

impl SkipList {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(MAX_LEVEL, None)],
            free: Vec::new(),
            tail: None,
            level: 1,
            length: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[cfg(test)]
    pub(crate) fn level(&self) -> usize {
        self.level
    }

    fn elem(&self, idx: usize) -> &Element {
        self.nodes[idx]
            .element
            .as_ref()
            .expect("header has no element")
    }

    /// `true` when the element at `idx` orders strictly before `(score, member)`.
    fn before(&self, idx: usize, score: f64, member: &[u8]) -> bool {
        let e = self.elem(idx);
        e.score < score || (e.score == score && e.member.as_ref() < member)
    }

    fn alloc(&mut self, level: usize, element: Element) -> usize {
        let node = Node::new(level, Some(element));
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn random_level() -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while rng.gen::<f64>() < P && level < MAX_LEVEL {
            level += 1;
        }
        level
    }

    /// Inserts `(score, member)`. The caller keeps members unique; inserting
    /// a duplicate pair produces two elements.
    pub fn insert(&mut self, score: f64, member: Bytes) {
        let mut update = [HEADER; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x = HEADER;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };

            while let Some(next) = self.nodes[x].forward[i] {
                if self.before(next, score, &member) {
                    rank[i] += self.nodes[x].span[i];
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let level = Self::random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = HEADER;
                self.nodes[HEADER].span[i] = self.length;
            }
            self.level = level;
        }

        let new_idx = self.alloc(level, Element { member, score });
        for i in 0..level {
            let up = update[i];
            self.nodes[new_idx].forward[i] = self.nodes[up].forward[i];
            self.nodes[up].forward[i] = Some(new_idx);

            self.nodes[new_idx].span[i] = self.nodes[up].span[i] - (rank[0] - rank[i]);
            self.nodes[up].span[i] = (rank[0] - rank[i]) + 1;
        }

        // levels above the new node's height skip one more level-0 node now
        for i in level..self.level {
            self.nodes[update[i]].span[i] += 1;
        }

        self.nodes[new_idx].backward = if update[0] == HEADER {
            None
        } else {
            Some(update[0])
        };
        if let Some(next) = self.nodes[new_idx].forward[0] {
            self.nodes[next].backward = Some(new_idx);
        } else {
            self.tail = Some(new_idx);
        }

        self.length += 1;
    }

    /// Removes `(score, member)` if present. Returns `true` on removal.
    pub fn remove(&mut self, score: f64, member: &[u8]) -> bool {
        let mut update = [HEADER; MAX_LEVEL];

        let mut x = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].forward[i] {
                if self.before(next, score, member) {
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let target = match self.nodes[x].forward[0] {
            Some(t) => t,
            None => return false,
        };
        {
            let e = self.elem(target);
            if e.score != score || e.member.as_ref() != member {
                return false;
            }
        }

        for i in 0..self.level {
            if self.nodes[update[i]].forward[i] == Some(target) {
                let gap = self.nodes[target].span[i];
                self.nodes[update[i]].span[i] = self.nodes[update[i]].span[i] + gap - 1;
                self.nodes[update[i]].forward[i] = self.nodes[target].forward[i];
            } else {
                self.nodes[update[i]].span[i] -= 1;
            }
        }

        let t_forward = self.nodes[target].forward[0];
        let t_backward = self.nodes[target].backward;
        if let Some(next) = t_forward {
            self.nodes[next].backward = t_backward;
        } else {
            self.tail = t_backward;
        }

        while self.level > 1 && self.nodes[HEADER].forward[self.level - 1].is_none() {
            self.level -= 1;
        }

        self.length -= 1;
        self.nodes[target] = Node::new(0, None);
        self.free.push(target);
        true
    }

    /// Returns the 0-based rank of `(score, member)`, or `None`.
    pub fn rank_of(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut rank = 0usize;
        let mut x = HEADER;

        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].forward[i] {
                let e = self.elem(next);
                let advance = e.score < score
                    || (e.score == score && e.member.as_ref() <= member);
                if advance {
                    rank += self.nodes[x].span[i];
                    x = next;
                } else {
                    break;
                }
            }
            if x != HEADER && self.elem(x).member.as_ref() == member {
                return Some(rank - 1);
            }
        }
        None
    }

    /// Returns the element at 0-based `rank`, descending by spans.
    pub fn get_by_rank(&self, rank: usize) -> Option<&Element> {
        if rank >= self.length {
            return None;
        }

        // spans accumulate 1-based positions along level 0
        let target = rank + 1;
        let mut traversed = 0usize;
        let mut x = HEADER;

        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].forward[i] {
                if traversed + self.nodes[x].span[i] <= target {
                    traversed += self.nodes[x].span[i];
                    x = next;
                } else {
                    break;
                }
            }
            if traversed == target {
                return self.nodes[x].element.as_ref();
            }
        }
        None
    }

    /// Elements with 0-based ranks in `[start, stop]` (already clamped by
    /// the caller), in ascending or descending order.
    pub fn range_by_rank(&self, start: usize, stop: usize, forward: bool) -> Vec<&Element> {
        if self.length == 0 || start > stop || start >= self.length {
            return Vec::new();
        }
        let stop = stop.min(self.length - 1);
        let count = stop - start + 1;
        let mut out = Vec::with_capacity(count);

        if forward {
            let mut idx = self.node_at_rank(start);
            while let Some(i) = idx {
                out.push(self.elem(i));
                if out.len() == count {
                    break;
                }
                idx = self.nodes[i].forward[0];
            }
        } else {
            let mut idx = self.node_at_rank(stop);
            while let Some(i) = idx {
                out.push(self.elem(i));
                if out.len() == count {
                    break;
                }
                idx = self.nodes[i].backward;
            }
        }
        out
    }

    fn node_at_rank(&self, rank: usize) -> Option<usize> {
        if rank >= self.length {
            return None;
        }
        let target = rank + 1;
        let mut traversed = 0usize;
        let mut x = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].forward[i] {
                if traversed + self.nodes[x].span[i] <= target {
                    traversed += self.nodes[x].span[i];
                    x = next;
                } else {
                    break;
                }
            }
            if traversed == target {
                return Some(x);
            }
        }
        None
    }

    /// Elements whose score lies in the closed interval `[min, max]`,
    /// walking level 0 forward or the backward chain from the tail.
    pub fn range_by_score(&self, min: f64, max: f64, forward: bool) -> Vec<&Element> {
        let mut out = Vec::new();
        if self.length == 0 {
            return out;
        }

        if forward {
            // descend to the last node with score < min
            let mut x = HEADER;
            for i in (0..self.level).rev() {
                while let Some(next) = self.nodes[x].forward[i] {
                    if self.elem(next).score < min {
                        x = next;
                    } else {
                        break;
                    }
                }
            }
            let mut idx = self.nodes[x].forward[0];
            while let Some(i) = idx {
                let e = self.elem(i);
                if e.score > max {
                    break;
                }
                out.push(e);
                idx = self.nodes[i].forward[0];
            }
        } else {
            let mut idx = self.tail;
            while let Some(i) = idx {
                if self.elem(i).score <= max {
                    break;
                }
                idx = self.nodes[i].backward;
            }
            while let Some(i) = idx {
                let e = self.elem(i);
                if e.score < min {
                    break;
                }
                out.push(e);
                idx = self.nodes[i].backward;
            }
        }
        out
    }

    /// Forward iterator over all elements in order.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        let mut idx = self.nodes[HEADER].forward[0];
        std::iter::from_fn(move || {
            let i = idx?;
            idx = self.nodes[i].forward[0];
            Some(self.elem(i))
        })
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}
