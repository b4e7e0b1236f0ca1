//! The polymorphic value model.
//!
//! A stored value is a closed tagged variant over five kinds — string,
//! list, hash, set, sorted set — each of which manages its own compact and
//! general encodings internally. Type mismatch checks are exhaustive
//! matches in the command handlers, yielding the reserved WRONGTYPE reply.

pub mod hash;
pub mod list;
pub mod pack;
pub mod set;
pub mod string;
pub mod zset;

use bytes::Bytes;
use cinder_protocol::CmdLine;

pub use hash::HashValue;
pub use list::QuickList;
pub use pack::Pack;
pub use set::SetValue;
pub use string::StringValue;
pub use zset::SortedSet;

/// A value stored under a key. Cloning is deep: the rewrite snapshot
/// relies on clones being independent of the live structures.
#[derive(Debug, Clone)]
pub enum Value {
    Str(StringValue),
    List(QuickList),
    Hash(HashValue),
    Set(SetValue),
    ZSet(SortedSet),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::ZSet(_) => "zset",
        }
    }

    /// The minimal command line that reconstructs this value under `key`,
    /// used by the AOF rewrite. Returns `None` for empty collections,
    /// which have nothing to persist.
    pub fn to_write_cmdline(&self, key: &Bytes) -> Option<CmdLine> {
        match self {
            Value::Str(s) => Some(vec![Bytes::from_static(b"set"), key.clone(), s.get()]),
            Value::List(l) => {
                if l.is_empty() {
                    return None;
                }
                let mut line = vec![Bytes::from_static(b"rpush"), key.clone()];
                line.extend(l.range(0, -1));
                Some(line)
            }
            Value::Hash(h) => {
                let entries = h.entries();
                if entries.is_empty() {
                    return None;
                }
                let mut line = vec![Bytes::from_static(b"hmset"), key.clone()];
                for (field, value) in entries {
                    line.push(field);
                    line.push(value);
                }
                Some(line)
            }
            Value::Set(s) => {
                let members = s.members();
                if members.is_empty() {
                    return None;
                }
                let mut line = vec![Bytes::from_static(b"sadd"), key.clone()];
                line.extend(members);
                Some(line)
            }
            Value::ZSet(z) => {
                let entries = z.entries();
                if entries.is_empty() {
                    return None;
                }
                let mut line = vec![Bytes::from_static(b"zadd"), key.clone()];
                for (score, member) in entries {
                    line.push(Bytes::from(fmt_score(score)));
                    line.push(member);
                }
                Some(line)
            }
        }
    }
}

/// Clamps a `[start, stop]` pair with negative-from-the-tail semantics to
/// concrete bounds over a sequence of `len` elements. `None` means the
/// window is empty after clamping.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;

    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };

    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Parses a canonical decimal i64: the bytes must reproduce exactly when
/// the parsed value is re-formatted. Rejects `"007"`, `"+1"`, `" 1"`.
pub fn parse_canonical_i64(bytes: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let v: i64 = s.parse().ok()?;
    let mut buf = itoa::Buffer::new();
    (buf.format(v).as_bytes() == bytes).then_some(v)
}

/// Formats a score the way it appears in replies and in the AOF: shortest
/// decimal form, integers without a fractional part.
pub fn fmt_score(score: f64) -> String {
    format!("{score}")
}
