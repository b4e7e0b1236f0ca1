//! Command registry and handler modules.
//!
//! Each command family registers its handlers into a name-keyed table; the
//! table is built once at startup and handed immutably to the executor in
//! [`crate::db`]. An entry's arity covers the whole command line including
//! the name: non-negative means exactly that many elements, negative means
//! at least the absolute value.

pub mod hash;
pub mod keys;
pub mod list;
pub mod set;
pub mod string;
pub mod zset;

use std::collections::HashMap;

use bytes::Bytes;
use cinder_protocol::Frame;

use crate::keyspace::Keyspace;

/// A command handler: keyspace plus the argument tail (without the name).
pub type Handler = fn(&Keyspace, &[Bytes]) -> Frame;

/// Registry entry for one command.
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: i32,
    pub handler: Handler,
}

pub(crate) type Table = HashMap<&'static str, CommandSpec>;

/// The process-wide name → handler table, keyed by lowercase name.
pub struct CommandRegistry {
    table: Table,
}

impl CommandRegistry {
    /// Builds the full table from every command family.
    pub fn new() -> Self {
        let mut table = Table::new();
        keys::register(&mut table);
        string::register(&mut table);
        list::register(&mut table);
        hash::register(&mut table);
        set::register(&mut table);
        zset::register(&mut table);
        Self { table }
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.table.get(name)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn insert(table: &mut Table, name: &'static str, arity: i32, handler: Handler) {
    table.insert(
        name,
        CommandSpec {
            name,
            arity,
            handler,
        },
    );
}

/// Commands whose successful execution is appended to the AOF and fanned
/// out to replicas. `select` appears here for completeness but is
/// intercepted by the router before it can reach the append path.
pub const MUTATORS: &[&str] = &[
    "set", "setnx", "mset", "incr", "incrby", "decr", "decrby", "hset", "hmset", "hdel",
    "lpush", "rpush", "lpop", "rpop", "lset", "ltrim", "lrem", "sadd", "srem", "zadd",
    "zrem", "del", "expire", "rename", "select", "flushdb",
];

pub fn is_mutator(name: &str) -> bool {
    MUTATORS.contains(&name)
}

/// Validates an arity declaration against a command line of `argc`
/// elements (name included).
pub fn arity_ok(arity: i32, argc: usize) -> bool {
    if arity >= 0 {
        argc == arity as usize
    } else {
        argc >= arity.unsigned_abs() as usize
    }
}

// ---------------------------------------------------------------------------
// shared argument parsing
// ---------------------------------------------------------------------------

/// Largest accepted expire argument: ten years, keeping deadline
/// arithmetic well away from overflow.
pub(crate) const MAX_EXPIRE_SECONDS: i64 = 10 * 365 * 24 * 3600;

pub(crate) fn parse_i64(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

pub(crate) fn parse_f64(arg: &[u8]) -> Option<f64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

/// Integer argument, or the plain not-an-integer reply.
pub(crate) fn int_arg(arg: &[u8]) -> Result<i64, Frame> {
    parse_i64(arg).ok_or_else(|| Frame::error("ERR value is not an integer"))
}

/// Integer argument where the command's domain implies a range, e.g.
/// INCRBY deltas.
pub(crate) fn int_range_arg(arg: &[u8]) -> Result<i64, Frame> {
    parse_i64(arg).ok_or_else(|| Frame::error("ERR value is not an integer or out of range"))
}

/// Float argument, or the not-a-valid-float reply.
pub(crate) fn float_arg(arg: &[u8]) -> Result<f64, Frame> {
    parse_f64(arg).ok_or_else(|| Frame::error("ERR value is not a valid float"))
}

/// Lowercased text form of an argument, for option matching.
pub(crate) fn lower(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).to_ascii_lowercase()
}
