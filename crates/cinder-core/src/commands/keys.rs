//! Keyspace-level commands: DEL, EXPIRE, RENAME, FLUSHDB.

use std::time::{Duration, Instant};

use bytes::Bytes;
use cinder_protocol::Frame;

use super::{insert, parse_i64, Table, MAX_EXPIRE_SECONDS};
use crate::keyspace::Keyspace;

pub(crate) fn register(table: &mut Table) {
    insert(table, "del", -2, del);
    insert(table, "expire", 3, expire);
    insert(table, "ttl", 2, ttl);
    insert(table, "rename", 3, rename);
    insert(table, "flushdb", 1, flushdb);
}

/// DEL key [key ...] — returns the number of keys actually removed.
fn del(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let mut deleted = 0;
    for key in args {
        // exists() purges a freshly expired key, which must not count
        if ks.exists(key) && ks.remove(key) {
            deleted += 1;
        }
    }
    Frame::Integer(deleted)
}

/// EXPIRE key seconds — a non-positive deadline removes the key now.
fn expire(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let key = &args[0];
    let seconds = match parse_i64(&args[1]) {
        Some(s) if s <= MAX_EXPIRE_SECONDS => s,
        _ => return Frame::error("ERR invalid expire time"),
    };

    if !ks.exists(key) {
        return Frame::Integer(0);
    }

    if seconds <= 0 {
        ks.remove(key);
        return Frame::Integer(1);
    }

    ks.set_expire(key, Instant::now() + Duration::from_secs(seconds as u64));
    Frame::Integer(1)
}

/// TTL key — remaining seconds, -1 for no expiry, -2 for a missing key.
fn ttl(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let key = &args[0];
    if !ks.exists(key) {
        return Frame::Integer(-2);
    }
    match ks.expire_time(key) {
        Some(at) => {
            let left = at.saturating_duration_since(Instant::now());
            Frame::Integer(left.as_secs_f64().ceil() as i64)
        }
        None => Frame::Integer(-1),
    }
}

/// RENAME key newkey — moves the value and its TTL.
fn rename(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let (value, ttl) = match ks.take(&args[0]) {
        Some(entry) => entry,
        None => return Frame::error("ERR no such key"),
    };

    let newkey = &args[1];
    ks.put(newkey, value);
    ks.delete_ttl(newkey);
    if let Some(at) = ttl {
        ks.set_expire(newkey, at);
    }
    Frame::ok()
}

/// FLUSHDB — drops every key in the current database.
fn flushdb(ks: &Keyspace, _args: &[Bytes]) -> Frame {
    ks.clear();
    Frame::ok()
}
