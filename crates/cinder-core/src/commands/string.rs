//! String-family commands.

use std::time::{Duration, Instant};

use bytes::Bytes;
use cinder_protocol::Frame;

use super::{insert, int_range_arg, lower, parse_i64, Table, MAX_EXPIRE_SECONDS};
use crate::keyspace::Keyspace;
use crate::types::{StringValue, Value};

pub(crate) fn register(table: &mut Table) {
    insert(table, "set", -3, set);
    insert(table, "get", 2, get);
    insert(table, "setnx", 3, setnx);
    insert(table, "strlen", 2, strlen);
    insert(table, "append", 3, append);
    insert(table, "incr", 2, incr);
    insert(table, "decr", 2, decr);
    insert(table, "incrby", 3, incrby);
    insert(table, "decrby", 3, decrby);
    insert(table, "mget", -2, mget);
    insert(table, "mset", -3, mset);
}

/// SET key value [EX seconds] [NX]
///
/// The one write that may overwrite a key of any kind. A plain SET clears
/// any existing TTL; EX installs a fresh one in the same call.
fn set(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let key = &args[0];
    let value = args[1].clone();

    let mut use_nx = false;
    let mut expire_at: Option<Instant> = None;

    let mut i = 2;
    while i < args.len() {
        match lower(&args[i]).as_str() {
            "ex" => {
                let raw = match args.get(i + 1) {
                    Some(raw) => raw,
                    None => return Frame::arity_error("set"),
                };
                match parse_i64(raw) {
                    Some(secs) if secs > 0 && secs <= MAX_EXPIRE_SECONDS => {
                        expire_at = Some(Instant::now() + Duration::from_secs(secs as u64));
                    }
                    _ => return Frame::error("ERR invalid expire time"),
                }
                i += 1;
            }
            "nx" => use_nx = true,
            _ => return Frame::error("ERR unknown option"),
        }
        i += 1;
    }

    if use_nx && ks.exists(key) {
        return Frame::null_bulk();
    }

    ks.put(key, Value::Str(StringValue::from_bytes(value)));
    ks.delete_ttl(key);
    if let Some(at) = expire_at {
        ks.set_expire(key, at);
    }
    Frame::ok()
}

/// GET key
fn get(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Str(s) => Ok(s.get()),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(bytes)) => Frame::bulk(bytes),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// SETNX key value
fn setnx(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let created = ks.put_if_absent(
        &args[0],
        Value::Str(StringValue::from_bytes(args[1].clone())),
    );
    Frame::Integer(created)
}

/// STRLEN key
fn strlen(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Str(s) => Ok(s.len() as i64),
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(len)) => Frame::Integer(len),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// APPEND key value — creates the key when absent, returns the new length.
fn append(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let suffix = args[1].clone();
    let result = ks.get_or_create(
        &args[0],
        || Value::Str(StringValue::from_bytes(Bytes::new())),
        |v| match v {
            Value::Str(s) => {
                let mut data = s.get().to_vec();
                data.extend_from_slice(&suffix);
                let len = data.len() as i64;
                s.set(Bytes::from(data));
                Ok(len)
            }
            _ => Err(()),
        },
    );
    match result {
        Ok(len) => Frame::Integer(len),
        Err(()) => Frame::wrong_type(),
    }
}

fn incr(ks: &Keyspace, args: &[Bytes]) -> Frame {
    apply_delta(ks, &args[0], 1)
}

fn decr(ks: &Keyspace, args: &[Bytes]) -> Frame {
    apply_delta(ks, &args[0], -1)
}

fn incrby(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match int_range_arg(&args[1]) {
        Ok(delta) => apply_delta(ks, &args[0], delta),
        Err(reply) => reply,
    }
}

fn decrby(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let delta = match int_range_arg(&args[1]) {
        Ok(delta) => delta,
        Err(reply) => return reply,
    };
    match delta.checked_neg() {
        Some(neg) => apply_delta(ks, &args[0], neg),
        None => Frame::error("ERR value is not an integer or out of range"),
    }
}

enum DeltaError {
    WrongKind,
    NotAnInteger,
}

/// Shared INCR/DECR/INCRBY/DECRBY core: a missing key counts from zero;
/// a non-integer value (or overflow) leaves the value untouched.
fn apply_delta(ks: &Keyspace, key: &Bytes, delta: i64) -> Frame {
    let result = ks.get_or_create(
        key,
        || Value::Str(StringValue::Int(0)),
        |v| match v {
            Value::Str(s) => s.incr_by(delta).map_err(|_| DeltaError::NotAnInteger),
            _ => Err(DeltaError::WrongKind),
        },
    );
    match result {
        Ok(n) => Frame::Integer(n),
        Err(DeltaError::NotAnInteger) => Frame::error("ERR value is not an integer"),
        Err(DeltaError::WrongKind) => Frame::wrong_type(),
    }
}

/// MGET key [key ...] — wrong-kind and missing keys read as nulls.
fn mget(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let items = args
        .iter()
        .map(|key| {
            ks.with_value(key, |v| match v {
                Value::Str(s) => Some(s.get()),
                _ => None,
            })
            .flatten()
        })
        .collect();
    Frame::multi_bulk(items)
}

/// MSET key value [key value ...]
fn mset(ks: &Keyspace, args: &[Bytes]) -> Frame {
    if args.len() % 2 != 0 {
        return Frame::arity_error("mset");
    }
    for pair in args.chunks_exact(2) {
        ks.put(&pair[0], Value::Str(StringValue::from_bytes(pair[1].clone())));
        ks.delete_ttl(&pair[0]);
    }
    Frame::ok()
}
