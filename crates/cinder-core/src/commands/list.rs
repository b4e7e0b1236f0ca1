//! List-family commands.

use bytes::Bytes;
use cinder_protocol::Frame;

use super::{insert, int_arg, Table};
use crate::keyspace::Keyspace;
use crate::types::{QuickList, Value};

pub(crate) fn register(table: &mut Table) {
    insert(table, "lpush", -3, lpush);
    insert(table, "rpush", -3, rpush);
    insert(table, "lpop", 2, lpop);
    insert(table, "rpop", 2, rpop);
    insert(table, "llen", 2, llen);
    insert(table, "lindex", 3, lindex);
    insert(table, "lset", 4, lset);
    insert(table, "lrange", 4, lrange);
    insert(table, "lrem", 4, lrem);
    insert(table, "ltrim", 4, ltrim);
}

fn lpush(ks: &Keyspace, args: &[Bytes]) -> Frame {
    push(ks, args, true)
}

fn rpush(ks: &Keyspace, args: &[Bytes]) -> Frame {
    push(ks, args, false)
}

fn push(ks: &Keyspace, args: &[Bytes], front: bool) -> Frame {
    let result = ks.get_or_create(
        &args[0],
        || Value::List(QuickList::new()),
        |v| match v {
            Value::List(list) => {
                for val in &args[1..] {
                    if front {
                        list.push_front(val.clone());
                    } else {
                        list.push_back(val.clone());
                    }
                }
                Ok(list.len() as i64)
            }
            _ => Err(()),
        },
    );
    match result {
        Ok(len) => Frame::Integer(len),
        Err(()) => Frame::wrong_type(),
    }
}

fn lpop(ks: &Keyspace, args: &[Bytes]) -> Frame {
    pop(ks, &args[0], true)
}

fn rpop(ks: &Keyspace, args: &[Bytes]) -> Frame {
    pop(ks, &args[0], false)
}

fn pop(ks: &Keyspace, key: &[u8], front: bool) -> Frame {
    match ks.with_value_mut(key, |v| match v {
        Value::List(list) => Ok(if front {
            list.pop_front()
        } else {
            list.pop_back()
        }),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(Some(val))) => Frame::bulk(val),
        Some(Ok(None)) => Frame::null_bulk(),
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn llen(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::List(list) => Ok(list.len() as i64),
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(len)) => Frame::Integer(len),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// LINDEX key index
fn lindex(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let index = match int_arg(&args[1]) {
        Ok(i) => i,
        Err(reply) => return reply,
    };
    match ks.with_value(&args[0], |v| match v {
        Value::List(list) => Ok(list.get(index)),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(Some(val))) => Frame::bulk(val),
        Some(Ok(None)) => Frame::null_bulk(),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// LSET key index element — requires the key to exist and the index to be
/// in range.
fn lset(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let index = match int_arg(&args[1]) {
        Ok(i) => i,
        Err(reply) => return reply,
    };
    let value = args[2].clone();
    match ks.with_value_mut(&args[0], |v| match v {
        Value::List(list) => Ok(list.set(index, value)),
        _ => Err(()),
    }) {
        None => Frame::error("ERR no such key"),
        Some(Ok(true)) => Frame::ok(),
        Some(Ok(false)) => Frame::error("ERR index out of range"),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// LRANGE key start stop
fn lrange(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let (start, stop) = match (int_arg(&args[1]), int_arg(&args[2])) {
        (Ok(s), Ok(e)) => (s, e),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    match ks.with_value(&args[0], |v| match v {
        Value::List(list) => Ok(list.range(start, stop)),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(values)) => Frame::multi_bulk(values.into_iter().map(Some).collect()),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// LREM key count element
fn lrem(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let count = match int_arg(&args[1]) {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    let value = args[2].clone();
    match ks.with_value_mut(&args[0], |v| match v {
        Value::List(list) => Ok(list.remove_by_value(count, &value) as i64),
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(removed)) => Frame::Integer(removed),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// LTRIM key start stop
fn ltrim(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let (start, stop) = match (int_arg(&args[1]), int_arg(&args[2])) {
        (Ok(s), Ok(e)) => (s, e),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    match ks.with_value_mut(&args[0], |v| match v {
        Value::List(list) => {
            list.trim(start, stop);
            Ok(())
        }
        _ => Err(()),
    }) {
        None => Frame::ok(),
        Some(Ok(())) => Frame::ok(),
        Some(Err(())) => Frame::wrong_type(),
    }
}
