//! Sorted-set-family commands.

use bytes::Bytes;
use cinder_protocol::Frame;

use super::{float_arg, insert, int_arg, lower, Table};
use crate::keyspace::Keyspace;
use crate::types::{fmt_score, SortedSet, Value};

pub(crate) fn register(table: &mut Table) {
    insert(table, "zadd", -4, zadd);
    insert(table, "zcard", 2, zcard);
    insert(table, "zscore", 3, zscore);
    insert(table, "zrank", 3, zrank);
    insert(table, "zrevrank", 3, zrevrank);
    insert(table, "zrange", -4, zrange);
    insert(table, "zrevrange", -4, zrevrange);
    insert(table, "zcount", 4, zcount);
    insert(table, "zrem", -3, zrem);
}

/// ZADD key [NX|XX] score member [score member ...]
fn zadd(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let mut nx = false;
    let mut xx = false;
    let mut first_pair = args.len();

    for (i, arg) in args.iter().enumerate().skip(1) {
        match lower(arg).as_str() {
            "nx" => nx = true,
            "xx" => xx = true,
            _ => {
                first_pair = i;
                break;
            }
        }
    }

    let pairs = &args[first_pair..];
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Frame::arity_error("zadd");
    }

    // validate every score before touching the keyspace
    let mut scored = Vec::with_capacity(pairs.len() / 2);
    for pair in pairs.chunks_exact(2) {
        match float_arg(&pair[0]) {
            Ok(score) => scored.push((score, pair[1].clone())),
            Err(reply) => return reply,
        }
    }

    let result = ks.get_or_create(
        &args[0],
        || Value::ZSet(SortedSet::new()),
        |v| match v {
            Value::ZSet(z) => {
                let mut added = 0;
                for (score, member) in scored {
                    added += z.add(nx, xx, score, member);
                }
                Ok(added)
            }
            _ => Err(()),
        },
    );
    match result {
        Ok(added) => Frame::Integer(added),
        Err(()) => Frame::wrong_type(),
    }
}

fn zcard(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::ZSet(z) => Ok(z.len() as i64),
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(len)) => Frame::Integer(len),
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn zscore(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::ZSet(z) => Ok(z.score(&args[1])),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(Some(score))) => Frame::bulk(Bytes::from(fmt_score(score))),
        Some(Ok(None)) => Frame::null_bulk(),
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn zrank(ks: &Keyspace, args: &[Bytes]) -> Frame {
    rank_reply(ks, args, false)
}

fn zrevrank(ks: &Keyspace, args: &[Bytes]) -> Frame {
    rank_reply(ks, args, true)
}

fn rank_reply(ks: &Keyspace, args: &[Bytes], reverse: bool) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::ZSet(z) => Ok(if reverse {
            z.rev_rank(&args[1])
        } else {
            z.rank(&args[1])
        }),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(Some(rank))) => Frame::Integer(rank as i64),
        Some(Ok(None)) => Frame::null_bulk(),
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn zrange(ks: &Keyspace, args: &[Bytes]) -> Frame {
    range_reply(ks, args, false)
}

fn zrevrange(ks: &Keyspace, args: &[Bytes]) -> Frame {
    range_reply(ks, args, true)
}

/// ZRANGE / ZREVRANGE key start stop [WITHSCORES]
fn range_reply(ks: &Keyspace, args: &[Bytes], reverse: bool) -> Frame {
    let (start, stop) = match (int_arg(&args[1]), int_arg(&args[2])) {
        (Ok(s), Ok(e)) => (s, e),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    let with_scores = match args.get(3) {
        Some(arg) if lower(arg) == "withscores" => true,
        Some(_) => return Frame::error("ERR syntax error"),
        None => false,
    };

    match ks.with_value(&args[0], |v| match v {
        Value::ZSet(z) => Ok(if reverse {
            z.rev_range(start, stop, with_scores)
        } else {
            z.range(start, stop, with_scores)
        }),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(items)) => Frame::multi_bulk(items.into_iter().map(Some).collect()),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// ZCOUNT key min max — inclusive on both ends.
fn zcount(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let (min, max) = match (float_arg(&args[1]), float_arg(&args[2])) {
        (Ok(min), Ok(max)) => (min, max),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    match ks.with_value(&args[0], |v| match v {
        Value::ZSet(z) => Ok(z.count(min, max) as i64),
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(count)) => Frame::Integer(count),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// ZREM key member [member ...]
fn zrem(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value_mut(&args[0], |v| match v {
        Value::ZSet(z) => {
            let mut removed = 0;
            for member in &args[1..] {
                if z.remove(member) {
                    removed += 1;
                }
            }
            Ok(removed)
        }
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(removed)) => Frame::Integer(removed),
        Some(Err(())) => Frame::wrong_type(),
    }
}
