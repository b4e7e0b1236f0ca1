//! Set-family commands.

use bytes::Bytes;
use cinder_protocol::Frame;

use super::{insert, int_range_arg, Table};
use crate::keyspace::Keyspace;
use crate::types::{SetValue, Value};

pub(crate) fn register(table: &mut Table) {
    insert(table, "sadd", -3, sadd);
    insert(table, "srem", -3, srem);
    insert(table, "scard", 2, scard);
    insert(table, "smembers", 2, smembers);
    insert(table, "sismember", 3, sismember);
    insert(table, "spop", -2, spop);
    insert(table, "srandmember", -2, srandmember);
    insert(table, "sunion", -2, sunion);
    insert(table, "sinter", -2, sinter);
}

fn sadd(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let result = ks.get_or_create(
        &args[0],
        || Value::Set(SetValue::new()),
        |v| match v {
            Value::Set(s) => {
                let mut added = 0;
                for member in &args[1..] {
                    if s.add(member.clone()) {
                        added += 1;
                    }
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

/// SREM key member [member ...] — a set drained to empty is removed.
fn srem(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let outcome = ks.with_value_mut(&args[0], |v| match v {
        Value::Set(s) => {
            let mut removed = 0;
            for member in &args[1..] {
                if s.remove(member) {
                    removed += 1;
                }
            }
            Ok((removed, s.is_empty()))
        }
        _ => Err(()),
    });
    match outcome {
        None => Frame::Integer(0),
        Some(Ok((removed, drained))) => {
            if drained {
                ks.remove(&args[0]);
            }
            Frame::Integer(removed)
        }
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn scard(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Set(s) => Ok(s.len() as i64),
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(len)) => Frame::Integer(len),
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn smembers(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Set(s) => Ok(s.members()),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(members)) => Frame::multi_bulk(members.into_iter().map(Some).collect()),
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn sismember(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Set(s) => Ok(i64::from(s.contains(&args[1]))),
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(found)) => Frame::Integer(found),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// SPOP key [count]
fn spop(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let count = match args.get(1) {
        Some(raw) => match int_range_arg(raw) {
            Ok(c) if c >= 0 => Some(c as usize),
            Ok(_) => return Frame::error("ERR value is out of range, must be positive"),
            Err(reply) => return reply,
        },
        None => None,
    };

    let outcome = ks.with_value_mut(&args[0], |v| match v {
        Value::Set(s) => {
            let take = count.unwrap_or(1).min(s.len());
            let mut popped = Vec::with_capacity(take);
            for _ in 0..take {
                match s.pop() {
                    Some(m) => popped.push(m),
                    None => break,
                }
            }
            Ok((popped, s.is_empty()))
        }
        _ => Err(()),
    });

    match outcome {
        None => Frame::null_bulk(),
        Some(Ok((popped, drained))) => {
            if drained {
                ks.remove(&args[0]);
            }
            match count {
                None => match popped.into_iter().next() {
                    Some(member) => Frame::bulk(member),
                    None => Frame::null_bulk(),
                },
                Some(_) => Frame::multi_bulk(popped.into_iter().map(Some).collect()),
            }
        }
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// SRANDMEMBER key [count] — a positive count draws distinct members, a
/// negative count allows duplicates.
fn srandmember(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let count = match args.get(1) {
        Some(raw) => match int_range_arg(raw) {
            Ok(c) => Some(c),
            Err(reply) => return reply,
        },
        None => None,
    };

    let picked = ks.with_value(&args[0], |v| match v {
        Value::Set(s) => Ok(match count {
            None => s.random().map(|m| vec![m]).unwrap_or_default(),
            Some(c) if c >= 0 => {
                // distinct draws, capped by the set size
                let mut pool = s.members();
                let take = (c as usize).min(pool.len());
                let mut out = Vec::with_capacity(take);
                for _ in 0..take {
                    let idx = rand::Rng::gen_range(&mut rand::thread_rng(), 0..pool.len());
                    out.push(pool.swap_remove(idx));
                }
                out
            }
            Some(c) => {
                // duplicates allowed: |c| independent draws
                (0..c.unsigned_abs()).filter_map(|_| s.random()).collect()
            }
        }),
        _ => Err(()),
    });

    match picked {
        None => Frame::null_bulk(),
        Some(Ok(members)) => match count {
            None => match members.into_iter().next() {
                Some(member) => Frame::bulk(member),
                None => Frame::null_bulk(),
            },
            Some(_) => Frame::multi_bulk(members.into_iter().map(Some).collect()),
        },
        Some(Err(())) => Frame::wrong_type(),
    }
}

enum SetLookup {
    Missing,
    WrongKind,
    Found(Vec<Bytes>, usize),
}

fn collect(ks: &Keyspace, key: &[u8]) -> SetLookup {
    match ks.with_value(key, |v| match v {
        Value::Set(s) => Ok((s.members(), s.len())),
        _ => Err(()),
    }) {
        None => SetLookup::Missing,
        Some(Ok((members, len))) => SetLookup::Found(members, len),
        Some(Err(())) => SetLookup::WrongKind,
    }
}

/// SUNION key [key ...] — missing keys contribute nothing.
fn sunion(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let mut union = SetValue::new();
    for key in args {
        match collect(ks, key) {
            SetLookup::Missing => {}
            SetLookup::WrongKind => return Frame::wrong_type(),
            SetLookup::Found(members, _) => {
                for m in members {
                    union.add(m);
                }
            }
        }
    }
    Frame::multi_bulk(union.members().into_iter().map(Some).collect())
}

/// SINTER key [key ...] — any missing key empties the intersection. The
/// smallest input is scanned and probed against the rest.
fn sinter(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let mut sets = Vec::with_capacity(args.len());
    for key in args {
        match collect(ks, key) {
            SetLookup::Missing => {
                return Frame::multi_bulk(Vec::new());
            }
            SetLookup::WrongKind => return Frame::wrong_type(),
            SetLookup::Found(members, len) => sets.push((members, len, key)),
        }
    }

    sets.sort_by_key(|(_, len, _)| *len);
    let (smallest, rest) = match sets.split_first() {
        Some(split) => split,
        None => return Frame::multi_bulk(Vec::new()),
    };

    let mut out = Vec::new();
    'candidates: for member in &smallest.0 {
        for (_, _, key) in rest {
            let present = ks
                .with_value(key, |v| match v {
                    Value::Set(s) => s.contains(member),
                    _ => false,
                })
                .unwrap_or(false);
            if !present {
                continue 'candidates;
            }
        }
        out.push(Some(member.clone()));
    }
    Frame::multi_bulk(out)
}
