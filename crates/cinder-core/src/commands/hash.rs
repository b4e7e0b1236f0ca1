//! Hash-family commands.

use bytes::Bytes;
use cinder_protocol::Frame;

use super::{insert, Table};
use crate::keyspace::Keyspace;
use crate::types::{HashValue, Value};

pub(crate) fn register(table: &mut Table) {
    insert(table, "hset", 4, hset);
    insert(table, "hget", 3, hget);
    insert(table, "hdel", -3, hdel);
    insert(table, "hexists", 3, hexists);
    insert(table, "hlen", 2, hlen);
    insert(table, "hkeys", 2, hkeys);
    insert(table, "hvals", 2, hvals);
    insert(table, "hgetall", 2, hgetall);
    insert(table, "hmset", -4, hmset);
    insert(table, "hmget", -3, hmget);
}

/// HSET key field value — returns 1 for a new field, 0 for an update.
fn hset(ks: &Keyspace, args: &[Bytes]) -> Frame {
    let field = args[1].clone();
    let value = args[2].clone();
    let result = ks.get_or_create(
        &args[0],
        || Value::Hash(HashValue::new()),
        |v| match v {
            Value::Hash(h) => Ok(h.hset(field, value)),
            _ => Err(()),
        },
    );
    match result {
        Ok(created) => Frame::Integer(created),
        Err(()) => Frame::wrong_type(),
    }
}

/// HGET key field
fn hget(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Hash(h) => Ok(h.hget(&args[1])),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(Some(val))) => Frame::bulk(val),
        Some(Ok(None)) => Frame::null_bulk(),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// HDEL key field [field ...]
fn hdel(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value_mut(&args[0], |v| match v {
        Value::Hash(h) => {
            let mut deleted = 0;
            for field in &args[1..] {
                if h.hdel(field) {
                    deleted += 1;
                }
            }
            Ok(deleted)
        }
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(deleted)) => Frame::Integer(deleted),
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn hexists(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Hash(h) => Ok(i64::from(h.hexists(&args[1]))),
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(found)) => Frame::Integer(found),
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn hlen(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Hash(h) => Ok(h.hlen() as i64),
        _ => Err(()),
    }) {
        None => Frame::Integer(0),
        Some(Ok(len)) => Frame::Integer(len),
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn hkeys(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Hash(h) => Ok(h.hkeys()),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(keys)) => Frame::multi_bulk(keys.into_iter().map(Some).collect()),
        Some(Err(())) => Frame::wrong_type(),
    }
}

fn hvals(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Hash(h) => Ok(h.hvals()),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(vals)) => Frame::multi_bulk(vals.into_iter().map(Some).collect()),
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// HGETALL key — alternating field, value.
fn hgetall(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Hash(h) => Ok(h.entries()),
        _ => Err(()),
    }) {
        None => Frame::null_bulk(),
        Some(Ok(entries)) => {
            let mut items = Vec::with_capacity(entries.len() * 2);
            for (field, value) in entries {
                items.push(Some(field));
                items.push(Some(value));
            }
            Frame::multi_bulk(items)
        }
        Some(Err(())) => Frame::wrong_type(),
    }
}

/// HMSET key field value [field value ...]
fn hmset(ks: &Keyspace, args: &[Bytes]) -> Frame {
    if args.len() % 2 != 1 {
        return Frame::arity_error("hmset");
    }
    let result = ks.get_or_create(
        &args[0],
        || Value::Hash(HashValue::new()),
        |v| match v {
            Value::Hash(h) => {
                for pair in args[1..].chunks_exact(2) {
                    h.hset(pair[0].clone(), pair[1].clone());
                }
                Ok(())
            }
            _ => Err(()),
        },
    );
    match result {
        Ok(()) => Frame::ok(),
        Err(()) => Frame::wrong_type(),
    }
}

/// HMGET key field [field ...] — nulls for missing fields or a missing key.
fn hmget(ks: &Keyspace, args: &[Bytes]) -> Frame {
    match ks.with_value(&args[0], |v| match v {
        Value::Hash(h) => Ok(args[1..].iter().map(|f| h.hget(f)).collect::<Vec<_>>()),
        _ => Err(()),
    }) {
        None => Frame::multi_bulk(vec![None; args.len() - 1]),
        Some(Ok(vals)) => Frame::multi_bulk(vals),
        Some(Err(())) => Frame::wrong_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{args, b, keyspace};
    use super::*;
    use crate::types::StringValue;

    #[tokio::test]
    async fn set_get_exists() {
        let (_dir, ks) = keyspace();
        assert_eq!(hset(&ks, &args(&["h", "f", "v"])), Frame::Integer(1));
        assert_eq!(hset(&ks, &args(&["h", "f", "v2"])), Frame::Integer(0));
        assert_eq!(hget(&ks, &args(&["h", "f"])), Frame::bulk(b("v2")));
        assert_eq!(hget(&ks, &args(&["h", "nope"])), Frame::null_bulk());
        assert_eq!(hget(&ks, &args(&["missing", "f"])), Frame::null_bulk());
        assert_eq!(hexists(&ks, &args(&["h", "f"])), Frame::Integer(1));
        assert_eq!(hexists(&ks, &args(&["h", "nope"])), Frame::Integer(0));
    }

    #[tokio::test]
    async fn hdel_counts() {
        let (_dir, ks) = keyspace();
        hmset(&ks, &args(&["h", "a", "1", "b", "2", "c", "3"]));
        assert_eq!(hdel(&ks, &args(&["h", "a", "nope", "c"])), Frame::Integer(2));
        assert_eq!(hlen(&ks, &args(&["h"])), Frame::Integer(1));
        assert_eq!(hdel(&ks, &args(&["missing", "f"])), Frame::Integer(0));
    }

    #[tokio::test]
    async fn getall_round_trips() {
        let (_dir, ks) = keyspace();
        hmset(&ks, &args(&["h", "a", "1", "b", "2"]));

        match hgetall(&ks, &args(&["h"])) {
            Frame::Array(Some(items)) => {
                assert_eq!(items.len(), 4);
                let flat: Vec<Bytes> = items
                    .into_iter()
                    .map(|f| match f {
                        Frame::Bulk(Some(data)) => data,
                        other => panic!("unexpected frame {other:?}"),
                    })
                    .collect();
                let mut pairs: Vec<(Bytes, Bytes)> = flat
                    .chunks_exact(2)
                    .map(|c| (c[0].clone(), c[1].clone()))
                    .collect();
                pairs.sort();
                assert_eq!(pairs, vec![(b("a"), b("1")), (b("b"), b("2"))]);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(hgetall(&ks, &args(&["missing"])), Frame::null_bulk());
    }

    #[tokio::test]
    async fn hmset_validates_pairs() {
        let (_dir, ks) = keyspace();
        assert_eq!(
            hmset(&ks, &args(&["h", "a", "1", "dangling"])),
            Frame::arity_error("hmset")
        );
        assert_eq!(hmset(&ks, &args(&["h", "a", "1"])), Frame::ok());
    }

    #[tokio::test]
    async fn hmget_mixes_hits_and_nulls() {
        let (_dir, ks) = keyspace();
        hmset(&ks, &args(&["h", "a", "1", "b", "2"]));
        assert_eq!(
            hmget(&ks, &args(&["h", "a", "nope", "b"])),
            Frame::multi_bulk(vec![Some(b("1")), None, Some(b("2"))])
        );
        assert_eq!(
            hmget(&ks, &args(&["missing", "a", "b"])),
            Frame::multi_bulk(vec![None, None])
        );
    }

    #[tokio::test]
    async fn wrong_kind_rejected() {
        let (_dir, ks) = keyspace();
        ks.put(&b("s"), Value::Str(StringValue::from_bytes(b("x"))));
        assert_eq!(hset(&ks, &args(&["s", "f", "v"])), Frame::wrong_type());
        assert_eq!(hget(&ks, &args(&["s", "f"])), Frame::wrong_type());
        assert_eq!(hgetall(&ks, &args(&["s"])), Frame::wrong_type());
        assert_eq!(hmset(&ks, &args(&["s", "f", "v"])), Frame::wrong_type());
    }
}
