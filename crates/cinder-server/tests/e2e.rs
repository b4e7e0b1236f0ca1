//! End-to-end tests over real TCP connections.
//!
//! Each test binds a server on an ephemeral port with a throwaway AOF
//! directory and drives it with a minimal RESP client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use cinder_protocol::{encode_command, parse_frame, Frame};
use cinder_server::config::ServerConfig;
use cinder_server::server::{build_state, serve, ServerState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_server(aof_dir: &Path, master: Option<String>) -> (String, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let cfg = ServerConfig {
        addr: addr.clone(),
        aof_dir: aof_dir.to_path_buf(),
        db_num: 2,
        master_addr: master,
    };
    let state = build_state(&cfg).unwrap();
    let serve_state = Arc::clone(&state);
    tokio::spawn(async move {
        let _ = serve(serve_state, listener).await;
    });
    (addr, state)
}

struct Client {
    stream: TcpStream,
    buf: BytesMut,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: BytesMut::with_capacity(4096),
        }
    }

    async fn cmd(&mut self, parts: &[&str]) -> Frame {
        let line: Vec<Bytes> = parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        self.stream.write_all(&encode_command(&line)).await.unwrap();
        self.read_frame().await
    }

    async fn send_raw(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.unwrap();
    }

    async fn read_frame(&mut self) -> Frame {
        loop {
            if let Some((frame, consumed)) = parse_frame(&self.buf).unwrap() {
                self.buf.advance(consumed);
                return frame;
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "server closed the connection unexpectedly");
        }
    }
}

fn bulk(s: &str) -> Frame {
    Frame::bulk(Bytes::copy_from_slice(s.as_bytes()))
}

fn array_of_bulks(items: &[&str]) -> Frame {
    Frame::multi_bulk(
        items
            .iter()
            .map(|s| Some(Bytes::copy_from_slice(s.as_bytes())))
            .collect(),
    )
}

/// Polls a fresh connection for an expected GET reply, failing after ~5s.
async fn wait_for_key(addr: &str, key: &str, expected: Frame) {
    for _ in 0..100 {
        let mut probe = Client::connect(addr).await;
        if probe.cmd(&["GET", key]).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("key '{key}' never reached the expected value");
}

#[tokio::test]
async fn string_basics() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(dir.path(), None).await;
    let mut c = Client::connect(&addr).await;

    assert_eq!(c.cmd(&["SET", "k", "v"]).await, Frame::ok());
    assert_eq!(c.cmd(&["GET", "k"]).await, bulk("v"));
    assert_eq!(c.cmd(&["DEL", "k"]).await, Frame::Integer(1));
    assert_eq!(c.cmd(&["GET", "k"]).await, Frame::null_bulk());
}

#[tokio::test]
async fn set_nx_and_ex() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(dir.path(), None).await;
    let mut c = Client::connect(&addr).await;

    assert_eq!(c.cmd(&["SET", "k", "old"]).await, Frame::ok());
    assert_eq!(c.cmd(&["SET", "k", "new", "NX"]).await, Frame::null_bulk());
    assert_eq!(c.cmd(&["GET", "k"]).await, bulk("old"));

    assert_eq!(c.cmd(&["SET", "k", "v", "EX", "1"]).await, Frame::ok());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(c.cmd(&["GET", "k"]).await, Frame::null_bulk());
}

#[tokio::test]
async fn list_order_and_trim() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(dir.path(), None).await;
    let mut c = Client::connect(&addr).await;

    assert_eq!(
        c.cmd(&["RPUSH", "L", "a", "b", "c", "d", "e"]).await,
        Frame::Integer(5)
    );
    assert_eq!(
        c.cmd(&["LRANGE", "L", "0", "-1"]).await,
        array_of_bulks(&["a", "b", "c", "d", "e"])
    );
    assert_eq!(c.cmd(&["LTRIM", "L", "1", "-2"]).await, Frame::ok());
    assert_eq!(
        c.cmd(&["LRANGE", "L", "0", "-1"]).await,
        array_of_bulks(&["b", "c", "d"])
    );
}

#[tokio::test]
async fn wrong_type_leaves_value_intact() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(dir.path(), None).await;
    let mut c = Client::connect(&addr).await;

    assert_eq!(c.cmd(&["SET", "s", "x"]).await, Frame::ok());
    match c.cmd(&["LPUSH", "s", "y"]).await {
        Frame::Error(msg) => assert!(
            msg.starts_with("WRONGTYPE") || msg.starts_with("ERR wrong type"),
            "unexpected error: {msg}"
        ),
        other => panic!("expected an error, got {other:?}"),
    }
    assert_eq!(c.cmd(&["GET", "s"]).await, bulk("x"));
}

#[tokio::test]
async fn sorted_set_rank_consistency() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(dir.path(), None).await;
    let mut c = Client::connect(&addr).await;

    assert_eq!(
        c.cmd(&["ZADD", "z", "1", "a", "2", "b", "3", "c"]).await,
        Frame::Integer(3)
    );
    assert_eq!(c.cmd(&["ZRANK", "z", "b"]).await, Frame::Integer(1));
    assert_eq!(c.cmd(&["ZREVRANK", "z", "b"]).await, Frame::Integer(1));
    assert_eq!(
        c.cmd(&["ZRANGE", "z", "0", "-1", "WITHSCORES"]).await,
        array_of_bulks(&["a", "1", "b", "2", "c", "3"])
    );
}

#[tokio::test]
async fn pipelined_commands_reply_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(dir.path(), None).await;
    let mut c = Client::connect(&addr).await;

    // three commands in one write
    let mut batch = Vec::new();
    for parts in [&["SET", "a", "1"][..], &["SET", "b", "2"], &["GET", "a"]] {
        let line: Vec<Bytes> = parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        batch.extend_from_slice(&encode_command(&line));
    }
    c.send_raw(&batch).await;

    assert_eq!(c.read_frame().await, Frame::ok());
    assert_eq!(c.read_frame().await, Frame::ok());
    assert_eq!(c.read_frame().await, bulk("1"));
}

#[tokio::test]
async fn unknown_command_keeps_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(dir.path(), None).await;
    let mut c = Client::connect(&addr).await;

    assert_eq!(
        c.cmd(&["NOSUCH", "x"]).await,
        Frame::error("ERR unknown command 'nosuch'")
    );
    assert_eq!(c.cmd(&["SET", "k", "v"]).await, Frame::ok());
}

#[tokio::test]
async fn select_routes_to_independent_databases() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(dir.path(), None).await;
    let mut c = Client::connect(&addr).await;

    assert_eq!(c.cmd(&["SET", "k", "zero"]).await, Frame::ok());
    assert_eq!(c.cmd(&["SELECT", "1"]).await, Frame::ok());
    assert_eq!(c.cmd(&["GET", "k"]).await, Frame::null_bulk());
    assert_eq!(c.cmd(&["SELECT", "9"]).await, Frame::error("ERR DB index is out of range"));
    // the failed select leaves the connection on db 1
    assert_eq!(c.cmd(&["SET", "k", "one"]).await, Frame::ok());
    assert_eq!(c.cmd(&["SELECT", "0"]).await, Frame::ok());
    assert_eq!(c.cmd(&["GET", "k"]).await, bulk("zero"));
}

#[tokio::test]
async fn aof_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (addr, state) = start_server(dir.path(), None).await;
        let mut c = Client::connect(&addr).await;
        assert_eq!(c.cmd(&["MSET", "k1", "v1", "k2", "v2"]).await, Frame::ok());
        assert_eq!(c.cmd(&["EXPIRE", "k1", "3600"]).await, Frame::Integer(1));

        // wait for the writer task to drain, then force the fsync
        let expected: i64 = [
            encode_command(&[
                Bytes::from_static(b"MSET"),
                Bytes::from_static(b"k1"),
                Bytes::from_static(b"v1"),
                Bytes::from_static(b"k2"),
                Bytes::from_static(b"v2"),
            ])
            .len() as i64,
            encode_command(&[
                Bytes::from_static(b"EXPIRE"),
                Bytes::from_static(b"k1"),
                Bytes::from_static(b"3600"),
            ])
            .len() as i64,
        ]
        .iter()
        .sum();
        let engine = Arc::clone(state.router.default_db().aof());
        for _ in 0..100 {
            if engine.current_offset() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(engine.current_offset() >= expected, "aof writer never drained");
        state.router.flush_all();
    }

    // a second server over the same directory replays the log
    let (addr, _state) = start_server(dir.path(), None).await;
    let mut c = Client::connect(&addr).await;
    assert_eq!(c.cmd(&["GET", "k1"]).await, bulk("v1"));
    assert_eq!(c.cmd(&["GET", "k2"]).await, bulk("v2"));
    match c.cmd(&["TTL", "k1"]).await {
        Frame::Integer(secs) => assert!((1..=3600).contains(&secs), "ttl {secs}"),
        other => panic!("expected a ttl, got {other:?}"),
    }
}

#[tokio::test]
async fn psync_full_then_partial() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(dir.path(), None).await;

    let mut client = Client::connect(&addr).await;
    assert_eq!(client.cmd(&["SET", "k", "v"]).await, Frame::ok());
    tokio::time::sleep(Duration::from_millis(300)).await;

    // full resync: PSYNC ? 0
    let mut repl = Client::connect(&addr).await;
    repl.send_raw(&encode_command(&[
        Bytes::from_static(b"PSYNC"),
        Bytes::from_static(b"?"),
        Bytes::from_static(b"0"),
    ]))
    .await;

    let header = match repl.read_frame().await {
        Frame::Simple(text) => text,
        other => panic!("expected FULLRESYNC header, got {other:?}"),
    };
    let parts: Vec<&str> = header.split_whitespace().collect();
    assert_eq!(parts[0], "FULLRESYNC");
    let repl_id = parts[1].to_owned();
    assert_eq!(repl_id.len(), 40);
    let start_offset: i64 = parts[2].parse().unwrap();

    // the transferred AOF contains the SET frame
    let set_frame = encode_command(&[
        Bytes::from_static(b"SET"),
        Bytes::from_static(b"k"),
        Bytes::from_static(b"v"),
    ]);
    match repl.read_frame().await {
        Frame::Array(Some(items)) => assert_eq!(items.len(), 3),
        other => panic!("expected the replayed SET, got {other:?}"),
    }

    // a new mutator is broadcast to the attached replica connection
    assert_eq!(client.cmd(&["SET", "k2", "v2"]).await, Frame::ok());
    match repl.read_frame().await {
        Frame::Array(Some(items)) => {
            assert_eq!(items[1], Frame::bulk(Bytes::from_static(b"k2")));
        }
        other => panic!("expected the broadcast SET, got {other:?}"),
    }

    // partial resync: a second connection presenting the master's id and
    // the offset right after the first frame receives only the tail
    let mut partial = Client::connect(&addr).await;
    let offset = start_offset + set_frame.len() as i64;
    partial
        .send_raw(&encode_command(&[
            Bytes::from_static(b"PSYNC"),
            Bytes::copy_from_slice(repl_id.as_bytes()),
            Bytes::from(offset.to_string()),
        ]))
        .await;

    assert_eq!(partial.read_frame().await, Frame::Simple("CONTINUE".into()));
    match partial.read_frame().await {
        Frame::Array(Some(items)) => {
            assert_eq!(items[1], Frame::bulk(Bytes::from_static(b"k2")));
        }
        other => panic!("expected the backlog tail, got {other:?}"),
    }
}

#[tokio::test]
async fn replica_follows_master_and_rejects_writes() {
    let master_dir = tempfile::tempdir().unwrap();
    let replica_dir = tempfile::tempdir().unwrap();

    let (master_addr, _master_state) = start_server(master_dir.path(), None).await;
    let mut m = Client::connect(&master_addr).await;
    assert_eq!(m.cmd(&["SET", "seed", "1"]).await, Frame::ok());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (replica_addr, _replica_state) =
        start_server(replica_dir.path(), Some(master_addr.clone())).await;

    // the full sync lands the seed key on the replica
    let mut r = Client::connect(&replica_addr).await;
    wait_for_key(&replica_addr, "seed", bulk("1")).await;

    // ordinary clients cannot write to a replica
    match r.cmd(&["SET", "x", "y"]).await {
        Frame::Error(msg) => assert!(msg.starts_with("READONLY"), "got: {msg}"),
        other => panic!("expected READONLY error, got {other:?}"),
    }
    // reads are fine
    assert_eq!(r.cmd(&["GET", "seed"]).await, bulk("1"));

    // new writes on the master flow through the stream
    assert_eq!(m.cmd(&["SET", "live", "2"]).await, Frame::ok());
    wait_for_key(&replica_addr, "live", bulk("2")).await;
}
