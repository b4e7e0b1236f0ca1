//! cinder-persistence: durable write log and replication backlog.
//!
//! The [`aof::AofEngine`] records every mutator command as a RESP
//! multi-bulk frame, exactly as it appeared on the wire, and replays the
//! log on startup. The [`backlog::Backlog`] keeps a sliding window of the
//! same byte stream in memory so replicas can partially resynchronize.

pub mod aof;
pub mod backlog;

pub use aof::{AofEngine, AofError, ReplicaSink};
pub use backlog::Backlog;
