//! cinder-core: the storage engine.
//!
//! Everything between the wire codec and the socket lives here: the sharded
//! concurrent dictionary, the polymorphic value model with its compact and
//! general encodings, the order-statistic skip list behind sorted sets, the
//! per-database keyspace with TTL handling, and the command registry and
//! executor that tie handlers to the append-only log.

pub mod commands;
pub mod db;
pub mod dict;
pub mod keyspace;
pub mod session;
pub mod skiplist;
pub mod types;

pub use commands::CommandRegistry;
pub use db::DbRouter;
pub use dict::ShardedDict;
pub use keyspace::Keyspace;
pub use session::{Role, Session};
pub use types::Value;
