//! cinder-server: the network front of the datastore.
//!
//! Wires the listener and per-connection tasks to the core engine, serves
//! the PSYNC handshake to replicas, and (when configured with a master)
//! runs the replica-side synchronization loop.

pub mod config;
pub mod connection;
pub mod replica;
pub mod replication;
pub mod server;
