//! Server configuration.

use std::path::PathBuf;

/// Runtime configuration for one server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen address, e.g. `127.0.0.1:6379`.
    pub addr: String,
    /// Directory holding one `db<i>.aof` per database.
    pub aof_dir: PathBuf,
    /// Number of logical databases.
    pub db_num: usize,
    /// When set, run as a replica of this master (`host:port`).
    pub master_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".into(),
            aof_dir: PathBuf::from("./data"),
            db_num: 16,
            master_addr: None,
        }
    }
}
