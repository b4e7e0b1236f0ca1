use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use cinder_server::config::ServerConfig;

/// cinder: a RESP key-value datastore with append-only persistence and
/// primary/replica replication.
#[derive(Debug, Parser)]
#[command(name = "cinder-server", version, about)]
struct Opts {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:6379")]
    addr: String,

    /// Directory for the append-only files.
    #[arg(long, default_value = "./data")]
    aof_dir: PathBuf,

    /// Number of logical databases.
    #[arg(long, default_value_t = 16)]
    db_num: usize,

    /// Replicate from this master (host:port); the server starts as a
    /// read-only replica.
    #[arg(long)]
    replicaof: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinder=info".into()),
        )
        .init();

    let opts = Opts::parse();
    let cfg = ServerConfig {
        addr: opts.addr,
        aof_dir: opts.aof_dir,
        db_num: opts.db_num,
        master_addr: opts.replicaof,
    };

    match cinder_server::server::run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server exited with error: {e}");
            ExitCode::FAILURE
        }
    }
}
