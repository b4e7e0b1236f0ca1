//! Server assembly: startup order, accept loop, shutdown.
//!
//! Startup follows the engine's dependency order: open the AOF engines,
//! anchor the replication backlog at the default database's offset, replay
//! the logs, start the maintenance tasks, optionally start the
//! replica-side client, and only then accept connections. On ctrl-c the
//! accept loop stops and every AOF is flushed and fsynced before exit.

use std::sync::{Arc, Mutex};

use cinder_core::db::DEFAULT_DB_COUNT;
use cinder_core::DbRouter;
use cinder_persistence::Backlog;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::connection;
use crate::replica::ReplicaClient;
use crate::replication::{Replication, DEFAULT_BACKLOG_SIZE};

/// Everything a connection task needs to serve requests.
pub struct ServerState {
    pub router: Arc<DbRouter>,
    pub repl: Replication,
    /// Whether this process runs as a replica (mutators from ordinary
    /// clients are refused).
    pub is_replica: bool,
}

/// Builds the full server state from a configuration. Split from [`run`]
/// so tests can assemble a server on an ephemeral port.
pub fn build_state(cfg: &ServerConfig) -> Result<Arc<ServerState>, Box<dyn std::error::Error + Send + Sync>> {
    let db_num = if cfg.db_num == 0 {
        DEFAULT_DB_COUNT
    } else {
        cfg.db_num
    };

    // the backlog is anchored once the default database's offset is known
    let backlog = Arc::new(Mutex::new(Backlog::new(DEFAULT_BACKLOG_SIZE, 0)));
    let router = Arc::new(DbRouter::open(&cfg.aof_dir, db_num, Some(backlog.clone()))?);
    {
        let offset = router.default_db().aof().current_offset();
        *backlog.lock().unwrap() = Backlog::new(DEFAULT_BACKLOG_SIZE, offset);
    }

    router.load_all()?;
    router.start_background_tasks();

    let state = Arc::new(ServerState {
        router,
        repl: Replication::new(backlog),
        is_replica: cfg.master_addr.is_some(),
    });

    if let Some(master) = &cfg.master_addr {
        info!(master = %master, "starting as replica");
        ReplicaClient::start(master.clone(), Arc::clone(&state));
    }

    Ok(state)
}

/// Binds the listener and serves until ctrl-c.
pub async fn run(cfg: ServerConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = build_state(&cfg)?;
    let listener = TcpListener::bind(&cfg.addr).await?;
    info!(addr = %cfg.addr, dbs = state.router.db_count(), "cinder listening");

    serve(state, listener).await
}

/// Accept loop over an already-bound listener.
pub async fn serve(
    state: Arc<ServerState>,
    listener: TcpListener,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            connection::handle(state, stream, peer).await;
                        });
                    }
                    Err(e) => error!("accept failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down; flushing append-only files");
                state.router.flush_all();
                return Ok(());
            }
        }
    }
}
