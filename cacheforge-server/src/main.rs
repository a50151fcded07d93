//! Process entry point. Grounded on `cacheforge/src/main.cpp`'s overall
//! shape (load config, start server, wait for shutdown), fixed so the
//! signal handler only flips a stop flag. The original's `signal_handler`
//! calls `spdlog::info` and touches `g_server` directly from inside a
//! POSIX signal handler — neither logging nor non-trivial object access is
//! async-signal-safe. `tokio::signal::ctrl_c` delivers the notification
//! through the normal async runtime instead of a real signal handler, so
//! this class of bug has no counterpart here.

use std::sync::Arc;

use cacheforge_core::{Keyspace, KeyspaceLimits, SnapshotEntry, SnapshotStore};
use cacheforge_server::{Config, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_logging(&config.log_level);

    let keyspace = Keyspace::new(KeyspaceLimits {
        max_entries: Some(config.max_entries),
        max_bytes: Some(config.max_memory_bytes),
    });
    keyspace.start_expiry_sweeper();

    let snapshot_store = Arc::new(SnapshotStore::open(config.snapshot_dir.clone())?);
    restore_from_snapshot(&keyspace, &snapshot_store);

    let replicator = config.replica_host.as_ref().map(|host| {
        let replicator = Arc::new(cacheforge_core::Replicator::new());
        replicator.start(format!("{host}:{}", config.replica_port));
        replicator
    });
    let _replicator = replicator;

    let server = Server::new(config.bind_addr(), config.max_connections, Arc::clone(&keyspace));

    let snapshot_task = spawn_snapshot_task(
        Arc::clone(&keyspace),
        Arc::clone(&snapshot_store),
        config.snapshot_interval,
        config.snapshot_keep,
    );

    let server_for_run = Arc::clone(&server);
    let server_task = tokio::spawn(async move {
        if let Err(err) = server_for_run.run().await {
            tracing::error!(error = %err, "server exited with error");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    server.stop();
    snapshot_task.abort();
    if let Err(err) = server_task.await {
        if err.is_panic() {
            tracing::error!("server task panicked during shutdown");
        }
    }
    keyspace.stop_expiry_sweeper();

    take_snapshot(&keyspace, &snapshot_store, config.snapshot_keep);

    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn restore_from_snapshot(keyspace: &Arc<Keyspace>, store: &SnapshotStore) {
    match store.load_latest() {
        Ok(Some(entries)) => {
            let count = entries.len();
            for entry in entries {
                let _ = keyspace.set(entry.key, entry.value, entry.ttl_remaining);
            }
            tracing::info!(count, "restored keys from snapshot");
        }
        Ok(None) => tracing::info!("no snapshot found, starting with an empty keyspace"),
        Err(err) => tracing::warn!(error = %err, "failed to load snapshot, starting empty"),
    }
}

fn spawn_snapshot_task(
    keyspace: Arc<Keyspace>,
    store: Arc<SnapshotStore>,
    interval: std::time::Duration,
    keep: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            take_snapshot(&keyspace, &store, keep);
        }
    })
}

fn take_snapshot(keyspace: &Keyspace, store: &SnapshotStore, keep: usize) {
    let entries: Vec<SnapshotEntry> = keyspace
        .keys(b"*")
        .into_iter()
        .filter_map(|key| {
            let value = keyspace.get(&key)?;
            let ttl_remaining = match keyspace.ttl(&key) {
                cacheforge_core::TtlStatus::Remaining(d) => Some(d),
                _ => None,
            };
            Some(SnapshotEntry { key, value, ttl_remaining })
        })
        .collect();

    match store.save(&entries, std::time::SystemTime::now()) {
        Ok(path) => {
            tracing::info!(path = %path.display(), count = entries.len(), "snapshot written");
            if let Err(err) = store.prune(keep) {
                tracing::warn!(error = %err, "snapshot prune failed");
            }
        }
        Err(err) => tracing::error!(error = %err, "snapshot write failed"),
    }
}
