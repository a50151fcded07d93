//! # Server
//!
//! Owns the listening socket and the connection registry. Grounded on
//! `hkv-server::server` for the accept-loop shape, generalized with a real
//! registry (the teacher spawns each connection with no registry at all),
//! and on `cacheforge/src/server/server.{h,cpp}` for the concurrency bugs to
//! avoid: push-on-accept, remove-on-close, iterate-in-broadcast, and
//! read-in-`connection_count` all share one `parking_lot::Mutex` here,
//! fixing the original's completely unsynchronized
//! `std::vector<std::shared_ptr<Connection>>`. The accepting flag is an
//! `AtomicBool`, not the original's `volatile bool accepting_` — `volatile`
//! affects compiler reordering around optimization, not cross-thread
//! visibility, so it never actually provided the synchronization the name
//! implies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use cacheforge_core::Keyspace;

use crate::connection::{new_connection, next_conn_id, run_connection, Connection, ConnId};
use crate::metrics::Metrics;

pub struct Server {
    bind_addr: String,
    max_connections: usize,
    keyspace: Arc<Keyspace>,
    metrics: Arc<Metrics>,
    registry: Mutex<HashMap<ConnId, Weak<Connection>>>,
    accepting: AtomicBool,
    shutdown: Notify,
}

impl Server {
    pub fn new(bind_addr: String, max_connections: usize, keyspace: Arc<Keyspace>) -> Arc<Self> {
        Arc::new(Server {
            bind_addr,
            max_connections,
            keyspace,
            metrics: Arc::new(Metrics::new()),
            registry: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn is_running(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Sends `bytes` to every currently-registered connection whose `Arc`
    /// has not yet been dropped. Dead entries are pruned in the same pass.
    pub fn broadcast(&self, bytes: Bytes) {
        let mut registry = self.registry.lock();
        registry.retain(|_, weak| match weak.upgrade() {
            Some(connection) => {
                connection.push(bytes.clone());
                true
            }
            None => false,
        });
    }

    /// Stops accepting new connections. `run`'s accept loop is parked inside
    /// `listener.accept().await` far more often than not, so flipping the
    /// `accepting` flag alone would leave it waiting for the next inbound
    /// connection (possibly forever) before it noticed. `notify_waiters`
    /// wakes the `select!` in `run` immediately, which then observes the
    /// flag and returns.
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::Release);
        self.shutdown.notify_waiters();
    }

    /// Binds the listening socket and runs the accept loop until `stop` is
    /// called. Each accepted connection is registered under the registry
    /// lock before its driving task is spawned (spec's push-on-accept
    /// requirement); the spawned task removes its own entry, under the same
    /// lock, once it finishes.
    pub async fn run(self: &Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.accepting.store(true, Ordering::Release);
        info!(addr = %self.bind_addr, "server listening");

        while self.accepting.load(Ordering::Acquire) {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                },
                _ = self.shutdown.notified() => break,
            };

            if !self.accepting.load(Ordering::Acquire) {
                drop(stream);
                break;
            }

            if self.connection_count() >= self.max_connections {
                warn!(peer = %peer_addr, "connection limit reached, refusing");
                drop(stream);
                continue;
            }

            let id = next_conn_id();
            let (connection, write_rx) = new_connection(id, peer_addr);
            self.registry.lock().insert(id, Arc::downgrade(&connection));

            let keyspace = Arc::clone(&self.keyspace);
            let metrics = Arc::clone(&self.metrics);
            let server = Arc::clone(self);

            tokio::spawn(async move {
                run_connection(stream, connection, write_rx, keyspace, metrics).await;
                server.registry.lock().remove(&id);
            });
        }

        Ok(())
    }
}
