//! # Replicator
//!
//! Best-effort asynchronous replication to a single downstream peer.
//! Grounded on `cacheforge/src/replication/replicator.{h,cpp}` for the
//! queue-plus-worker shape, with fixes:
//!
//! - the sequence counter is `AtomicU64`, never a signed integer — the
//!   original's `int64_t sequence_counter_` is undefined behavior on
//!   overflow and produces a negative sequence number a downstream
//!   consumer has no sane way to interpret.
//! - `enqueue` records an event's identifying fields in a `tracing::debug!`
//!   call *before* the event is moved into the queue. The original logs
//!   `event.key` in a statement positioned after `std::move(event)` has
//!   already been passed to the queue — whatever value survives is
//!   unspecified. Log first, move second.
//! - the queue is bounded (`REPLICATION_QUEUE_CAP`) and drops the oldest
//!   event on overflow rather than growing without limit, which is what the
//!   original does during a prolonged replica outage.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use cacheforge_common::Value;

/// Maximum queued events before the oldest is dropped to make room.
pub const REPLICATION_QUEUE_CAP: usize = 100_000;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Set,
    Del,
    Expire,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationEvent {
    pub kind: EventKind,
    pub key: Vec<u8>,
    pub value: Option<Value>,
    pub seq: u64,
}

struct QueueState {
    events: VecDeque<ReplicationEvent>,
    dropped: u64,
}

struct Shared {
    queue: Mutex<QueueState>,
    sequence: AtomicU64,
    connected: AtomicBool,
    running: AtomicBool,
}

/// Replication queue and background delivery worker.
pub struct Replicator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Replicator {
    pub fn new() -> Self {
        Replicator {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    events: VecDeque::new(),
                    dropped: 0,
                }),
                sequence: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Assigns the next sequence number and enqueues the event, dropping
    /// the oldest queued event first if the queue is at capacity.
    pub fn enqueue(&self, kind: EventKind, key: Vec<u8>, value: Option<Value>) -> u64 {
        let seq = self.shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        // Log before the move: once `event` is pushed into the queue it may
        // be popped and dropped by the worker thread before this function
        // returns, so any field access has to happen first.
        tracing::debug!(seq, key = %String::from_utf8_lossy(&key), kind = ?kind, "enqueue replication event");

        let event = ReplicationEvent { kind, key, value, seq };

        let mut state = self.shared.queue.lock();
        if state.events.len() >= REPLICATION_QUEUE_CAP {
            state.events.pop_front();
            state.dropped += 1;
        }
        state.events.push_back(event);
        seq
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().events.len()
    }

    pub fn dropped(&self) -> u64 {
        self.shared.queue.lock().dropped
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Removes and returns up to `max` of the oldest queued events.
    pub fn drain_batch(&self, max: usize) -> Vec<ReplicationEvent> {
        let mut state = self.shared.queue.lock();
        let take = max.min(state.events.len());
        state.events.drain(..take).collect()
    }

    /// Starts the background worker that connects to `peer_addr` and
    /// streams queued events. Reconnects with exponential backoff (capped
    /// at `MAX_BACKOFF`) on failure — an improvement on the original's flat
    /// five-second retry, which either hammers a still-down peer or leaves
    /// a momentarily-down one idle for far longer than necessary.
    pub fn start(self: &Arc<Self>, peer_addr: String) {
        self.shared.running.store(true, Ordering::Release);
        let replicator = Arc::clone(self);

        let handle = std::thread::spawn(move || {
            let mut backoff = INITIAL_BACKOFF;
            while replicator.shared.running.load(Ordering::Acquire) {
                match TcpStream::connect(&peer_addr) {
                    Ok(mut stream) => {
                        replicator.shared.connected.store(true, Ordering::Release);
                        backoff = INITIAL_BACKOFF;
                        while replicator.shared.running.load(Ordering::Acquire) {
                            let batch = replicator.drain_batch(256);
                            if batch.is_empty() {
                                std::thread::sleep(Duration::from_millis(20));
                                continue;
                            }
                            if send_batch(&mut stream, &batch).is_err() {
                                break;
                            }
                        }
                        replicator.shared.connected.store(false, Ordering::Release);
                    }
                    Err(_) => {
                        std::thread::sleep(backoff);
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        });

        *self.worker.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for Replicator {
    fn default() -> Self {
        Self::new()
    }
}

fn send_batch(stream: &mut TcpStream, batch: &[ReplicationEvent]) -> std::io::Result<()> {
    use std::io::Write;
    for event in batch {
        let line = format!(
            "{:?} {} {}\n",
            event.kind,
            event.seq,
            String::from_utf8_lossy(&event.key)
        );
        stream.write_all(line.as_bytes())?;
    }
    stream.flush()
}
