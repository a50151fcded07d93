//! # ExpiryTracker
//!
//! Condvar-driven TTL tracking. Grounded on `cacheforge/src/storage/expiry.{h,cpp}`
//! for the background-sweeper shape and on `hkv-engine::memory::{MemoryEngine,
//! ExpirationHandle}` for the Rust thread/stop-flag idiom.
//!
//! Two bugs from the original are fixed here, both called out directly in
//! the component design:
//!
//! - `set_expiry` notifies the condvar *while still holding* the state lock.
//!   The original calls `cv_.notify_one()` after the `lock_guard` has
//!   already gone out of scope; if the sweeper thread is between checking
//!   its wake condition and actually calling `wait()`, the notification is
//!   missed and the sweeper sleeps through the new deadline. Holding the
//!   lock across `notify_one` makes that race impossible since a concurrent
//!   `wait()` either hasn't acquired the lock yet (and will observe the
//!   updated deadline once it does) or has already dropped it onto `wait`
//!   (in which case the notification wakes it immediately).
//! - the TTL passed to `set_expiry` is clamped to `MAX_TTL` before being
//!   added to `Instant::now()`. The original's `set_expiry_seconds`
//!   constructs `std::chrono::seconds(ttl_seconds)` directly from caller
//!   input with no bound, so a sufficiently large value overflows the
//!   resulting time_point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// TTL state for a key, mirroring the `{-2, -1, n}` wire encoding at a
/// higher level of abstraction (the encoding itself lives in the protocol
/// crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Absent,
    NoTtl,
    Remaining(Duration),
}

/// Ten years, expressed in seconds. TTLs longer than this are clamped
/// rather than rejected — a caller asking for "forever, basically" should
/// get the longest TTL the tracker can safely represent, not an error.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Sweep interval for the background thread, matching the original's
/// 100ms polling cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

struct State {
    deadlines: HashMap<Vec<u8>, Instant>,
}

/// Tracks per-key expiration deadlines and runs a background sweeper that
/// evicts expired keys via a caller-supplied callback.
pub struct ExpiryTracker {
    state: Mutex<State>,
    condvar: Condvar,
    running: Arc<AtomicBool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ExpiryTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(ExpiryTracker {
            state: Mutex::new(State {
                deadlines: HashMap::new(),
            }),
            condvar: Condvar::new(),
            running: Arc::new(AtomicBool::new(false)),
            sweeper: Mutex::new(None),
        })
    }

    /// Attaches (or replaces) a TTL for `key`. `ttl` is clamped to
    /// `MAX_TTL`. Notifies the sweeper while still holding the state lock.
    pub fn set_expiry(&self, key: Vec<u8>, ttl: Duration) {
        let ttl = ttl.min(MAX_TTL);
        let deadline = Instant::now() + ttl;
        let mut state = self.state.lock();
        state.deadlines.insert(key, deadline);
        self.condvar.notify_one();
    }

    /// Removes any TTL for `key` (the key itself is untouched).
    pub fn remove_expiry(&self, key: &[u8]) {
        self.state.lock().deadlines.remove(key);
    }

    pub fn is_expired(&self, key: &[u8]) -> bool {
        match self.state.lock().deadlines.get(key) {
            Some(deadline) => Instant::now() >= *deadline,
            None => false,
        }
    }

    pub fn get_ttl(&self, key: &[u8], present: bool) -> TtlStatus {
        if !present {
            return TtlStatus::Absent;
        }
        let state = self.state.lock();
        match state.deadlines.get(key) {
            None => TtlStatus::NoTtl,
            Some(deadline) => {
                let now = Instant::now();
                if *deadline <= now {
                    TtlStatus::Remaining(Duration::ZERO)
                } else {
                    TtlStatus::Remaining(*deadline - now)
                }
            }
        }
    }

    /// Snapshots every key whose deadline has passed and removes them from
    /// the tracker in the same step. Called by the sweeper thread and by
    /// `Keyspace` on the read path for an individual key.
    fn drain_expired(&self, now: Instant) -> Vec<Vec<u8>> {
        let mut state = self.state.lock();
        let expired: Vec<Vec<u8>> = state
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.deadlines.remove(key);
        }
        expired
    }

    /// Starts the background sweeper. `on_expire` is invoked once per
    /// expired key, outside the tracker's own lock, so it is free to take
    /// whatever locks the keyspace needs to actually remove the entry.
    pub fn start(self: &Arc<Self>, on_expire: impl Fn(&[u8]) + Send + 'static) {
        self.running.store(true, Ordering::Release);
        let tracker = Arc::clone(self);
        let running = Arc::clone(&self.running);

        let handle = std::thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                {
                    let mut state = tracker.state.lock();
                    tracker.condvar.wait_for(&mut state, SWEEP_INTERVAL);
                }
                let expired = tracker.drain_expired(Instant::now());
                for key in &expired {
                    on_expire(key);
                }
            }
        });

        *self.sweeper.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.condvar.notify_all();
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_key_reports_absent_regardless_of_ttl_state() {
        let tracker = ExpiryTracker::new();
        assert_eq!(tracker.get_ttl(b"missing", false), TtlStatus::Absent);
    }

    #[test]
    fn present_key_without_ttl_reports_no_ttl() {
        let tracker = ExpiryTracker::new();
        assert_eq!(tracker.get_ttl(b"key", true), TtlStatus::NoTtl);
    }

    #[test]
    fn set_and_check_expiry() {
        let tracker = ExpiryTracker::new();
        tracker.set_expiry(b"key".to_vec(), Duration::from_secs(60));
        assert!(!tracker.is_expired(b"key"));
        match tracker.get_ttl(b"key", true) {
            TtlStatus::Remaining(remaining) => assert!(remaining <= Duration::from_secs(60)),
            other => panic!("expected Remaining, got {other:?}"),
        }
    }

    #[test]
    fn overlong_ttl_is_clamped_not_overflowed() {
        let tracker = ExpiryTracker::new();
        tracker.set_expiry(b"key".to_vec(), Duration::from_secs(u64::MAX / 2));
        match tracker.get_ttl(b"key", true) {
            TtlStatus::Remaining(remaining) => assert!(remaining <= MAX_TTL),
            other => panic!("expected Remaining, got {other:?}"),
        }
    }

    #[test]
    fn sweeper_thread_invokes_callback_on_expiry() {
        use std::sync::mpsc;

        let tracker = ExpiryTracker::new();
        tracker.set_expiry(b"key".to_vec(), Duration::from_millis(1));

        let (tx, rx) = mpsc::channel();
        tracker.start(move |key| {
            let _ = tx.send(key.to_vec());
        });

        let received = rx.recv_timeout(Duration::from_secs(2)).expect("sweeper fired");
        assert_eq!(received, b"key".to_vec());
        tracker.stop();
    }

    #[test]
    fn remove_expiry_clears_the_deadline() {
        let tracker = ExpiryTracker::new();
        tracker.set_expiry(b"key".to_vec(), Duration::from_secs(60));
        tracker.remove_expiry(b"key");
        assert_eq!(tracker.get_ttl(b"key", true), TtlStatus::NoTtl);
    }
}
