//! # Keyspace
//!
//! The coordinator that makes `HashTable`, `EvictionTracker`, and
//! `ExpiryTracker` behave as one atomic unit per key, per the concurrency
//! model: a reader observing a key change also observes the matching
//! eviction/byte-accounting change in the same step.
//!
//! Sharded exactly like `hkv-engine::memory::MemoryEngine`: each shard is
//! one `parking_lot::RwLock` guarding both the map and the LRU arena
//! together (`ShardState` below plays the role of the teacher's
//! `ShardInner`). That single lock per shard is what rules out the
//! two-mutex-opposite-order deadlock documented against
//! `cacheforge/src/storage/hashtable.cpp` — `HashTable` and
//! `EvictionTracker` are two separate types for testability (matching the
//! component design), but in production they are never locked separately
//! for the same key.
//!
//! TTL state lives in its own `ExpiryTracker` with its own lock, per the
//! concurrency model's explicit statement that the replication queue and
//! the TTL sweeper are independent of the keyspace lock.

use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::RandomState;
use parking_lot::RwLock;

use cacheforge_common::{glob::glob_match, CacheError, CacheResult, Value};

use crate::eviction::EvictionTracker;
use crate::expiry::{ExpiryTracker, TtlStatus};
use crate::hashtable::HashTableShard;

const DEFAULT_SHARD_MULTIPLIER: usize = 4;

struct ShardState {
    table: HashTableShard,
    eviction: EvictionTracker,
}

/// Configuration knobs for eviction. Entry/byte limits are independent:
/// hitting either one triggers eviction on the same `set` call that
/// breached it (no deferred background eviction).
#[derive(Debug, Clone, Copy)]
pub struct KeyspaceLimits {
    pub max_entries: Option<usize>,
    pub max_bytes: Option<usize>,
}

impl Default for KeyspaceLimits {
    fn default() -> Self {
        KeyspaceLimits {
            max_entries: None,
            max_bytes: None,
        }
    }
}

pub struct Keyspace {
    shards: Vec<RwLock<ShardState>>,
    shard_mask: usize,
    hash_state: RandomState,
    limits: KeyspaceLimits,
    used_bytes: AtomicUsize,
    len: AtomicUsize,
    eviction_cursor: AtomicUsize,
    expiry: Arc<ExpiryTracker>,
}

impl Keyspace {
    pub fn new(limits: KeyspaceLimits) -> Arc<Self> {
        let threads = std::thread::available_parallelism()
            .map(|c| c.get())
            .unwrap_or(1);
        Self::with_shard_count(threads.saturating_mul(DEFAULT_SHARD_MULTIPLIER), limits)
    }

    pub fn with_shard_count(shards: usize, limits: KeyspaceLimits) -> Arc<Self> {
        let shard_count = shards.max(1).next_power_of_two();
        let hash_state = RandomState::new();
        let mut shard_vec = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shard_vec.push(RwLock::new(ShardState {
                table: HashTableShard::default(),
                eviction: EvictionTracker::new(),
            }));
        }

        Arc::new(Keyspace {
            shards: shard_vec,
            shard_mask: shard_count - 1,
            hash_state,
            limits,
            used_bytes: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            eviction_cursor: AtomicUsize::new(0),
            expiry: ExpiryTracker::new(),
        })
    }

    /// Starts the background expiry sweeper. The callback removes each
    /// swept key from the hash table and eviction tracker via a `Weak`
    /// handle — if the keyspace has already been torn down, the sweep
    /// thread simply stops doing anything rather than keeping it alive.
    pub fn start_expiry_sweeper(self: &Arc<Self>) {
        let weak: Weak<Keyspace> = Arc::downgrade(self);
        self.expiry.start(move |key| {
            if let Some(keyspace) = weak.upgrade() {
                keyspace.remove_no_expiry_touch(key);
            }
        });
    }

    pub fn stop_expiry_sweeper(&self) {
        self.expiry.stop();
    }

    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key);
        (hasher.finish() as usize) & self.shard_mask
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Relaxed)
    }

    /// Inserts or replaces a value, clearing any previous TTL and attaching
    /// `ttl` if given. Returns whether the key was newly created.
    pub fn set(&self, key: Vec<u8>, value: Value, ttl: Option<Duration>) -> CacheResult<bool> {
        if key.len() > cacheforge_common::MAX_KEY_LEN {
            return Err(CacheError::KeyTooLarge);
        }
        if value.memory_size() > cacheforge_common::MAX_VALUE_LEN {
            return Err(CacheError::ValueTooLarge);
        }

        let key: Arc<[u8]> = Arc::from(key);
        let idx = self.shard_index(&key);
        let new_size = key.len() + value.memory_size();

        let was_new = {
            let mut shard = self.shards[idx].write();
            let was_new = match shard.table.set(Arc::clone(&key), value) {
                Some(old) => {
                    let old_size = key.len() + old.memory_size();
                    shard.eviction.record_resize(&key, new_size);
                    if new_size >= old_size {
                        self.used_bytes.fetch_add(new_size - old_size, Ordering::Relaxed);
                    } else {
                        self.used_bytes.fetch_sub(old_size - new_size, Ordering::Relaxed);
                    }
                    false
                }
                None => {
                    shard.eviction.record_insert(Arc::clone(&key), new_size);
                    self.used_bytes.fetch_add(new_size, Ordering::Relaxed);
                    true
                }
            };
            if was_new {
                self.len.fetch_add(1, Ordering::Release);
            }
            drop(shard);
            was_new
        };

        self.expiry.remove_expiry(&key);
        if let Some(ttl) = ttl {
            self.expiry.set_expiry(key.to_vec(), ttl);
        }

        self.evict_if_needed();
        Ok(was_new)
    }

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        if self.expiry.is_expired(key) {
            self.remove_no_expiry_touch(key);
            return None;
        }

        let idx = self.shard_index(key);
        let mut shard = self.shards[idx].write();
        let value = shard.table.get(key).cloned();
        if value.is_some() {
            shard.eviction.record_access(key);
        }
        value
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        if self.expiry.is_expired(key) {
            self.remove_no_expiry_touch(key);
            return false;
        }
        let idx = self.shard_index(key);
        self.shards[idx].read().table.contains(key)
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        self.expiry.remove_expiry(key);
        self.remove_no_expiry_touch(key)
    }

    /// Removes a key from the table and eviction tracker without touching
    /// the expiry tracker (the caller has either already cleared it or is
    /// the expiry sweeper itself, which owns the deadline being acted on).
    fn remove_no_expiry_touch(&self, key: &[u8]) -> bool {
        let idx = self.shard_index(key);
        let mut shard = self.shards[idx].write();
        match shard.table.remove(key) {
            Some(value) => {
                let size = key.len() + value.memory_size();
                shard.eviction.record_remove(key);
                self.used_bytes.fetch_sub(size, Ordering::Relaxed);
                self.len.fetch_sub(1, Ordering::Release);
                drop(shard);
                true
            }
            None => false,
        }
    }

    /// Attaches a TTL to an existing key. Returns `CacheError::NotFound`
    /// for a missing or already-expired key.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> CacheResult<()> {
        if !self.contains(key) {
            return Err(CacheError::NotFound);
        }
        self.expiry.set_expiry(key.to_vec(), ttl);
        Ok(())
    }

    pub fn ttl(&self, key: &[u8]) -> TtlStatus {
        let present = self.contains(key);
        self.expiry.get_ttl(key, present)
    }

    /// Returns every live (non-expired) key matching the glob `pattern`.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Vec<u8>> {
        let mut matched = Vec::new();
        for shard in &self.shards {
            let inner = shard.read();
            for key in inner.table.keys() {
                if glob_match(pattern, key) && !self.expiry.is_expired(key) {
                    matched.push(key.to_vec());
                }
            }
        }
        matched
    }

    fn should_evict(&self) -> bool {
        if let Some(max_bytes) = self.limits.max_bytes {
            if self.used_bytes.load(Ordering::Relaxed) > max_bytes {
                return true;
            }
        }
        if let Some(max_entries) = self.limits.max_entries {
            if self.len() > max_entries {
                return true;
            }
        }
        false
    }

    /// Evicts LRU entries, round-robining across shards, until within
    /// budget or nothing is left to evict.
    fn evict_if_needed(&self) {
        while self.should_evict() {
            let start = self.eviction_cursor.fetch_add(1, Ordering::Relaxed);
            let mut evicted = false;

            for offset in 0..self.shards.len() {
                let idx = (start + offset) & self.shard_mask;
                if self.evict_one_from_shard(idx).is_some() {
                    evicted = true;
                    break;
                }
            }

            if !evicted {
                break;
            }
        }
    }

    fn evict_one_from_shard(&self, idx: usize) -> Option<Vec<u8>> {
        let mut shard = self.shards[idx].write();
        let key = shard.eviction.evict_one()?;
        let value = shard.table.remove(&key);

        if let Some(value) = value {
            let size = key.len() + value.memory_size();
            self.used_bytes.fetch_sub(size, Ordering::Relaxed);
        }
        self.len.fetch_sub(1, Ordering::Release);
        drop(shard);

        self.expiry.remove_expiry(&key);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let ks = Keyspace::with_shard_count(4, KeyspaceLimits::default());
        ks.set(b"a".to_vec(), Value::Str("v".to_string()), None).unwrap();
        assert_eq!(ks.get(b"a"), Some(Value::Str("v".to_string())));
    }

    #[test]
    fn delete_removes_key_and_updates_len() {
        let ks = Keyspace::with_shard_count(4, KeyspaceLimits::default());
        ks.set(b"a".to_vec(), Value::Int(1), None).unwrap();
        assert_eq!(ks.len(), 1);
        assert!(ks.delete(b"a"));
        assert_eq!(ks.len(), 0);
        assert!(!ks.delete(b"a"));
    }

    #[test]
    fn set_with_ttl_then_expire_hides_value() {
        let ks = Keyspace::with_shard_count(4, KeyspaceLimits::default());
        ks.set(b"a".to_vec(), Value::Int(1), Some(Duration::from_millis(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(ks.get(b"a"), None);
    }

    #[test]
    fn expire_command_requires_existing_key() {
        let ks = Keyspace::with_shard_count(4, KeyspaceLimits::default());
        assert_eq!(ks.expire(b"missing", Duration::from_secs(1)), Err(CacheError::NotFound));
        ks.set(b"a".to_vec(), Value::Int(1), None).unwrap();
        assert!(ks.expire(b"a", Duration::from_secs(60)).is_ok());
        assert!(matches!(ks.ttl(b"a"), TtlStatus::Remaining(_)));
    }

    #[test]
    fn set_overwriting_clears_previous_ttl() {
        let ks = Keyspace::with_shard_count(4, KeyspaceLimits::default());
        ks.set(b"a".to_vec(), Value::Int(1), Some(Duration::from_secs(60)))
            .unwrap();
        ks.set(b"a".to_vec(), Value::Int(2), None).unwrap();
        assert_eq!(ks.ttl(b"a"), TtlStatus::NoTtl);
    }

    #[test]
    fn eviction_triggers_on_entry_limit() {
        let ks = Keyspace::with_shard_count(
            1,
            KeyspaceLimits {
                max_entries: Some(2),
                max_bytes: None,
            },
        );
        ks.set(b"a".to_vec(), Value::Int(1), None).unwrap();
        ks.set(b"b".to_vec(), Value::Int(2), None).unwrap();
        ks.get(b"a");
        ks.set(b"c".to_vec(), Value::Int(3), None).unwrap();

        assert!(ks.get(b"b").is_none());
        assert!(ks.get(b"a").is_some());
        assert!(ks.get(b"c").is_some());
        assert_eq!(ks.len(), 2);
    }

    #[test]
    fn keys_excludes_expired_entries() {
        let ks = Keyspace::with_shard_count(4, KeyspaceLimits::default());
        ks.set(b"user:1".to_vec(), Value::Int(1), None).unwrap();
        ks.set(b"user:2".to_vec(), Value::Int(2), Some(Duration::from_millis(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));

        let matched = ks.keys(b"user:*");
        assert_eq!(matched, vec![b"user:1".to_vec()]);
    }

    #[test]
    fn oversized_key_is_rejected() {
        let ks = Keyspace::with_shard_count(2, KeyspaceLimits::default());
        let huge_key = vec![0u8; cacheforge_common::MAX_KEY_LEN + 1];
        assert_eq!(
            ks.set(huge_key, Value::Int(1), None),
            Err(CacheError::KeyTooLarge)
        );
    }

    #[test]
    fn sweeper_removes_expired_key_from_table() {
        let ks = Keyspace::with_shard_count(4, KeyspaceLimits::default());
        ks.start_expiry_sweeper();
        ks.set(b"a".to_vec(), Value::Int(1), Some(Duration::from_millis(1)))
            .unwrap();

        let mut tries = 0;
        while ks.contains(b"a") && tries < 100 {
            std::thread::sleep(Duration::from_millis(20));
            tries += 1;
        }
        assert!(!ks.contains(b"a"));
        ks.stop_expiry_sweeper();
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Set(u8, i64),
        Delete(u8),
        Get(u8),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<u8>(), any::<i64>()).prop_map(|(k, v)| Op::Set(k, v)),
            any::<u8>().prop_map(Op::Delete),
            any::<u8>().prop_map(Op::Get),
        ]
    }

    fn key_bytes(k: u8) -> Vec<u8> {
        vec![k]
    }

    proptest! {
        /// A `Keyspace` mirrored against a plain `HashMap` oracle must agree
        /// on `get`/`len` after any sequence of set/delete/get operations,
        /// as long as no eviction limit is configured (eviction is allowed
        /// to diverge from the oracle by design).
        #[test]
        fn matches_hashmap_oracle_under_arbitrary_ops(ops in prop::collection::vec(arb_op(), 0..200)) {
            let ks = Keyspace::with_shard_count(4, KeyspaceLimits::default());
            let mut oracle: std::collections::HashMap<u8, i64> = std::collections::HashMap::new();

            for op in ops {
                match op {
                    Op::Set(k, v) => {
                        ks.set(key_bytes(k), Value::Int(v), None).unwrap();
                        oracle.insert(k, v);
                    }
                    Op::Delete(k) => {
                        let removed = ks.delete(&key_bytes(k));
                        prop_assert_eq!(removed, oracle.remove(&k).is_some());
                    }
                    Op::Get(k) => {
                        let expected = oracle.get(&k).map(|v| Value::Int(*v));
                        prop_assert_eq!(ks.get(&key_bytes(k)), expected);
                    }
                }
            }

            prop_assert_eq!(ks.len(), oracle.len());
        }

        /// `keys()` never returns a key that doesn't glob-match the pattern,
        /// and never returns one that was deleted.
        #[test]
        fn keys_only_returns_live_matches(
            prefixes in prop::collection::vec(0u8..4, 0..20),
            suffixes in prop::collection::vec(0u8..4, 0..20),
        ) {
            let ks = Keyspace::with_shard_count(4, KeyspaceLimits::default());
            let mut inserted = std::collections::HashSet::new();

            for (&prefix, &suffix) in prefixes.iter().zip(suffixes.iter()) {
                let key = format!("p{prefix}:{suffix}").into_bytes();
                ks.set(key.clone(), Value::Int(0), None).unwrap();
                inserted.insert(key);
            }

            for prefix in 0u8..4 {
                let pattern = format!("p{prefix}:*").into_bytes();
                let matched = ks.keys(&pattern);
                let expected_prefix = format!("p{}:", prefix).into_bytes();
                for key in &matched {
                    prop_assert!(inserted.contains(key));
                    prop_assert!(key.starts_with(&expected_prefix[..]));
                }
            }
        }
    }
}
