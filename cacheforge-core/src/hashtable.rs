//! # HashTable
//!
//! Sharded key/value store. Grounded on `hkv-engine::memory::{MemoryEngine,
//! Shard}` for the sharding/locking discipline: one `parking_lot::RwLock`
//! per shard, shard selection by hashing the key with the same `ahash`
//! seed the shard's own map uses.
//!
//! Single-lock-per-shard is the structural fix for the two-mutex bug in
//! `cacheforge/src/storage/hashtable.cpp`, where `set` and `remove` lock
//! `mutex_a_`/`mutex_b_` in different orders and two threads calling them
//! concurrently on different keys can deadlock. There is exactly one lock
//! in the path for any key here, so no ordering question can arise.

use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;

use cacheforge_common::Value;

const DEFAULT_SHARD_MULTIPLIER: usize = 4;

/// Unlocked per-shard map. Exposed so `Keyspace` can embed it directly under
/// its own composite per-shard lock rather than locking twice per operation.
#[derive(Debug, Default)]
pub struct HashTableShard {
    map: HashMap<Arc<[u8]>, Value, RandomState>,
}

impl HashTableShard {
    fn with_hasher(hash_state: RandomState) -> Self {
        HashTableShard {
            map: HashMap::with_hasher(hash_state),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Inserts or replaces. Returns the previous value, if any, and whether
    /// the key was previously absent.
    pub fn set(&mut self, key: Arc<[u8]>, value: Value) -> Option<Value> {
        self.map.insert(key, value)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &Arc<[u8]>> {
        self.map.keys()
    }
}

struct Shard {
    inner: RwLock<HashTableShard>,
}

/// Standalone sharded key/value table (no TTL, no LRU — those are separate
/// components per the component design). Useful directly in tests and by
/// any caller that only needs plain storage semantics.
pub struct HashTable {
    shards: Vec<Shard>,
    shard_mask: usize,
    hash_state: RandomState,
    len: AtomicUsize,
}

impl HashTable {
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|c| c.get())
            .unwrap_or(1);
        Self::with_shard_count(threads.saturating_mul(DEFAULT_SHARD_MULTIPLIER))
    }

    pub fn with_shard_count(shards: usize) -> Self {
        let shard_count = shards.max(1).next_power_of_two();
        let hash_state = RandomState::new();
        let mut shard_vec = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shard_vec.push(Shard {
                inner: RwLock::new(HashTableShard::with_hasher(hash_state.clone())),
            });
        }

        HashTable {
            shards: shard_vec,
            shard_mask: shard_count - 1,
            hash_state,
            len: AtomicUsize::new(0),
        }
    }

    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key);
        (hasher.finish() as usize) & self.shard_mask
    }

    fn shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.shard(key).inner.read().get(key).cloned()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.shard(key).inner.read().contains(key)
    }

    /// Returns `true` if this inserted a new key (as opposed to replacing).
    pub fn set(&self, key: Vec<u8>, value: Value) -> bool {
        let key: Arc<[u8]> = Arc::from(key);
        let mut shard = self.shard(&key).inner.write();
        let was_new = shard.set(Arc::clone(&key), value).is_none();
        if was_new {
            self.len.fetch_add(1, Ordering::Release);
        }
        drop(shard);
        was_new
    }

    pub fn remove(&self, key: &[u8]) -> bool {
        let mut shard = self.shard(key).inner.write();
        let removed = shard.remove(key).is_some();
        if removed {
            self.len.fetch_sub(1, Ordering::Release);
        }
        drop(shard);
        removed
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.inner.write().clear();
        }
        self.len.store(0, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every key matching `pattern` under the `*`/`?` glob grammar.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Vec<u8>> {
        let mut matched = Vec::new();
        for shard in &self.shards {
            let inner = shard.inner.read();
            for key in inner.keys() {
                if cacheforge_common::glob::glob_match(pattern, key) {
                    matched.push(key.to_vec());
                }
            }
        }
        matched
    }
}

impl Default for HashTable {
    fn default() -> Self {
        Self::new()
    }
}
