//! # ProbeTable
//!
//! Open-addressing alternative backend with linear probing and tombstones,
//! grounded on `cacheforge/src/storage/hashtable.cpp`'s `set_with_probe`/
//! `get_with_probe`.
//!
//! The original's `get_with_probe` stops probing the instant it sees a
//! tombstone slot, on the theory that an empty-looking slot means the key
//! isn't there. That is wrong for open addressing: a tombstone only marks
//! "something used to live here", not "the probe sequence ends here" — a
//! key inserted after a since-deleted collision is now unreachable. This
//! table's probe loop treats a tombstone exactly like an occupied slot that
//! doesn't match: keep going until an actually-empty slot or the whole table
//! has been scanned once.
//!
//! Not wired into `Keyspace` by default — `HashTable` (sharded `RwLock`) is
//! the production backend. This exists because the component design
//! specifies its probing semantics explicitly and a correct implementation
//! is part of the contract, independent of which backend a deployment picks.

use cacheforge_common::Value;

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Occupied { key: Vec<u8>, value: Value },
    Deleted,
}

/// Fixed-capacity open-addressing table with tombstone-safe linear probing.
pub struct ProbeTable {
    slots: Vec<Slot>,
    len: usize,
}

impl ProbeTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(4).next_power_of_two();
        ProbeTable {
            slots: (0..capacity).map(|_| Slot::Empty).collect(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn hash(&self, key: &[u8]) -> usize {
        // FNV-1a: simple, dependency-free, good enough distribution for a
        // bounded-capacity probe table used as an alternate backend.
        let mut hash: u64 = 0xcbf29ce484222325;
        for &b in key {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash as usize) & (self.slots.len() - 1)
    }

    /// Inserts or replaces a key. Returns `false` if the table is full and
    /// the key is not already present.
    pub fn set(&mut self, key: Vec<u8>, value: Value) -> bool {
        let mask = self.slots.len() - 1;
        let mut idx = self.hash(&key);
        let mut first_tombstone = None;

        for _ in 0..self.slots.len() {
            match &self.slots[idx] {
                Slot::Empty => {
                    let target = first_tombstone.unwrap_or(idx);
                    self.slots[target] = Slot::Occupied { key, value };
                    self.len += 1;
                    return true;
                }
                Slot::Deleted => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                Slot::Occupied { key: existing, .. } if existing == &key => {
                    self.slots[idx] = Slot::Occupied { key, value };
                    return true;
                }
                Slot::Occupied { .. } => {}
            }
            idx = (idx + 1) & mask;
        }

        false
    }

    /// Looks up a key, continuing past tombstones rather than stopping at
    /// the first one (the bug this table exists to demonstrate the fix for).
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        let mask = self.slots.len() - 1;
        let mut idx = self.hash(key);

        for _ in 0..self.slots.len() {
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Deleted => {
                    idx = (idx + 1) & mask;
                    continue;
                }
                Slot::Occupied { key: existing, value } if existing.as_slice() == key => {
                    return Some(value);
                }
                Slot::Occupied { .. } => {}
            }
            idx = (idx + 1) & mask;
        }

        None
    }

    pub fn remove(&mut self, key: &[u8]) -> bool {
        let mask = self.slots.len() - 1;
        let mut idx = self.hash(key);

        for _ in 0..self.slots.len() {
            match &self.slots[idx] {
                Slot::Empty => return false,
                Slot::Occupied { key: existing, .. } if existing.as_slice() == key => {
                    self.slots[idx] = Slot::Deleted;
                    self.len -= 1;
                    return true;
                }
                _ => {}
            }
            idx = (idx + 1) & mask;
        }

        false
    }
}
