//! Storage engine for the cache server: the sharded hash table, LRU
//! eviction, TTL sweeping, crash-consistent snapshots, and best-effort
//! replication, composed into a single `Keyspace` coordinator.

pub mod eviction;
pub mod expiry;
pub mod hashtable;
pub mod keyspace;
pub mod probe;
pub mod replication;
pub mod snapshot;

pub use eviction::EvictionTracker;
pub use expiry::{ExpiryTracker, TtlStatus};
pub use hashtable::{HashTable, HashTableShard};
pub use keyspace::{Keyspace, KeyspaceLimits};
pub use probe::ProbeTable;
pub use replication::{EventKind, ReplicationEvent, Replicator, REPLICATION_QUEUE_CAP};
pub use snapshot::{SnapshotEntry, SnapshotError, SnapshotStore};
