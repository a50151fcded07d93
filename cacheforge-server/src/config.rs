//! # Config
//!
//! Environment-driven server configuration. Grounded on
//! `cacheforge/src/config/config.{h,cpp}` for the defaults and the bug to
//! avoid: the original's `Config::load` calls `std::stoi` directly on
//! `CACHEFORGE_PORT` and aborts the process on a non-numeric value. Every
//! parse here falls back to its default on failure instead.
//!
//! No process-wide singleton. The original's cross-translation-unit
//! `CONFIG_INSTANCE` has a static-init-order hazard if another static
//! constructor reads it before `main` runs; `Config::from_env` is a plain
//! function returning an owned value, so every consumer just takes a
//! `Config` (or `Arc<Config>`) by value and the question cannot arise.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 6380;
const DEFAULT_MAX_MEMORY: &str = "256m";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_SNAPSHOT_DIR: &str = "/tmp/cacheforge";
const DEFAULT_MAX_CONNECTIONS: usize = 1024;
const DEFAULT_MAX_ENTRIES: usize = 1_000_000;
const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 300;
const DEFAULT_SNAPSHOT_KEEP: usize = 5;
const DEFAULT_REPLICA_PORT: u16 = 0;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub max_memory_bytes: usize,
    pub log_level: String,
    pub snapshot_dir: PathBuf,
    pub max_connections: usize,
    pub max_entries: usize,
    pub snapshot_interval: Duration,
    pub snapshot_keep: usize,
    pub replica_host: Option<String>,
    pub replica_port: u16,
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            bind_address: env_string("CACHEFORGE_BIND", DEFAULT_BIND),
            port: env_parsed("CACHEFORGE_PORT", DEFAULT_PORT),
            max_memory_bytes: env_string("CACHEFORGE_MAX_MEMORY", DEFAULT_MAX_MEMORY)
                .parse_memory_size()
                .unwrap_or_else(|| parse_memory_size(DEFAULT_MAX_MEMORY).unwrap()),
            log_level: env_string("CACHEFORGE_LOG_LEVEL", DEFAULT_LOG_LEVEL),
            snapshot_dir: PathBuf::from(env_string("CACHEFORGE_SNAPSHOT_DIR", DEFAULT_SNAPSHOT_DIR)),
            max_connections: env_parsed("CACHEFORGE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
            max_entries: env_parsed("CACHEFORGE_MAX_ENTRIES", DEFAULT_MAX_ENTRIES),
            snapshot_interval: Duration::from_secs(env_parsed(
                "CACHEFORGE_SNAPSHOT_INTERVAL_SECS",
                DEFAULT_SNAPSHOT_INTERVAL_SECS,
            )),
            snapshot_keep: env_parsed("CACHEFORGE_SNAPSHOT_KEEP", DEFAULT_SNAPSHOT_KEEP),
            replica_host: std::env::var("CACHEFORGE_REPLICA_HOST").ok(),
            replica_port: env_parsed("CACHEFORGE_REPLICA_PORT", DEFAULT_REPLICA_PORT),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

trait MemorySizeExt {
    fn parse_memory_size(&self) -> Option<usize>;
}

impl MemorySizeExt for String {
    fn parse_memory_size(&self) -> Option<usize> {
        parse_memory_size(self)
    }
}

/// Parses a memory size with an optional `k`/`m`/`g` suffix (case-insensitive,
/// base 1024). Returns `None` on any malformed input so the caller can fall
/// back to the default rather than aborting.
fn parse_memory_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (digits, multiplier) = match raw.chars().last()? {
        'k' | 'K' => (&raw[..raw.len() - 1], 1024),
        'm' | 'M' => (&raw[..raw.len() - 1], 1024 * 1024),
        'g' | 'G' => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
        _ => (raw, 1),
    };

    digits.trim().parse::<usize>().ok()?.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_memory_sizes() {
        assert_eq!(parse_memory_size("256m"), Some(256 * 1024 * 1024));
        assert_eq!(parse_memory_size("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_size("512k"), Some(512 * 1024));
        assert_eq!(parse_memory_size("100"), Some(100));
    }

    #[test]
    fn rejects_malformed_memory_sizes() {
        assert_eq!(parse_memory_size("abc"), None);
        assert_eq!(parse_memory_size(""), None);
        assert_eq!(parse_memory_size("m"), None);
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("CACHEFORGE_PORT_TEST_UNSET_MARKER");
        let port: u16 = env_parsed("CACHEFORGE_PORT_TEST_UNSET_MARKER", DEFAULT_PORT);
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn bind_addr_combines_host_and_port() {
        let config = Config {
            bind_address: "127.0.0.1".to_string(),
            port: 9000,
            ..Config::from_env()
        };
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
    }
}
