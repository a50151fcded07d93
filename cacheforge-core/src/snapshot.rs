//! # SnapshotStore
//!
//! On-disk persistence: one file per snapshot, named by its creation epoch
//! second, directory-scanned by mtime to find the latest. Grounded on
//! `cacheforge/src/persistence/snapshot.{h,cpp}` for the record format and
//! directory layout, with two fixes:
//!
//! - `save` writes to a temp file, `fsync`s it, then renames it into place.
//!   The original's `SnapshotWriter` opens the target file directly with a
//!   raw `new std::ofstream` and leaks it if an exception unwinds mid-write
//!   — a crash or a later `std::bad_alloc` during serialization leaves a
//!   half-written file where a reader expects a complete one. An owned
//!   `File` here is closed on every exit path including an early `?`, and a
//!   reader never sees a partial file because the rename only happens after
//!   the full write and fsync succeed.
//! - `load_latest` on a mid-file decode failure returns `Err` and discards
//!   whatever was decoded so far, rather than returning a truncated `Vec`
//!   that looks like a complete (if small) snapshot.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cacheforge_common::Value;

/// One entry as read from or written to a snapshot file.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub key: Vec<u8>,
    pub value: Value,
    /// `None` means no TTL. `Some(Duration::ZERO)` is never written to disk
    /// (an already-expired entry is dropped before it gets here).
    pub ttl_remaining: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt snapshot record")]
    Corrupt,
}

type Result<T> = std::result::Result<T, SnapshotError>;

/// Directory-backed snapshot store.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Opens (creating if necessary) a snapshot directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(SnapshotStore { dir })
    }

    fn path_for(&self, epoch_secs: u64) -> PathBuf {
        self.dir.join(format!("snapshot_{epoch_secs}.rdb"))
    }

    /// Writes a full snapshot atomically: write to a temp file, `fsync`,
    /// then rename into the final path. `now` is supplied by the caller
    /// (rather than read via `SystemTime::now()` here) so tests can pin the
    /// resulting filename.
    pub fn save(&self, entries: &[SnapshotEntry], now: SystemTime) -> Result<PathBuf> {
        let epoch_secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        let final_path = self.path_for(epoch_secs);
        let tmp_path = self.dir.join(format!(".snapshot_{epoch_secs}.tmp"));

        let mut file = File::create(&tmp_path)?;
        for entry in entries {
            write_entry(&mut file, entry)?;
        }
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &final_path)?;
        Ok(final_path)
    }

    /// Loads the most recently created snapshot file, if any.
    ///
    /// A decode failure partway through discards everything decoded so far
    /// and returns `Err` — never a truncated `Vec` masquerading as complete.
    pub fn load_latest(&self) -> Result<Option<Vec<SnapshotEntry>>> {
        let latest = self.latest_path()?;
        match latest {
            Some(path) => Ok(Some(load_file(&path)?)),
            None => Ok(None),
        }
    }

    fn latest_path(&self) -> Result<Option<PathBuf>> {
        let mut best: Option<(SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !is_snapshot_file(&path) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if best.as_ref().map(|(m, _)| modified > *m).unwrap_or(true) {
                best = Some((modified, path));
            }
        }
        Ok(best.map(|(_, path)| path))
    }

    /// Number of snapshot files currently on disk.
    pub fn list_count(&self) -> Result<usize> {
        Ok(self.list_sorted_by_mtime()?.len())
    }

    /// Deletes all but the `keep_n` most recently modified snapshot files.
    pub fn prune(&self, keep_n: usize) -> Result<()> {
        let mut files = self.list_sorted_by_mtime()?;
        // Newest first; keep the front, delete the rest.
        files.reverse();
        for (_, path) in files.into_iter().skip(keep_n) {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn list_sorted_by_mtime(&self) -> Result<Vec<(SystemTime, PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !is_snapshot_file(&path) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            files.push((modified, path));
        }
        files.sort_by_key(|(modified, _)| *modified);
        Ok(files)
    }
}

fn is_snapshot_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with("snapshot_") && name.ends_with(".rdb"))
        .unwrap_or(false)
}

fn load_file(path: &Path) -> Result<Vec<SnapshotEntry>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset < buf.len() {
        let (entry, consumed) = decode_entry(&buf[offset..])?;
        if let Some(entry) = entry {
            entries.push(entry);
        }
        offset += consumed;
    }
    Ok(entries)
}

/// Record layout (all integers little-endian):
/// `key_len:u64, key, type:i32, value_len:u64, value, ttl_remaining:i64`.
///
/// `ttl_remaining == -1` means no TTL, `== 0` means already-expired (dropped
/// on load, not revived), a positive value is seconds remaining.
///
/// The original only ever serializes the string variant; this codec encodes
/// all four `Value` variants uniformly so every value `SET` can produce
/// round-trips, not just strings.
fn write_entry(out: &mut impl Write, entry: &SnapshotEntry) -> Result<()> {
    out.write_all(&(entry.key.len() as u64).to_le_bytes())?;
    out.write_all(&entry.key)?;
    out.write_all(&entry.value.type_tag().to_le_bytes())?;

    let payload = encode_value_payload(&entry.value);
    out.write_all(&(payload.len() as u64).to_le_bytes())?;
    out.write_all(&payload)?;

    let ttl_field: i64 = match entry.ttl_remaining {
        None => -1,
        Some(d) => d.as_secs() as i64,
    };
    out.write_all(&ttl_field.to_le_bytes())?;
    Ok(())
}

fn encode_value_payload(value: &Value) -> Vec<u8> {
    match value {
        Value::Str(s) => s.as_bytes().to_vec(),
        Value::Binary(bytes) => bytes.clone(),
        Value::Int(n) => n.to_le_bytes().to_vec(),
        Value::List(items) => {
            let mut buf = Vec::new();
            for item in items {
                buf.extend_from_slice(&(item.len() as u64).to_le_bytes());
                buf.extend_from_slice(item.as_bytes());
            }
            buf
        }
    }
}

fn decode_value_payload(type_tag: i32, payload: &[u8]) -> Result<Value> {
    match type_tag {
        0 => String::from_utf8(payload.to_vec())
            .map(Value::Str)
            .map_err(|_| SnapshotError::Corrupt),
        1 => {
            if payload.len() != 8 {
                return Err(SnapshotError::Corrupt);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(payload);
            Ok(Value::Int(i64::from_le_bytes(raw)))
        }
        2 => {
            let mut items = Vec::new();
            let mut offset = 0usize;
            while offset < payload.len() {
                if offset + 8 > payload.len() {
                    return Err(SnapshotError::Corrupt);
                }
                let mut len_bytes = [0u8; 8];
                len_bytes.copy_from_slice(&payload[offset..offset + 8]);
                let len = u64::from_le_bytes(len_bytes) as usize;
                offset += 8;
                if offset + len > payload.len() {
                    return Err(SnapshotError::Corrupt);
                }
                let item = String::from_utf8(payload[offset..offset + len].to_vec())
                    .map_err(|_| SnapshotError::Corrupt)?;
                items.push(item);
                offset += len;
            }
            Ok(Value::List(items))
        }
        3 => Ok(Value::Binary(payload.to_vec())),
        _ => Err(SnapshotError::Corrupt),
    }
}

/// Decodes one record from `data`, returning `(entry, bytes_consumed)`.
/// `entry` is `None` when the record was already expired and is dropped
/// rather than revived — the consumed byte count is still correct so the
/// caller can keep walking the file.
fn decode_entry(data: &[u8]) -> Result<(Option<SnapshotEntry>, usize)> {
    let mut offset = 0usize;

    let key_len = read_u64(data, &mut offset)?;
    let key = read_bytes(data, &mut offset, key_len)?.to_vec();

    let type_tag = read_i32(data, &mut offset)?;

    let value_len = read_u64(data, &mut offset)?;
    let payload = read_bytes(data, &mut offset, value_len)?;
    let value = decode_value_payload(type_tag, payload)?;

    let ttl_field = read_i64(data, &mut offset)?;

    if ttl_field == 0 {
        return Ok((None, offset));
    }

    let ttl_remaining = if ttl_field < 0 {
        None
    } else {
        Some(Duration::from_secs(ttl_field as u64))
    };

    Ok((
        Some(SnapshotEntry {
            key,
            value,
            ttl_remaining,
        }),
        offset,
    ))
}

fn read_u64(data: &[u8], offset: &mut usize) -> Result<u64> {
    let end = offset.checked_add(8).ok_or(SnapshotError::Corrupt)?;
    let bytes = data.get(*offset..end).ok_or(SnapshotError::Corrupt)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    *offset = end;
    Ok(u64::from_le_bytes(raw))
}

fn read_i64(data: &[u8], offset: &mut usize) -> Result<i64> {
    read_u64(data, offset).map(|v| v as i64)
}

fn read_i32(data: &[u8], offset: &mut usize) -> Result<i32> {
    let end = offset.checked_add(4).ok_or(SnapshotError::Corrupt)?;
    let bytes = data.get(*offset..end).ok_or(SnapshotError::Corrupt)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    *offset = end;
    Ok(i32::from_le_bytes(raw))
}

fn read_bytes<'a>(data: &'a [u8], offset: &mut usize, len: u64) -> Result<&'a [u8]> {
    let len = usize::try_from(len).map_err(|_| SnapshotError::Corrupt)?;
    let end = offset.checked_add(len).ok_or(SnapshotError::Corrupt)?;
    let bytes = data.get(*offset..end).ok_or(SnapshotError::Corrupt)?;
    *offset = end;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: Value, ttl: Option<Duration>) -> SnapshotEntry {
        SnapshotEntry {
            key: key.as_bytes().to_vec(),
            value,
            ttl_remaining: ttl,
        }
    }

    #[test]
    fn save_and_load_roundtrips_all_variants() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let entries = vec![
            entry("str", Value::Str("hello".to_string()), None),
            entry("int", Value::Int(-42), Some(Duration::from_secs(30))),
            entry(
                "list",
                Value::List(vec!["a".to_string(), "b".to_string()]),
                None,
            ),
            entry("bin", Value::Binary(vec![0, 1, 2, 255]), None),
        ];

        store.save(&entries, SystemTime::now()).unwrap();
        let loaded = store.load_latest().unwrap().unwrap();
        assert_eq!(loaded, entries);
    }

    #[test]
    fn expired_entries_are_dropped_not_revived() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let mut file = File::create(store.path_for(1)).unwrap();
        write_entry(
            &mut file,
            &SnapshotEntry {
                key: b"gone".to_vec(),
                value: Value::Int(1),
                ttl_remaining: Some(Duration::ZERO),
            },
        )
        .unwrap();
        drop(file);

        let loaded = store.load_latest().unwrap().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn load_latest_picks_the_newest_file_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        store
            .save(&[entry("old", Value::Int(1), None)], UNIX_EPOCH + Duration::from_secs(100))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store
            .save(&[entry("new", Value::Int(2), None)], UNIX_EPOCH + Duration::from_secs(200))
            .unwrap();

        let loaded = store.load_latest().unwrap().unwrap();
        assert_eq!(loaded, vec![entry("new", Value::Int(2), None)]);
    }

    #[test]
    fn prune_keeps_only_the_newest_n() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        for i in 0..5u64 {
            store
                .save(&[entry("k", Value::Int(i as i64), None)], UNIX_EPOCH + Duration::from_secs(i))
                .unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }

        store.prune(2).unwrap();
        assert_eq!(store.list_count().unwrap(), 2);
    }

    #[test]
    fn corrupt_file_fails_without_returning_partial_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let mut file = File::create(store.path_for(1)).unwrap();
        write_entry(&mut file, &entry("ok", Value::Int(1), None)).unwrap();
        // Truncate the type tag declares more bytes than actually follow.
        file.write_all(&999u64.to_le_bytes()).unwrap();
        file.write_all(&0i32.to_le_bytes()).unwrap();
        file.write_all(&4u64.to_le_bytes()).unwrap();
        file.write_all(b"ab").unwrap();
        drop(file);

        assert!(matches!(store.load_latest(), Err(SnapshotError::Corrupt)));
    }
}
