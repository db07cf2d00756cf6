use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hasher as _;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use twox_hash::XxHash64;

use crate::error::Error;

/// Stable identity of one file as of one scan: hash of relative path, size,
/// and modification time. A changed file gets a new key, so a stale
/// completion can never mask reprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResumeKey(pub u64);

impl ResumeKey {
    pub fn compute(rel_path: &Path, size: u64, modified: SystemTime) -> Self {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(rel_path.to_string_lossy().as_bytes());
        hasher.write_u64(size);
        let (secs, nanos) = split_system_time(modified);
        hasher.write_i64(secs);
        hasher.write_u32(nanos);
        ResumeKey(hasher.finish())
    }

    fn as_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ResumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Subsecond precision included so rewrites within one second still change
/// the key.
fn split_system_time(t: SystemTime) -> (i64, u32) {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        Err(e) => (-(e.duration().as_secs() as i64), e.duration().subsec_nanos()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Marker {
    Pending,
    Succeeded,
    Failed(String),
}

/// The resumable checkpoint: resume key → completion marker, persisted in
/// RocksDB. An explicit store passed by reference, so concurrent scans in
/// tests never share state.
pub struct ScanStateStore {
    db: DB,
}

impl ScanStateStore {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let mut db_options = Options::default();
        db_options.create_if_missing(true);
        let db = DB::open(&db_options, path)?;
        debug!("Scan state store open at {}", path.display());
        Ok(Self { db })
    }

    pub fn get(&self, key: ResumeKey) -> Result<Option<Marker>, Error> {
        match self.db.get(key.as_bytes())? {
            Some(value) => {
                let marker = bincode::deserialize(&value)
                    .map_err(|e| Error::State(format!("cannot decode marker for {}: {}", key, e)))?;
                Ok(Some(marker))
            }
            None => Ok(None),
        }
    }

    pub fn put(&self, key: ResumeKey, marker: &Marker) -> Result<(), Error> {
        let value = bincode::serialize(marker)
            .map_err(|e| Error::State(format!("cannot encode marker for {}: {}", key, e)))?;
        self.db.put(key.as_bytes(), value)?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize, Error> {
        let mut count = 0usize;
        for item in self.db.iterator(IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn clear_all(&self) -> Result<(), Error> {
        let mut batch = WriteBatch::default();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete(&key);
        }
        self.db.write(batch)?;
        info!("Scan state cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_roundtrip() {
        let tmp = tempdir().unwrap();
        let store = ScanStateStore::open(&tmp.path().join("state")).unwrap();
        let key = ResumeKey::compute(Path::new("a/b.jpg"), 42, UNIX_EPOCH);

        assert_eq!(store.get(key).unwrap(), None);
        store.put(key, &Marker::Pending).unwrap();
        assert_eq!(store.get(key).unwrap(), Some(Marker::Pending));
        store.put(key, &Marker::Succeeded).unwrap();
        assert_eq!(store.get(key).unwrap(), Some(Marker::Succeeded));

        let failed = Marker::Failed("parse error".to_string());
        store.put(key, &failed).unwrap();
        assert_eq!(store.get(key).unwrap(), Some(failed));
    }

    #[test]
    fn test_changed_identity_changes_key() {
        let base = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let key = ResumeKey::compute(Path::new("a/b.jpg"), 42, base);

        let touched = ResumeKey::compute(Path::new("a/b.jpg"), 42, base + Duration::from_nanos(1));
        let grown = ResumeKey::compute(Path::new("a/b.jpg"), 43, base);
        let moved = ResumeKey::compute(Path::new("a/c.jpg"), 42, base);

        assert_ne!(key, touched);
        assert_ne!(key, grown);
        assert_ne!(key, moved);
        assert_eq!(key, ResumeKey::compute(Path::new("a/b.jpg"), 42, base));
    }

    #[test]
    fn test_count_and_clear() {
        let tmp = tempdir().unwrap();
        let store = ScanStateStore::open(&tmp.path().join("state")).unwrap();
        for i in 0..10u64 {
            let key = ResumeKey::compute(Path::new("x"), i, UNIX_EPOCH);
            store.put(key, &Marker::Succeeded).unwrap();
        }
        assert_eq!(store.count().unwrap(), 10);
        store.clear_all().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }
}
