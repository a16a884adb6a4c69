//! File-backed revocation dictionary
//!
//! The one key→record persistence abstraction in the repository: an
//! in-memory `jti → RevocationRecord` map snapshotted to `jwt-store.db`
//! on every applied mutation. The file is a best-effort mirror of the
//! authoritative token store; a corrupt or version-skewed file is
//! discarded with a warning and rebuilt from the stream.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// One row of the revocation mirror
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Token id
    pub jti: String,
    /// Not-before bound, unix seconds or -1
    pub nbf: i64,
    /// Expiry bound, unix seconds or -1
    pub exp: i64,
}

/// Local dictionary of issued-and-still-live tokens
pub struct RevocationStore {
    path: PathBuf,
    records: Mutex<HashMap<String, RevocationRecord>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RevocationStore {
    /// Open the dictionary at `path`, loading any persisted snapshot
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding corrupt revocation snapshot");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "revocation snapshot unreadable");
                HashMap::new()
            }
        };
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    /// Insert or replace a record
    pub fn insert(&self, record: RevocationRecord) {
        let mut records = lock(&self.records);
        records.insert(record.jti.clone(), record);
        self.flush(&records);
    }

    /// Remove a record; returns whether it was present
    pub fn remove(&self, jti: &str) -> bool {
        let mut records = lock(&self.records);
        let removed = records.remove(jti).is_some();
        if removed {
            self.flush(&records);
        }
        removed
    }

    /// Copy of the record for `jti`, if present
    pub fn get(&self, jti: &str) -> Option<RevocationRecord> {
        lock(&self.records).get(jti).cloned()
    }

    /// Number of mirrored records
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    /// Whether the mirror is empty
    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    /// Snapshot the map to disk; failures are logged, the in-memory state
    /// stays authoritative for this process
    fn flush(&self, records: &HashMap<String, RevocationRecord>) {
        if let Err(e) = self.write_snapshot(records) {
            error!(path = %self.path.display(), error = %e, "failed to persist revocation snapshot");
        }
    }

    fn write_snapshot(&self, records: &HashMap<String, RevocationRecord>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let bytes = serde_json::to_vec(records)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
