//! Key-value accessor
//!
//! The coordinator only persists a handful of small JSON documents, so the
//! store is a plain get/put/delete surface keyed by short ASCII names.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{PersistenceError, PersistenceResult};

/// Durable key-value CRUD surface
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> PersistenceResult<Option<Value>>;

    fn put(&self, key: &str, value: &Value) -> PersistenceResult<()>;

    /// Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> PersistenceResult<()>;
}

fn validate_key(key: &str) -> PersistenceResult<()> {
    let valid = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidKey(key.to_string()))
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Volatile store, used by tests and when no data directory is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent put/delete fail with `Unavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> PersistenceResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable("writes disabled".into()))
        } else {
            Ok(())
        }
    }

    fn entries(&self) -> PersistenceResult<std::sync::MutexGuard<'_, BTreeMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| PersistenceError::Internal("memory store mutex poisoned".into()))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> PersistenceResult<Option<Value>> {
        validate_key(key)?;
        Ok(self.entries()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &Value) -> PersistenceResult<()> {
        validate_key(key)?;
        self.check_writable()?;
        self.entries()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> PersistenceResult<()> {
        validate_key(key)?;
        self.check_writable()?;
        self.entries()?.remove(key);
        Ok(())
    }
}

// =============================================================================
// FILE STORE
// =============================================================================

/// On-disk envelope: the JSON body plus its CRC32
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    checksum: u32,
    body: String,
}

/// One file per key under `<data_dir>/kv`.
///
/// Writes are atomic: temp file, fsync, rename, fsync of the directory.
/// Reads verify the checksum and report corruption instead of guessing.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the store under `data_dir`
    pub fn open(data_dir: &Path) -> PersistenceResult<Self> {
        let dir = data_dir.join("kv");
        fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn temp_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", key))
    }

    fn sync_dir(&self) {
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> PersistenceResult<Option<Value>> {
        validate_key(key)?;
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| PersistenceError::io(&path, e))?;
        let envelope: Envelope = serde_json::from_str(&content)?;

        let computed = checksum(envelope.body.as_bytes());
        if computed != envelope.checksum {
            return Err(PersistenceError::Corrupted {
                key: key.to_string(),
                stored: envelope.checksum,
                computed,
            });
        }

        Ok(Some(serde_json::from_str(&envelope.body)?))
    }

    fn put(&self, key: &str, value: &Value) -> PersistenceResult<()> {
        validate_key(key)?;
        let body = serde_json::to_string(value)?;
        let envelope = Envelope {
            checksum: checksum(body.as_bytes()),
            body,
        };
        let content = serde_json::to_string(&envelope)?;

        let temp_path = self.temp_path_for(key);
        let final_path = self.path_for(key);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| PersistenceError::io(&temp_path, e))?;

        fs::rename(&temp_path, &final_path).map_err(|e| PersistenceError::io(&final_path, e))?;
        self.sync_dir();

        Ok(())
    }

    fn delete(&self, key: &str) -> PersistenceResult<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                self.sync_dir();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(&path, e)),
        }
    }
}
