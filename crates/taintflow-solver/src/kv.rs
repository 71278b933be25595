//! Key/value store used by the cross-run exploration filter.
//!
//! The runtime only needs `get` and `set`; what sits behind them is a
//! deployment choice. The on-disk backend lets concurrent fuzzing campaigns
//! against the same target share their explored-branch set across runs;
//! the in-memory backend confines deduplication to the current process.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;

use crate::error::SolveError;

pub trait KvStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Process-local store; state dies with the run.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.map.lock().insert(key.to_string(), value.to_string());
    }
}

/// Durable store shared across runs.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SolveError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.db.get(key) {
            Ok(v) => v.map(|ivec| String::from_utf8_lossy(&ivec).into_owned()),
            Err(err) => {
                tracing::warn!(%err, "kv get failed");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(err) = self.db.insert(key, value) {
            tracing::warn!(%err, "kv set failed");
        }
    }
}

/// Open the configured store; an empty path or an open failure degrades to
/// in-process deduplication.
#[must_use]
pub fn open_store(path: &str) -> Box<dyn KvStore> {
    if path.is_empty() {
        return Box::new(MemoryStore::default());
    }
    match SledStore::open(path) {
        Ok(store) => Box::new(store),
        Err(err) => {
            tracing::warn!(%err, path, "falling back to in-memory exploration store");
            Box::new(MemoryStore::default())
        }
    }
}
