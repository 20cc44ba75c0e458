//! Local persisted cache backends.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use super::types::LocallyStoredItem;
use crate::error::{ApiError, Result};

/// Storage that outlives the process, keyed by `{store}_{user}_{...}`.
pub trait LocalCache: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<LocallyStoredItem>>;

  fn set(&self, key: &str, item: &LocallyStoredItem) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local backend, used for tests and for sessions without a data directory.
#[derive(Default)]
pub struct MemoryLocalCache {
  entries: Mutex<HashMap<String, LocallyStoredItem>>,
}

impl MemoryLocalCache {
  pub fn new() -> Self {
    Self::default()
  }
}

impl LocalCache for MemoryLocalCache {
  fn get(&self, key: &str) -> Result<Option<LocallyStoredItem>> {
    Ok(
      self
        .entries
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .cloned(),
    )
  }

  fn set(&self, key: &str, item: &LocallyStoredItem) -> Result<()> {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key.to_string(), item.clone());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(key);
    Ok(())
  }
}

/// SQLite-backed persisted cache.
pub struct SqliteLocalCache {
  conn: Mutex<Connection>,
}

const LOCAL_CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS local_cache (
    key TEXT PRIMARY KEY,
    item BLOB NOT NULL,
    stored_on TEXT NOT NULL
);
"#;

impl SqliteLocalCache {
  /// Open the cache at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        ApiError::Storage(format!("Failed to create cache directory {}: {}", parent.display(), e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      ApiError::Storage(format!("Failed to open cache database at {}: {}", path.display(), e))
    })?;
    conn.execute_batch(LOCAL_CACHE_SCHEMA)?;

    debug!(path = %path.display(), "opened local cache");
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| ApiError::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("navdata").join("cache.db"))
  }
}

impl LocalCache for SqliteLocalCache {
  fn get(&self, key: &str) -> Result<Option<LocallyStoredItem>> {
    let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT item FROM local_cache WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => match serde_json::from_slice(&data) {
        Ok(item) => Ok(Some(item)),
        Err(e) => {
          // Unreadable entries are treated as misses and overwritten later.
          warn!(key, error = %e, "discarding unreadable cache entry");
          Ok(None)
        }
      },
      None => Ok(None),
    }
  }

  fn set(&self, key: &str, item: &LocallyStoredItem) -> Result<()> {
    let data = serde_json::to_vec(item)?;
    let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
    conn.execute(
      "INSERT OR REPLACE INTO local_cache (key, item, stored_on) VALUES (?, ?, ?)",
      params![key, data, item.meta.stored_on.to_rfc3339()],
    )?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
    conn.execute("DELETE FROM local_cache WHERE key = ?", params![key])?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::types::{LocalMeta, StoreGetReturn};
  use serde_json::json;

  fn item(model: &str) -> LocallyStoredItem {
    LocallyStoredItem::new(
      LocalMeta::stored_now(),
      &StoreGetReturn::new(json!({"id": "1", "model": model})),
    )
  }

  #[test]
  fn test_sqlite_round_trip_and_replace() {
    let dir = tempfile::tempdir().unwrap();
    let cache = SqliteLocalCache::open(&dir.path().join("nested").join("cache.db")).unwrap();

    assert_eq!(cache.get("cars_u1_cars/1").unwrap(), None);

    cache.set("cars_u1_cars/1", &item("suv")).unwrap();
    cache.set("cars_u1_cars/1", &item("sedan")).unwrap();
    let stored = cache.get("cars_u1_cars/1").unwrap().unwrap();
    assert_eq!(stored.data["model"], json!("sedan"));

    cache.remove("cars_u1_cars/1").unwrap();
    assert_eq!(cache.get("cars_u1_cars/1").unwrap(), None);
  }

  #[test]
  fn test_sqlite_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    SqliteLocalCache::open(&path).unwrap().set("k", &item("suv")).unwrap();

    let reopened = SqliteLocalCache::open(&path).unwrap();
    assert!(reopened.get("k").unwrap().is_some());
  }

  #[test]
  fn test_memory_cache() {
    let cache = MemoryLocalCache::new();
    cache.set("k", &item("suv")).unwrap();
    assert!(cache.get("k").unwrap().is_some());
    cache.remove("k").unwrap();
    assert!(cache.get("k").unwrap().is_none());
  }
}
