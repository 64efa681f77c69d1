//! Durable key-value storage primitive backing the offline data mirror.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Trait for key-value storage backends.
///
/// Values survive process restarts (for the durable implementations) and
/// are scoped to the store's database file.
pub trait KvStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>>;
  fn set(&self, key: &str, value: &str) -> Result<()>;
  fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory implementation for tests.
#[derive(Default)]
pub struct MemoryKv {
  map: Mutex<BTreeMap<String, String>>,
}

impl MemoryKv {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryKv {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let map = self.map.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(map.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let mut map = self.map.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    map.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut map = self.map.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    map.remove(key);
    Ok(())
  }
}

/// SQLite-based key-value store.
pub struct SqliteKv {
  conn: Mutex<Connection>,
}

impl SqliteKv {
  /// Open the store at the given path, creating parent directories.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open storage database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory database, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory storage: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run storage migrations: {}", e))?;

    Ok(())
  }
}

const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl KvStore for SqliteKv {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read key {}: {}", key, e))
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write key {}: {}", key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove key {}: {}", key, e))?;

    Ok(())
  }
}
