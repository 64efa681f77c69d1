//! Generation store trait with in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::fetch::Response;

/// A stored response snapshot.
///
/// Entries carry no TTL of their own - recency is generation-scoped. The
/// timestamp is informational and breaks ties when a key exists in more
/// than one generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn from_response(response: &Response) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      cached_at: Utc::now(),
    }
  }

  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
    }
  }
}

/// Trait for generation store backends.
///
/// Writes are last-write-wins per (generation, key); an entry is only ever
/// overwritten wholesale, never merged.
pub trait GenerationStore: Send + Sync {
  /// Open-or-create a named generation.
  fn ensure(&self, generation: &str) -> Result<()>;

  /// Names of all existing generations.
  fn names(&self) -> Result<Vec<String>>;

  /// Delete a whole generation and its entries. Returns whether it existed.
  fn remove(&self, generation: &str) -> Result<bool>;

  /// Store an entry. `url` is a human-readable description kept alongside
  /// the opaque request key.
  fn put(&self, generation: &str, key: &str, url: &str, entry: &CachedResponse) -> Result<()>;

  /// Exact-match lookup within one generation.
  fn get(&self, generation: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Lookup across all generations, newest entry first.
  fn get_any(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// Number of entries in a generation (0 if it does not exist).
  fn len(&self, generation: &str) -> Result<usize>;
}

/// In-memory store for tests and harness runs.
#[derive(Default)]
pub struct MemoryStore {
  generations: Mutex<BTreeMap<String, BTreeMap<String, (String, CachedResponse)>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl GenerationStore for MemoryStore {
  fn ensure(&self, generation: &str) -> Result<()> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    generations.entry(generation.to_string()).or_default();
    Ok(())
  }

  fn names(&self) -> Result<Vec<String>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(generations.keys().cloned().collect())
  }

  fn remove(&self, generation: &str) -> Result<bool> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(generations.remove(generation).is_some())
  }

  fn put(&self, generation: &str, key: &str, url: &str, entry: &CachedResponse) -> Result<()> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    generations
      .entry(generation.to_string())
      .or_default()
      .insert(key.to_string(), (url.to_string(), entry.clone()));
    Ok(())
  }

  fn get(&self, generation: &str, key: &str) -> Result<Option<CachedResponse>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      generations
        .get(generation)
        .and_then(|entries| entries.get(key))
        .map(|(_, entry)| entry.clone()),
    )
  }

  fn get_any(&self, key: &str) -> Result<Option<CachedResponse>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      generations
        .values()
        .filter_map(|entries| entries.get(key))
        .max_by_key(|(_, entry)| entry.cached_at)
        .map(|(_, entry)| entry.clone()),
    )
  }

  fn len(&self, generation: &str) -> Result<usize> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(generations.get(generation).map(|e| e.len()).unwrap_or(0))
  }
}

/// SQLite-based generation store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the given path, creating parent directories.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory database, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;

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
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the generation tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses keyed by normalized request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(request_key);
"#;

impl GenerationStore for SqliteStore {
  fn ensure(&self, generation: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;

    Ok(())
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn remove(&self, generation: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;

    let removed = conn
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    Ok(removed > 0)
  }

  fn put(&self, generation: &str, key: &str, url: &str, entry: &CachedResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_vec(&entry.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (generation, request_key, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          generation,
          key,
          url,
          entry.status,
          headers,
          entry.body,
          entry.cached_at.format("%Y-%m-%d %H:%M:%S%.f").to_string()
        ],
      )
      .map_err(|e| eyre!("Failed to store entry for {}: {}", url, e))?;

    Ok(())
  }

  fn get(&self, generation: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![generation, key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    row.map(decode_entry).transpose()
  }

  fn get_any(&self, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE request_key = ? ORDER BY cached_at DESC LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    row.map(decode_entry).transpose()
  }

  fn len(&self, generation: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", generation, e))?;

    Ok(count as usize)
  }
}

fn decode_entry((status, headers, body, cached_at): (u16, Vec<u8>, Vec<u8>, String)) -> Result<CachedResponse> {
  let headers: BTreeMap<String, String> =
    serde_json::from_slice(&headers).map_err(|e| eyre!("Failed to decode headers: {}", e))?;

  Ok(CachedResponse {
    status,
    headers,
    body,
    cached_at: parse_datetime(&cached_at)?,
  })
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // Stored as "YYYY-MM-DD HH:MM:SS" with optional fractional seconds
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::Request;

  fn entry(status: u16, body: &str) -> CachedResponse {
    CachedResponse::from_response(&Response::new(status).with_body(body))
  }

  fn stores() -> Vec<Box<dyn GenerationStore>> {
    vec![
      Box::new(MemoryStore::new()),
      Box::new(SqliteStore::open_in_memory().unwrap()),
    ]
  }

  #[test]
  fn put_then_get_round_trips() {
    for store in stores() {
      let key = Request::get("/offline.html").cache_key();
      store.put("v1", &key, "/offline.html", &entry(200, "fallback")).unwrap();

      let found = store.get("v1", &key).unwrap().unwrap();
      assert_eq!(found.status, 200);
      assert_eq!(found.body, b"fallback");
      assert!(store.get("v2", &key).unwrap().is_none());
    }
  }

  #[test]
  fn put_is_last_write_wins() {
    for store in stores() {
      let key = Request::get("/api/earthquakes").cache_key();
      store.put("v1", &key, "/api/earthquakes", &entry(200, "old")).unwrap();
      store.put("v1", &key, "/api/earthquakes", &entry(200, "new")).unwrap();

      let found = store.get("v1", &key).unwrap().unwrap();
      assert_eq!(found.body, b"new");
      assert_eq!(store.len("v1").unwrap(), 1);
    }
  }

  #[test]
  fn get_any_searches_every_generation() {
    for store in stores() {
      let key = Request::get("/build/assets/app.css").cache_key();
      store.put("old-v1", &key, "/build/assets/app.css", &entry(200, "body")).unwrap();

      assert!(store.get_any(&key).unwrap().is_some());
      assert!(store.get_any("missing-key").unwrap().is_none());
    }
  }

  #[test]
  fn remove_drops_generation_and_entries() {
    for store in stores() {
      let key = Request::get("/").cache_key();
      store.ensure("v1").unwrap();
      store.put("v1", &key, "/", &entry(200, "shell")).unwrap();

      assert!(store.remove("v1").unwrap());
      assert!(!store.remove("v1").unwrap());
      assert!(store.names().unwrap().is_empty());
      assert!(store.get_any(&key).unwrap().is_none());
    }
  }

  #[test]
  fn ensure_creates_empty_generation() {
    for store in stores() {
      store.ensure("v2").unwrap();
      assert_eq!(store.names().unwrap(), vec!["v2".to_string()]);
      assert_eq!(store.len("v2").unwrap(), 0);
    }
  }
}
