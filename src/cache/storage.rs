//! SQLite implementation of the cache stores.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStorage, CachedResponse};
use crate::net::{Request, Response};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    tracing::debug!(path = %path.display(), "Opened cache database");
    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named stores; id preserves creation order
CREATE TABLE IF NOT EXISTS cache_stores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One response per (store, request identity)
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_request ON cache_entries(request_hash);
"#;

/// SHA256 of the request identity, for stable fixed-length keys.
fn request_hash(request: &Request) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request.cache_key().as_bytes());
  hex::encode(hasher.finalize())
}

fn ensure_store(conn: &Connection, store: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![store],
    )
    .map_err(|e| eyre!("Failed to create cache store {}: {}", store, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, store: &str, request: &Request, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (store_name, request_hash, request_key, status, status_text, url, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        store,
        request_hash(request),
        request.cache_key(),
        response.status,
        response.status_text,
        response.url,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", request.url, store, e))?;

  Ok(())
}

type EntryRow = (u16, String, String, String, Vec<u8>, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn into_cached((status, status_text, url, headers, body, cached_at): EntryRow) -> Result<CachedResponse> {
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;

  Ok(CachedResponse {
    response: Response {
      status,
      status_text,
      url,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn open(&self, store: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_store(&conn, store)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, store: &str) -> Result<bool> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![store],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", store, e))?;

    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, store: &str, request: &Request, response: Response) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_store(&tx, store)?;
    insert_entry(&tx, store, request, &response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn put_all(&self, store: &str, entries: Vec<(Request, Response)>) -> Result<()> {
    let conn = self.lock()?;
    // Rolled back on drop if any insert fails
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_store(&tx, store)?;
    for (request, response) in &entries {
      insert_entry(&tx, store, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn match_request(&self, store: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        "SELECT status, status_text, url, headers, body, cached_at FROM cache_entries
         WHERE store_name = ? AND request_hash = ?",
        params![store, request_hash(request)],
        read_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query {}: {}", store, e))?;

    row.map(into_cached).transpose()
  }

  fn entries(&self, store: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT request_key FROM cache_entries WHERE store_name = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![store], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", store, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry key: {}", e))?;

    Ok(keys)
  }

  fn match_any(&self, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        "SELECT e.status, e.status_text, e.url, e.headers, e.body, e.cached_at
         FROM cache_entries e
         INNER JOIN cache_stores s ON s.name = e.store_name
         WHERE e.request_hash = ?
         ORDER BY s.id
         LIMIT 1",
        params![request_hash(request)],
        read_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache stores: {}", e))?;

    row.map(into_cached).transpose()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn storage() -> (TempDir, SqliteStorage) {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open(&dir.path().join("nested").join("cache.db")).unwrap();
    (dir, storage)
  }

  fn get(url: &str) -> Request {
    Request::parse("GET", url).unwrap()
  }

  fn response(body: &str) -> Response {
    Response {
      status: 200,
      status_text: "OK".to_string(),
      url: "https://example.com/".to_string(),
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn test_put_and_match_round_trip() {
    let (_dir, storage) = storage();
    let request = get("https://example.com/index.html");
    storage.put("shell", &request, response("hello")).unwrap();

    let hit = storage.match_request("shell", &request).unwrap().unwrap();
    assert_eq!(hit.response.body, b"hello");
    assert_eq!(hit.response.header("Content-Type"), Some("text/plain"));
    assert!(storage
      .match_request("other", &request)
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_put_replaces_previous_response() {
    let (_dir, storage) = storage();
    let request = get("https://example.com/songs");
    storage.put("api", &request, response("old")).unwrap();
    storage.put("api", &request, response("new")).unwrap();

    assert_eq!(storage.entries("api").unwrap().len(), 1);
    let hit = storage.match_request("api", &request).unwrap().unwrap();
    assert_eq!(hit.response.body, b"new");
  }

  #[test]
  fn test_keys_in_creation_order_and_open_is_idempotent() {
    let (_dir, storage) = storage();
    storage.open("b-store").unwrap();
    storage.open("a-store").unwrap();
    storage.open("b-store").unwrap();

    assert_eq!(storage.keys().unwrap(), vec!["b-store", "a-store"]);
  }

  #[test]
  fn test_delete_removes_store_and_entries() {
    let (_dir, storage) = storage();
    let request = get("https://example.com/");
    storage.put("old-v1", &request, response("x")).unwrap();

    assert!(storage.delete("old-v1").unwrap());
    assert!(!storage.delete("old-v1").unwrap());
    assert!(storage.keys().unwrap().is_empty());
    assert!(storage.match_any(&request).unwrap().is_none());

    // Recreated store starts empty
    storage.open("old-v1").unwrap();
    assert!(storage.entries("old-v1").unwrap().is_empty());
  }

  #[test]
  fn test_match_any_prefers_oldest_store() {
    let (_dir, storage) = storage();
    let request = get("https://example.com/app.js");
    storage.put("first", &request, response("first")).unwrap();
    storage.put("second", &request, response("second")).unwrap();

    let hit = storage.match_any(&request).unwrap().unwrap();
    assert_eq!(hit.response.body, b"first");
  }

  #[test]
  fn test_put_all_stores_every_entry() {
    let (_dir, storage) = storage();
    let entries = vec![
      (get("https://example.com/"), response("root")),
      (get("https://example.com/index.html"), response("index")),
    ];
    storage.put_all("shell", entries).unwrap();

    assert_eq!(
      storage.entries("shell").unwrap(),
      vec![
        "GET https://example.com/",
        "GET https://example.com/index.html"
      ]
    );
  }

  #[test]
  fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let request = get("https://example.com/");
    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.put("shell", &request, response("persisted")).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let hit = storage.match_request("shell", &request).unwrap().unwrap();
    assert_eq!(hit.response.body, b"persisted");
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2024-03-01 12:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
