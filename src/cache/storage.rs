//! Storage traits and backends for cache stores and the pending sync queue.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use super::types::{PendingSyncRecord, RequestIdentity, ResponseSnapshot, StoreInfo};

/// Storage backend for named, versioned cache stores.
///
/// Store creation and deletion belong to the lifecycle handlers; the fetch
/// path only reads and writes entries within an existing store.
pub trait CacheStorage: Send + Sync {
  /// Names of all existing cache stores.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and every entry in it. Deleting a missing store is not
  /// an error.
  fn delete_store(&self, name: &str) -> Result<()>;

  /// Whether the store exists and its precache batch committed.
  fn store_is_complete(&self, name: &str) -> Result<bool>;

  /// Atomically create (or refresh) a store with the given precached
  /// entries and mark it complete. Either every entry lands or none does.
  fn precache(&self, store: &str, entries: &[(RequestIdentity, ResponseSnapshot)]) -> Result<()>;

  /// Look up an entry by request identity.
  fn get(&self, store: &str, identity: &RequestIdentity) -> Result<Option<ResponseSnapshot>>;

  /// Write one entry. Fails if the store does not exist; concurrent writes
  /// to the same identity are last-write-wins.
  fn put(&self, store: &str, identity: &RequestIdentity, snapshot: &ResponseSnapshot)
    -> Result<()>;

  /// Number of entries in a store.
  fn entry_count(&self, store: &str) -> Result<usize>;

  /// Summaries of all stores.
  fn stores(&self) -> Result<Vec<StoreInfo>> {
    self
      .store_names()?
      .into_iter()
      .map(|name| {
        Ok(StoreInfo {
          complete: self.store_is_complete(&name)?,
          entries: self.entry_count(&name)?,
          name,
        })
      })
      .collect()
  }
}

/// Storage backend for the pending offline-data queue.
///
/// The sync agent owns the read-then-delete transaction: records are read
/// in insertion order and cleared only as a whole batch.
pub trait SyncQueueStorage: Send + Sync {
  /// Append a record to the queue.
  fn enqueue(&self, payload: &serde_json::Value) -> Result<PendingSyncRecord>;

  /// All pending records in insertion order.
  fn pending(&self) -> Result<Vec<PendingSyncRecord>>;

  /// Delete every pending record.
  fn clear(&self) -> Result<()>;
}

/// SQLite-backed storage. Cache stores, entries and the sync queue share
/// one database file so a single open handle serves the whole worker.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (creating if absent) the database at the given path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache and sync-queue tables.
const SCHEMA: &str = r#"
-- Named, versioned cache stores; complete is set once the precache batch
-- has committed
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    complete INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request identity within a store
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, entry_key),
    FOREIGN KEY (store_name) REFERENCES cache_stores(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(store_name);

-- Offline-captured data awaiting delivery; id preserves causal order
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload BLOB NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl CacheStorage for SqliteStorage {
  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    tx.execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit store deletion: {}", e))?;

    Ok(())
  }

  fn store_is_complete(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let complete: Option<bool> = conn
      .query_row(
        "SELECT complete FROM cache_stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query store {}: {}", name, e))?;

    Ok(complete.unwrap_or(false))
  }

  fn precache(&self, store: &str, entries: &[(RequestIdentity, ResponseSnapshot)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT INTO cache_stores (name, complete) VALUES (?, 1)
       ON CONFLICT(name) DO UPDATE SET complete = 1",
      params![store],
    )
    .map_err(|e| eyre!("Failed to create store {}: {}", store, e))?;

    for (identity, snapshot) in entries {
      let data =
        serde_json::to_vec(snapshot).map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries (store_name, entry_key, method, url, data, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![
          store,
          identity.entry_key(),
          identity.method(),
          identity.url(),
          data
        ],
      )
      .map_err(|e| eyre!("Failed to precache {}: {}", identity.url(), e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit precache batch: {}", e))?;

    Ok(())
  }

  fn get(&self, store: &str, identity: &RequestIdentity) -> Result<Option<ResponseSnapshot>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM cache_entries WHERE store_name = ? AND entry_key = ?",
        params![store, identity.entry_key()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entry: {}", e))?;

    match data {
      Some(data) => {
        let snapshot = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize snapshot: {}", e))?;
        Ok(Some(snapshot))
      }
      None => Ok(None),
    }
  }

  fn put(
    &self,
    store: &str,
    identity: &RequestIdentity,
    snapshot: &ResponseSnapshot,
  ) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(snapshot).map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;

    // The WHERE EXISTS guard keeps entry writes from resurrecting a store
    // the lifecycle handlers deleted
    let changed = conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (store_name, entry_key, method, url, data, cached_at)
         SELECT ?, ?, ?, ?, ?, datetime('now')
         WHERE EXISTS (SELECT 1 FROM cache_stores WHERE name = ?)",
        params![
          store,
          identity.entry_key(),
          identity.method(),
          identity.url(),
          data,
          store
        ],
      )
      .map_err(|e| eyre!("Failed to store entry: {}", e))?;

    if changed == 0 {
      return Err(eyre!("No such cache store: {}", store));
    }

    Ok(())
  }

  fn entry_count(&self, store: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE store_name = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count as usize)
  }
}

impl SyncQueueStorage for SqliteStorage {
  fn enqueue(&self, payload: &serde_json::Value) -> Result<PendingSyncRecord> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute("INSERT INTO sync_queue (payload) VALUES (?)", params![data])
      .map_err(|e| eyre!("Failed to enqueue record: {}", e))?;

    let id = conn.last_insert_rowid();
    let queued_at: String = conn
      .query_row(
        "SELECT queued_at FROM sync_queue WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read back record {}: {}", id, e))?;

    Ok(PendingSyncRecord {
      id,
      payload: payload.clone(),
      queued_at: parse_datetime(&queued_at)?,
    })
  }

  fn pending(&self) -> Result<Vec<PendingSyncRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT id, payload, queued_at FROM sync_queue ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        let id: i64 = row.get(0)?;
        let data: Vec<u8> = row.get(1)?;
        let queued_at: String = row.get(2)?;
        Ok((id, data, queued_at))
      })
      .map_err(|e| eyre!("Failed to query sync queue: {}", e))?;

    let mut records = Vec::new();
    for row in rows {
      let (id, data, queued_at) = row.map_err(|e| eyre!("Failed to read queue row: {}", e))?;
      let payload = serde_json::from_slice(&data)
        .map_err(|e| eyre!("Failed to deserialize record {}: {}", id, e))?;
      records.push(PendingSyncRecord {
        id,
        payload,
        queued_at: parse_datetime(&queued_at)?,
      });
    }

    Ok(records)
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM sync_queue", [])
      .map_err(|e| eyre!("Failed to clear sync queue: {}", e))?;

    Ok(())
  }
}

/// In-memory storage for ephemeral runs and tests. Same semantics as the
/// SQLite backend, nothing survives the process.
pub struct MemoryStorage {
  state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
  stores: BTreeMap<String, MemoryStore>,
  queue: Vec<PendingSyncRecord>,
  last_queue_id: i64,
}

#[derive(Default)]
struct MemoryStore {
  complete: bool,
  entries: BTreeMap<String, ResponseSnapshot>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(MemoryState::default()),
    }
  }
}

impl Default for MemoryStorage {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStorage for MemoryStorage {
  fn store_names(&self) -> Result<Vec<String>> {
    let state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(state.stores.keys().cloned().collect())
  }

  fn delete_store(&self, name: &str) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    state.stores.remove(name);
    Ok(())
  }

  fn store_is_complete(&self, name: &str) -> Result<bool> {
    let state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(state.stores.get(name).map(|s| s.complete).unwrap_or(false))
  }

  fn precache(&self, store: &str, entries: &[(RequestIdentity, ResponseSnapshot)]) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let slot = state.stores.entry(store.to_string()).or_default();
    for (identity, snapshot) in entries {
      slot.entries.insert(identity.entry_key(), snapshot.clone());
    }
    slot.complete = true;

    Ok(())
  }

  fn get(&self, store: &str, identity: &RequestIdentity) -> Result<Option<ResponseSnapshot>> {
    let state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      state
        .stores
        .get(store)
        .and_then(|s| s.entries.get(&identity.entry_key()))
        .cloned(),
    )
  }

  fn put(
    &self,
    store: &str,
    identity: &RequestIdentity,
    snapshot: &ResponseSnapshot,
  ) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let slot = state
      .stores
      .get_mut(store)
      .ok_or_else(|| eyre!("No such cache store: {}", store))?;
    slot.entries.insert(identity.entry_key(), snapshot.clone());

    Ok(())
  }

  fn entry_count(&self, store: &str) -> Result<usize> {
    let state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(state.stores.get(store).map(|s| s.entries.len()).unwrap_or(0))
  }
}

impl SyncQueueStorage for MemoryStorage {
  fn enqueue(&self, payload: &serde_json::Value) -> Result<PendingSyncRecord> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    state.last_queue_id += 1;
    let record = PendingSyncRecord {
      id: state.last_queue_id,
      payload: payload.clone(),
      queued_at: Utc::now(),
    };
    state.queue.push(record.clone());

    Ok(record)
  }

  fn pending(&self) -> Result<Vec<PendingSyncRecord>> {
    let state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(state.queue.clone())
  }

  fn clear(&self) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    state.queue.clear();
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
