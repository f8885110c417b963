//! SQLite store for processes, movements and the tracking list.
//!
//! Writes go through one connection behind a mutex, held for a single call.
//! File databases run in WAL mode with a separate read connection, so reads
//! see the last committed state while a write is in progress.

mod read;
pub mod schema;
mod write;

pub use read::{JoinedRow, Listing, Page};

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;

/// Notified after every committed write.
pub trait WriteObserver: Send + Sync {
  fn on_write(&self);
}

pub struct Store {
  writer: Mutex<Connection>,
  reader: Option<Mutex<Connection>>,
  observers: RwLock<Vec<Arc<dyn WriteObserver>>>,
}

impl Store {
  /// Open or create the database at `path`
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
      }
    }

    let writer = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;
    writer
      .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to enable WAL: {}", e))?;
    Self::run_migrations(&writer)?;

    let reader = Connection::open_with_flags(
      path,
      OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| eyre!("Failed to open read connection at {}: {}", path.display(), e))?;

    debug!(path = %path.display(), "opened store");
    Ok(Self::with_connections(writer, Some(reader)))
  }

  /// Private in-memory database; reads share the write connection.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::run_migrations(&conn)?;
    Ok(Self::with_connections(conn, None))
  }

  fn with_connections(writer: Connection, reader: Option<Connection>) -> Self {
    Self {
      writer: Mutex::new(writer),
      reader: reader.map(Mutex::new),
      observers: RwLock::new(Vec::new()),
    }
  }

  fn run_migrations(conn: &Connection) -> Result<()> {
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))
  }

  /// Register a callback for committed writes (cache invalidation).
  pub fn subscribe(&self, observer: Arc<dyn WriteObserver>) {
    if let Ok(mut observers) = self.observers.write() {
      observers.push(observer);
    }
  }

  fn notify(&self) {
    if let Ok(observers) = self.observers.read() {
      for observer in observers.iter() {
        observer.on_write();
      }
    }
  }

  /// Run `f` with exclusive write access, then notify observers.
  fn write<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
    let mut conn = lock(&self.writer)?;
    let out = f(&mut conn)?;
    drop(conn);
    self.notify();
    Ok(out)
  }

  fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let conn = lock(self.reader.as_ref().unwrap_or(&self.writer))?;
    f(&conn)
  }

  #[cfg(test)]
  pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
    let conn = lock(&self.writer)?;
    conn
      .execute_batch(sql)
      .map_err(|e| eyre!("Failed to execute: {}", e))
  }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
  conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

fn format_ts(dt: &DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
pub(crate) mod fixtures {
  use chrono::{DateTime, TimeZone, Utc};
  use std::collections::BTreeMap;

  use crate::datajud::types::{Movement, Process, ProcessId, RemoteRecord};

  pub fn pid(raw: &str) -> ProcessId {
    ProcessId::parse(raw).unwrap()
  }

  pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
  }

  pub fn process(raw: &str, tribunal: &str, updated_at: &str) -> Process {
    Process {
      id: pid(raw),
      tribunal: Some(tribunal.to_string()),
      class_code: Some(7),
      class_name: Some("Procedimento Comum Cível".to_string()),
      system_code: Some(1),
      system_name: Some("Pje".to_string()),
      updated_at: Some(updated_at.to_string()),
      extra: BTreeMap::from([("grau".to_string(), serde_json::Value::from("G1"))]),
      fetched_at: None,
    }
  }

  pub fn movement(raw: &str, name: &str, occurred_at: &str) -> Movement {
    Movement {
      process_id: pid(raw),
      code: Some(26),
      name: Some(name.to_string()),
      occurred_at: Some(occurred_at.to_string()),
      body_code: Some("100".to_string()),
      body_name: Some("1a Vara".to_string()),
    }
  }

  pub fn record(raw: &str, tribunal: &str, movements: &[(&str, &str)]) -> RemoteRecord {
    RemoteRecord {
      process: process(raw, tribunal, "2024-05-01T10:00:00Z"),
      movements: movements
        .iter()
        .map(|(name, when)| movement(raw, name, when))
        .collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::fixtures::*;
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Counter(AtomicUsize);

  impl WriteObserver for Counter {
    fn on_write(&self) {
      self.0.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[test]
  fn test_observers_see_writes_not_reads() {
    let store = Store::open_in_memory().unwrap();
    let counter = Arc::new(Counter(AtomicUsize::new(0)));
    store.subscribe(counter.clone());

    store
      .upsert_process(&process("0001", "TJSP", "2024-05-01T10:00:00Z"))
      .unwrap();
    store.get_process(&pid("0001")).unwrap();
    store.clear_all().unwrap();

    assert_eq!(counter.0.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_file_store_reads_through_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("processos.db");

    {
      let store = Store::open(&path).unwrap();
      store
        .record_fetch(&record("0001", "TJSP", &[("Distribuição", "2024-01-01T00:00:00Z")]), "TJSP", at(2))
        .unwrap();
      assert!(store.get_process(&pid("0001")).unwrap().is_some());
    }

    let reopened = Store::open(&path).unwrap();
    assert_eq!(reopened.movement_count(&pid("0001")).unwrap(), 1);
    assert_eq!(
      reopened.get_process(&pid("0001")).unwrap().unwrap().fetched_at,
      Some(at(2))
    );
  }

  #[test]
  fn test_timestamps_roundtrip_exactly() {
    let now = Utc::now();
    assert_eq!(parse_ts(&format_ts(&now)).unwrap(), now);
  }
}
