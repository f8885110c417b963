//! Incremental synchronization of tracked processes against DataJud.

mod engine;
mod event;

pub use engine::SyncEngine;
pub use event::{ErrorKind, SyncEvent};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::datajud::types::{ListRow, MasterListEntry};

/// Timestamp the staleness check compares against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessBasis {
  /// When this store last fetched the process
  #[default]
  Fetched,
  /// `dataHoraUltimaAtualizacao` reported by the court system
  Remote,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
  /// Fetch even when the local copy is fresh
  pub force: bool,
  /// Remote resolutions in flight at once
  pub concurrency: usize,
  pub freshness: chrono::Duration,
  pub freshness_basis: FreshnessBasis,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self::from_config(&SyncConfig::default())
  }
}

impl SyncOptions {
  pub fn from_config(config: &SyncConfig) -> Self {
    Self {
      force: false,
      concurrency: config.concurrency.max(1),
      freshness: config.freshness(),
      freshness_basis: config.freshness_basis,
    }
  }
}

/// Shared flag that stops a run before its next remote call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// One identifier to synchronize, with an optional court-system hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
  pub identifier: String,
  pub tribunal: Option<String>,
}

impl SyncRequest {
  pub fn new(identifier: impl Into<String>) -> Self {
    Self {
      identifier: identifier.into(),
      tribunal: None,
    }
  }

  pub fn with_tribunal(mut self, tribunal: impl Into<String>) -> Self {
    self.tribunal = Some(tribunal.into());
    self
  }
}

impl From<&ListRow> for SyncRequest {
  fn from(row: &ListRow) -> Self {
    Self {
      identifier: row.id.as_str().to_string(),
      tribunal: row.tribunal.clone(),
    }
  }
}

/// Resync of a tracked entry, routed to the court system it was first found in.
impl From<&MasterListEntry> for SyncRequest {
  fn from(entry: &MasterListEntry) -> Self {
    let request = SyncRequest::new(entry.id.as_str());
    match &entry.initial_tribunal {
      Some(tribunal) => request.with_tribunal(tribunal.clone()),
      None => request,
    }
  }
}
