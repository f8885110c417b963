//! Progress protocol of a sync run.
//!
//! A run yields one [`SyncEvent::Progress`] per request, in request order,
//! followed by exactly one terminal event.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Why an identifier could not be synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  RemoteUnavailable,
  MalformedRemoteData,
  InvalidIdentifier,
  StoreWriteFailure,
  StoreReadFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
  /// Found remotely and written; `movements` is the new movement count
  Updated { movements: usize },
  /// Local copy is fresh
  Skipped,
  /// No court system knows the number
  NotFound,
  Error { kind: ErrorKind, message: String },
}

impl Outcome {
  pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
    Outcome::Error {
      kind,
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
  pub identifier: String,
  /// Position in the request list, zero-based
  pub index: usize,
  pub total: usize,
  /// Court system the record was found in
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tribunal: Option<String>,
  #[serde(flatten)]
  pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
  pub total: usize,
  pub updated: usize,
  pub skipped: usize,
  pub not_found: usize,
  pub errors: usize,
  /// Updated processes per court system they were found in
  pub by_tribunal: BTreeMap<String, usize>,
  /// Identifiers no court system knows, in request order
  pub not_found_ids: Vec<String>,
}

impl SyncSummary {
  pub fn new(total: usize) -> Self {
    Self {
      total,
      ..Self::default()
    }
  }

  pub fn record(&mut self, event: &ProgressEvent) {
    match &event.outcome {
      Outcome::Updated { .. } => {
        self.updated += 1;
        if let Some(tribunal) = &event.tribunal {
          *self.by_tribunal.entry(tribunal.clone()).or_default() += 1;
        }
      }
      Outcome::Skipped => self.skipped += 1,
      Outcome::NotFound => {
        self.not_found += 1;
        self.not_found_ids.push(event.identifier.clone());
      }
      Outcome::Error { .. } => self.errors += 1,
    }
  }

  pub fn processed(&self) -> usize {
    self.updated + self.skipped + self.not_found + self.errors
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
  Progress(ProgressEvent),
  Finished(SyncSummary),
  Cancelled(SyncSummary),
  /// A store failure stopped the run; work committed before it is kept
  Aborted {
    kind: ErrorKind,
    error: String,
    summary: SyncSummary,
  },
}

/// Failures that end a run.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error("failed to write {identifier}: {message}")]
  StoreWrite { identifier: String, message: String },
  #[error("failed to read {identifier}: {message}")]
  StoreRead { identifier: String, message: String },
}

impl SyncError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      SyncError::StoreWrite { .. } => ErrorKind::StoreWriteFailure,
      SyncError::StoreRead { .. } => ErrorKind::StoreReadFailure,
    }
  }
}
