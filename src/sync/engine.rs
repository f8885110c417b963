use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::datajud::types::{parse_timestamp, Process, ProcessId, RemoteRecord};
use crate::datajud::{RemoteLookup, Router};
use crate::db::Store;

use super::event::{ErrorKind, Outcome, ProgressEvent, SyncError, SyncEvent, SyncSummary};
use super::{CancelToken, FreshnessBasis, SyncOptions, SyncRequest};

/// Drives a list of identifiers through freshness check, routing, remote
/// lookup and commit.
pub struct SyncEngine<R: RemoteLookup> {
  store: Arc<Store>,
  router: Arc<Router>,
  remote: R,
  /// Pause after every remote call
  request_delay: Duration,
}

/// What the remote phase decided for one request.
enum Resolution {
  Skipped,
  Found { tribunal: String, record: RemoteRecord },
  NotFound,
  Failed { kind: ErrorKind, message: String },
  /// Cancelled before a conclusive answer; nothing is written or reported
  Cancelled,
}

struct Resolved {
  index: usize,
  identifier: String,
  id: Option<ProcessId>,
  resolution: Result<Resolution, SyncError>,
}

struct Run<S> {
  resolved: S,
  summary: SyncSummary,
  cancel: CancelToken,
  run_at: DateTime<Utc>,
  done: bool,
}

impl<R: RemoteLookup> SyncEngine<R> {
  pub fn new(store: Arc<Store>, router: Arc<Router>, remote: R) -> Self {
    Self {
      store,
      router,
      remote,
      request_delay: Duration::ZERO,
    }
  }

  pub fn with_request_delay(mut self, delay: Duration) -> Self {
    self.request_delay = delay;
    self
  }

  /// Synchronize `requests`, yielding one progress event per request in
  /// request order and then a terminal event.
  ///
  /// Nothing runs until the stream is polled. Every write of the run carries
  /// the same timestamp.
  pub fn synchronize(
    &self,
    requests: Vec<SyncRequest>,
    options: SyncOptions,
    cancel: CancelToken,
  ) -> BoxStream<'_, SyncEvent> {
    let total = requests.len();
    let run_at = Utc::now();
    let concurrency = options.concurrency.max(1);
    info!(total, concurrency, force = options.force, "starting sync run");

    let resolve_cancel = cancel.clone();
    let resolved = stream::iter(requests.into_iter().enumerate())
      .map(move |(index, request)| {
        let options = options.clone();
        let cancel = resolve_cancel.clone();
        async move { self.resolve(index, request, options, cancel, run_at).await }
      })
      .buffered(concurrency)
      .boxed();

    let run = Run {
      resolved,
      summary: SyncSummary::new(total),
      cancel,
      run_at,
      done: false,
    };

    stream::unfold(run, move |mut run| async move {
      if run.done {
        return None;
      }

      loop {
        let Some(resolved) = run.resolved.next().await else {
          run.done = true;
          let summary = run.summary.clone();
          let event = if run.cancel.is_cancelled() {
            info!(processed = summary.processed(), total, "sync run cancelled");
            SyncEvent::Cancelled(summary)
          } else {
            info!(
              updated = summary.updated,
              skipped = summary.skipped,
              not_found = summary.not_found,
              errors = summary.errors,
              "sync run finished"
            );
            SyncEvent::Finished(summary)
          };
          return Some((event, run));
        };

        match self.commit(resolved, total, run.run_at) {
          Ok(Some(progress)) => {
            run.summary.record(&progress);
            return Some((SyncEvent::Progress(progress), run));
          }
          Ok(None) => continue,
          Err(e) => {
            warn!(error = %e, "sync run aborted");
            run.done = true;
            let event = SyncEvent::Aborted {
              kind: e.kind(),
              error: e.to_string(),
              summary: run.summary.clone(),
            };
            return Some((event, run));
          }
        }
      }
    })
    .boxed()
  }

  async fn resolve(
    &self,
    index: usize,
    request: SyncRequest,
    options: SyncOptions,
    cancel: CancelToken,
    run_at: DateTime<Utc>,
  ) -> Resolved {
    let parsed = ProcessId::parse(&request.identifier);
    let identifier = match &parsed {
      Ok(id) => id.as_str().to_string(),
      Err(_) => request.identifier.clone(),
    };

    let resolution = if cancel.is_cancelled() {
      Ok(Resolution::Cancelled)
    } else {
      match &parsed {
        Ok(id) => self.decide(id, request.tribunal, &options, &cancel, run_at).await,
        Err(e) => Ok(Resolution::Failed {
          kind: ErrorKind::InvalidIdentifier,
          message: e.to_string(),
        }),
      }
    };

    Resolved {
      index,
      identifier,
      id: parsed.ok(),
      resolution,
    }
  }

  async fn decide(
    &self,
    id: &ProcessId,
    hint: Option<String>,
    options: &SyncOptions,
    cancel: &CancelToken,
    run_at: DateTime<Utc>,
  ) -> Result<Resolution, SyncError> {
    let read_error = |e: color_eyre::Report| SyncError::StoreRead {
      identifier: id.to_string(),
      message: e.to_string(),
    };

    if !options.force {
      let existing = self.store.get_process(id).map_err(read_error)?;
      if existing.is_some_and(|p| is_fresh(&p, options, run_at)) {
        debug!(process = %id, "local copy is fresh");
        return Ok(Resolution::Skipped);
      }
    }

    let hint = match hint.filter(|t| !t.trim().is_empty()) {
      Some(hint) => Some(hint),
      None => self
        .store
        .get_master_entry(id)
        .map_err(read_error)?
        .and_then(|entry| entry.initial_tribunal),
    };

    let mut last_error = None;
    for endpoint in self.router.candidates(id, hint.as_deref()) {
      if cancel.is_cancelled() {
        return Ok(Resolution::Cancelled);
      }

      let result = self.remote.lookup(&endpoint, id).await;
      if !self.request_delay.is_zero() {
        tokio::time::sleep(self.request_delay).await;
      }

      match result {
        Ok(Some(record)) => {
          self.router.record_success(&endpoint.tribunal);
          return Ok(Resolution::Found {
            tribunal: endpoint.tribunal,
            record,
          });
        }
        Ok(None) => {
          debug!(process = %id, tribunal = %endpoint.tribunal, "no hit");
        }
        Err(e) => {
          warn!(process = %id, tribunal = %endpoint.tribunal, error = %e, "lookup failed");
          last_error = Some(e);
        }
      }
    }

    Ok(match last_error {
      Some(e) => Resolution::Failed {
        kind: e.kind(),
        message: e.to_string(),
      },
      None => Resolution::NotFound,
    })
  }

  /// Persist one resolution. Runs on the consumer's task, one request at a
  /// time, so writes land in request order.
  fn commit(
    &self,
    resolved: Resolved,
    total: usize,
    run_at: DateTime<Utc>,
  ) -> Result<Option<ProgressEvent>, SyncError> {
    let Resolved {
      index,
      identifier,
      id,
      resolution,
    } = resolved;

    let write_error = |e: color_eyre::Report| SyncError::StoreWrite {
      identifier: identifier.clone(),
      message: e.to_string(),
    };

    let (outcome, tribunal) = match (resolution?, id) {
      (Resolution::Cancelled, _) => return Ok(None),
      (Resolution::Skipped, _) => (Outcome::Skipped, None),
      (Resolution::Found { tribunal, record }, _) => {
        self
          .store
          .record_fetch(&record, &tribunal, run_at)
          .map_err(write_error)?;
        info!(process = %identifier, tribunal = %tribunal, movements = record.movements.len(), "updated");
        (
          Outcome::Updated {
            movements: record.movements.len(),
          },
          Some(tribunal),
        )
      }
      (Resolution::NotFound, Some(id)) => {
        self
          .store
          .touch_master_entry(&id, None, run_at)
          .map_err(write_error)?;
        info!(process = %identifier, "not found on any court system");
        (Outcome::NotFound, None)
      }
      (Resolution::NotFound, None) => (Outcome::NotFound, None),
      (Resolution::Failed { kind, message }, _) => (Outcome::error(kind, message), None),
    };

    Ok(Some(ProgressEvent {
      identifier,
      index,
      total,
      tribunal,
      outcome,
    }))
  }
}

fn is_fresh(process: &Process, options: &SyncOptions, now: DateTime<Utc>) -> bool {
  let basis = match options.freshness_basis {
    FreshnessBasis::Fetched => process.fetched_at,
    FreshnessBasis::Remote => process.updated_at.as_deref().and_then(parse_timestamp),
  };
  basis.is_some_and(|ts| now - ts <= options.freshness)
}
