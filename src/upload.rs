//! Tracking-list uploads: a delimited export of the spreadsheet, checked
//! against what the store already tracks.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::datajud::types::{ListRow, MasterListEntry, ProcessId};
use crate::datajud::Router;
use crate::sync::SyncRequest;

/// Spreadsheet rows shorter than this are typing mistakes, not process numbers.
const MIN_DIGITS: usize = 15;

const ID_COLUMN: &str = "numeroProcesso";

#[derive(Debug, Deserialize)]
struct RawRow {
  #[serde(rename = "numeroProcesso")]
  numero: String,
  #[serde(default)]
  tribunal: Option<String>,
  #[serde(default)]
  categoria: Option<String>,
}

/// One data row of an uploaded list, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
  /// 1-based line in the file, header included
  pub line: u64,
  pub raw: String,
  pub tribunal: Option<String>,
  pub category: Option<String>,
}

pub fn read_list(path: &Path, delimiter: u8) -> Result<Vec<UploadRecord>> {
  let file = std::fs::File::open(path)
    .map_err(|e| eyre!("Failed to open list {}: {}", path.display(), e))?;
  let records = read_list_from(file, delimiter)?;
  info!(path = %path.display(), rows = records.len(), "read tracking list");
  Ok(records)
}

pub fn read_list_from<R: Read>(reader: R, delimiter: u8) -> Result<Vec<UploadRecord>> {
  let mut rdr = csv::ReaderBuilder::new()
    .delimiter(delimiter)
    .flexible(true)
    .trim(csv::Trim::All)
    .from_reader(reader);

  let headers = rdr
    .headers()
    .map_err(|e| eyre!("Failed to read list header: {}", e))?
    .clone();
  if !headers.iter().any(|h| h == ID_COLUMN) {
    return Err(eyre!("List must have a '{}' column", ID_COLUMN));
  }

  let mut records = Vec::new();
  for result in rdr.records() {
    let record = result.map_err(|e| eyre!("Failed to read list row: {}", e))?;
    // Line where the record starts; blank lines and quoted line breaks count
    let line = record.position().map(|p| p.line()).unwrap_or_default();
    let row: RawRow = record
      .deserialize(Some(&headers))
      .map_err(|e| eyre!("Failed to read list row at line {}: {}", line, e))?;
    records.push(UploadRecord {
      line,
      raw: row.numero,
      tribunal: non_blank(row.tribunal),
      category: non_blank(row.categoria),
    });
  }

  if records.is_empty() {
    return Err(eyre!("List has no rows"));
  }

  Ok(records)
}

fn non_blank(value: Option<String>) -> Option<String> {
  value
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidRow {
  pub line: u64,
  pub raw: String,
  pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateRow {
  pub line: u64,
  pub id: String,
}

/// Differences between an upload and the tracking list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
  pub total_rows: usize,
  /// Valid rows, first occurrence of each identifier, in file order
  #[serde(skip)]
  pub rows: Vec<ListRow>,
  pub valid: usize,
  /// Identifiers not tracked yet
  pub new: Vec<String>,
  pub already_tracked: usize,
  /// Tracked identifiers missing from the upload
  pub absent: Vec<String>,
  pub duplicates: Vec<DuplicateRow>,
  pub invalid: Vec<InvalidRow>,
  /// Rows per recognized court system
  pub hints: BTreeMap<String, usize>,
  /// Hints that match no configured court system; those rows are broadcast
  pub unknown_hints: BTreeMap<String, usize>,
}

impl UploadReport {
  pub fn to_requests(&self) -> Vec<SyncRequest> {
    self.rows.iter().map(SyncRequest::from).collect()
  }
}

pub fn reconcile(records: &[UploadRecord], tracked: &[MasterListEntry], router: &Router) -> UploadReport {
  let tracked_ids: HashSet<&str> = tracked.iter().map(|e| e.id.as_str()).collect();
  let mut seen = HashSet::new();
  let mut report = UploadReport {
    total_rows: records.len(),
    ..UploadReport::default()
  };

  for record in records {
    let id = match ProcessId::parse(&record.raw) {
      Ok(id) if id.digit_count() >= MIN_DIGITS => id,
      Ok(_) => {
        report.invalid.push(InvalidRow {
          line: record.line,
          raw: record.raw.clone(),
          reason: format!("fewer than {} digits", MIN_DIGITS),
        });
        continue;
      }
      Err(e) => {
        report.invalid.push(InvalidRow {
          line: record.line,
          raw: record.raw.clone(),
          reason: e.reason.to_string(),
        });
        continue;
      }
    };

    if !seen.insert(id.as_str().to_string()) {
      report.duplicates.push(DuplicateRow {
        line: record.line,
        id: id.as_str().to_string(),
      });
      continue;
    }

    let tribunal = record.tribunal.as_deref().map(|hint| match router.resolve(hint) {
      Some(endpoint) => {
        *report.hints.entry(endpoint.tribunal.clone()).or_default() += 1;
        endpoint.tribunal.clone()
      }
      None => {
        *report.unknown_hints.entry(hint.to_string()).or_default() += 1;
        hint.to_string()
      }
    });

    if tracked_ids.contains(id.as_str()) {
      report.already_tracked += 1;
    } else {
      report.new.push(id.as_str().to_string());
    }

    report.rows.push(ListRow {
      id,
      tribunal,
      category: record.category.clone(),
    });
  }

  report.absent = tracked
    .iter()
    .map(|e| e.id.as_str())
    .filter(|id| !seen.contains(*id))
    .map(String::from)
    .collect();
  report.valid = report.rows.len();

  if !report.invalid.is_empty() || !report.unknown_hints.is_empty() {
    warn!(
      invalid = report.invalid.len(),
      unknown_hints = report.unknown_hints.len(),
      "upload has rows that need attention"
    );
  }

  report
}
