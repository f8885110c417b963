use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Longest identifier the CNJ numbering scheme produces.
const MAX_DIGITS: usize = 20;

/// Canonical process number: digits only, mask stripped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid process identifier {raw:?}: {reason}")]
pub struct InvalidIdentifier {
  pub raw: String,
  pub reason: &'static str,
}

impl ProcessId {
  /// Normalize a raw identifier from a list or a user.
  ///
  /// Accepts the masked CNJ form (`0425144-44.2016.8.19.0001`), bare digits and
  /// the scientific notation spreadsheets produce for long numbers.
  pub fn parse(raw: &str) -> Result<Self, InvalidIdentifier> {
    let digits = normalize_digits(raw);
    let reason = if digits.is_empty() {
      Some("no digits")
    } else if digits.len() > MAX_DIGITS {
      Some("more than 20 digits")
    } else {
      None
    };

    match reason {
      Some(reason) => Err(InvalidIdentifier {
        raw: raw.to_string(),
        reason,
      }),
      None => Ok(Self(digits)),
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn digit_count(&self) -> usize {
    self.0.len()
  }

  /// Render as `NNNNNNN-DD.AAAA.J.TR.OOOO`; shorter identifiers are returned as-is.
  pub fn masked(&self) -> String {
    let d = &self.0;
    if d.len() != MAX_DIGITS {
      return d.clone();
    }
    format!(
      "{}-{}.{}.{}.{}.{}",
      &d[0..7],
      &d[7..9],
      &d[9..13],
      &d[13..14],
      &d[14..16],
      &d[16..20]
    )
  }
}

impl fmt::Display for ProcessId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

fn normalize_digits(raw: &str) -> String {
  let s = raw.trim();
  if is_scientific(s) {
    if let Ok(value) = s.parse::<f64>() {
      if value.is_finite() && value >= 0.0 {
        return format!("{:.0}", value.trunc());
      }
    }
  }
  s.chars().filter(char::is_ascii_digit).collect()
}

/// `1.01779912E+18` and friends.
fn is_scientific(s: &str) -> bool {
  let lower = s.to_ascii_lowercase();
  let Some((mantissa, exponent)) = lower.split_once("e+") else {
    return false;
  };
  let mut parts = mantissa.splitn(2, '.');
  let int_part = parts.next().unwrap_or_default();
  let frac_part = parts.next().unwrap_or("0");
  !int_part.is_empty()
    && int_part.chars().all(|c| c.is_ascii_digit())
    && !frac_part.is_empty()
    && frac_part.chars().all(|c| c.is_ascii_digit())
    && !exponent.is_empty()
    && exponent.chars().all(|c| c.is_ascii_digit())
}

/// One judicial process as last seen on the remote source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
  pub id: ProcessId,
  pub tribunal: Option<String>,
  pub class_code: Option<i64>,
  pub class_name: Option<String>,
  pub system_code: Option<i64>,
  pub system_name: Option<String>,
  /// `dataHoraUltimaAtualizacao` as reported by the court system
  pub updated_at: Option<String>,
  /// Remaining source fields, stored untouched
  pub extra: BTreeMap<String, serde_json::Value>,
  /// When this row was last written by a sync run
  pub fetched_at: Option<DateTime<Utc>>,
}

/// A procedural event of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
  pub process_id: ProcessId,
  pub code: Option<i64>,
  pub name: Option<String>,
  pub occurred_at: Option<String>,
  pub body_code: Option<String>,
  pub body_name: Option<String>,
}

/// A row of the tracking list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterListEntry {
  pub id: ProcessId,
  /// Court system the process was first found in
  pub initial_tribunal: Option<String>,
  pub category: Option<String>,
  pub first_included: DateTime<Utc>,
  pub last_update: Option<DateTime<Utc>>,
}

/// Normalized result of a successful remote lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
  pub process: Process,
  pub movements: Vec<Movement>,
}

/// A validated row of an uploaded list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListRow {
  pub id: ProcessId,
  pub tribunal: Option<String>,
  pub category: Option<String>,
}

/// Parse the timestamp formats seen across court systems.
///
/// Naive values are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if s.is_empty() {
    return None;
  }

  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }

  const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%Y%m%d%H%M%S",
  ];
  for fmt in DATETIME_FORMATS {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
      return Some(dt.and_utc());
    }
  }

  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_parse_masked_number() {
    let id = ProcessId::parse("0425144-44.2016.8.19.0001").unwrap();
    assert_eq!(id.as_str(), "04251444420168190001");
    assert_eq!(id.masked(), "0425144-44.2016.8.19.0001");
  }

  #[test]
  fn test_parse_trims_and_strips() {
    let id = ProcessId::parse("  1234 567 ").unwrap();
    assert_eq!(id.as_str(), "1234567");
    assert_eq!(id.masked(), "1234567");
  }

  #[test]
  fn test_parse_scientific_notation() {
    let id = ProcessId::parse("1.5E+3").unwrap();
    assert_eq!(id.as_str(), "1500");

    let id = ProcessId::parse("1.01779912e+18").unwrap();
    assert_eq!(id.digit_count(), 19);
    assert!(id.as_str().starts_with("101779912"));
  }

  #[test]
  fn test_parse_rejects_empty_and_long() {
    assert_eq!(ProcessId::parse("abc").unwrap_err().reason, "no digits");
    assert!(ProcessId::parse("123456789012345678901").is_err());
  }

  #[test]
  fn test_parse_timestamp_formats() {
    let expected = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
    assert_eq!(parse_timestamp("2024-03-05T14:30:00Z"), Some(expected));
    assert_eq!(parse_timestamp("2024-03-05T11:30:00-03:00"), Some(expected));
    assert_eq!(parse_timestamp("2024-03-05T14:30:00.000"), Some(expected));
    assert_eq!(parse_timestamp("2024-03-05 14:30:00"), Some(expected));
    assert_eq!(parse_timestamp("05/03/2024 14:30:00"), Some(expected));
    assert_eq!(parse_timestamp("20240305143000"), Some(expected));
    assert_eq!(
      parse_timestamp("2024-03-05"),
      Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap())
    );
    assert_eq!(parse_timestamp("ontem"), None);
    assert_eq!(parse_timestamp(""), None);
  }
}
