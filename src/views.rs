//! Derived views over the store, memoized in the view cache.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheKey, CacheStats, ViewCache};
use crate::datajud::types::{parse_timestamp, ProcessId};
use crate::db::{JoinedRow, Listing, Page, Store};

// ============================================================================
// Keys
// ============================================================================

/// Filter over joined rows; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinedFilter {
  pub id: Option<String>,
  pub tribunal: Option<String>,
  pub category: Option<String>,
}

impl JoinedFilter {
  fn is_empty(&self) -> bool {
    self.id.is_none() && self.tribunal.is_none() && self.category.is_none()
  }

  fn matches(&self, row: &JoinedRow) -> bool {
    let id = self
      .id
      .as_deref()
      .map(|raw| ProcessId::parse(raw).map(|id| id.as_str() == row.id).unwrap_or(false))
      .unwrap_or(true);
    let tribunal = self
      .tribunal
      .as_deref()
      .map(|t| row.tribunal.as_deref() == Some(t))
      .unwrap_or(true);
    let category = self
      .category
      .as_deref()
      .map(|c| row.category.as_deref() == clean_category(c).as_deref())
      .unwrap_or(true);
    id && tribunal && category
  }

  /// Length-prefixed so no field value can mimic a separator.
  fn canonical(&self) -> String {
    [&self.id, &self.tribunal, &self.category]
      .iter()
      .map(|field| match field {
        Some(value) => format!("{}:{}", value.len(), value),
        None => "-".to_string(),
      })
      .collect::<Vec<_>>()
      .join("|")
  }
}

#[derive(Debug, Clone)]
pub enum ViewKey {
  Tribunals,
  Categories,
  Joined(JoinedFilter),
  /// One entry per filter; the value records the instant it was bucketed for
  Updates(JoinedFilter),
  Summary,
}

impl CacheKey for ViewKey {
  fn cache_hash(&self) -> String {
    let input = match self {
      Self::Tribunals => "tribunals".to_string(),
      Self::Categories => "categories".to_string(),
      Self::Joined(filter) => format!("joined:{}", filter.canonical()),
      Self::Updates(filter) => format!("updates:{}", filter.canonical()),
      Self::Summary => "summary".to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    match self {
      Self::Tribunals => "tribunal list".to_string(),
      Self::Categories => "category list".to_string(),
      Self::Joined(filter) if filter.is_empty() => "joined rows".to_string(),
      Self::Joined(filter) => format!("joined rows [{}]", filter.canonical()),
      Self::Updates(filter) => format!("updates by period [{}]", filter.canonical()),
      Self::Summary => "summary".to_string(),
    }
  }
}

// ============================================================================
// View shapes
// ============================================================================

/// Joined rows grouped by age of the court's last update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdatesByPeriod {
  /// Instant the ages were measured from
  pub as_of: DateTime<Utc>,
  pub ultimas_24h: Vec<JoinedRow>,
  pub ultimos_7_dias: Vec<JoinedRow>,
  pub ultimo_mes: Vec<JoinedRow>,
  pub ultimo_ano: Vec<JoinedRow>,
  /// Also holds rows without a readable timestamp
  pub mais_de_um_ano: Vec<JoinedRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
  pub total_processes: usize,
  pub unique_processes: usize,
  pub with_movements: usize,
  pub without_movements: usize,
  pub categories: BTreeMap<String, usize>,
  pub tribunals: BTreeMap<String, usize>,
}

/// Current filter choices, emitted after a sync run.
#[derive(Debug, Clone, Serialize)]
pub struct FilterLists {
  pub tribunais: Vec<String>,
  pub categorias: Vec<String>,
}

/// Trim a spreadsheet category; blank becomes `None`.
pub fn clean_category(raw: &str) -> Option<String> {
  let cleaned = raw.replace('\u{a0}', " ").trim().to_string();
  (!cleaned.is_empty()).then_some(cleaned)
}

pub fn group_by_period(rows: &[JoinedRow], now: DateTime<Utc>) -> UpdatesByPeriod {
  let mut grouped = UpdatesByPeriod {
    as_of: now,
    ..UpdatesByPeriod::default()
  };

  for row in rows {
    let age = row
      .updated_at
      .as_deref()
      .and_then(parse_timestamp)
      .map(|ts| now - ts);

    let bucket = match age {
      Some(age) if age <= Duration::hours(24) => &mut grouped.ultimas_24h,
      Some(age) if age <= Duration::days(7) => &mut grouped.ultimos_7_dias,
      Some(age) if age <= Duration::days(30) => &mut grouped.ultimo_mes,
      Some(age) if age <= Duration::days(365) => &mut grouped.ultimo_ano,
      _ => &mut grouped.mais_de_um_ano,
    };
    bucket.push(row.clone());
  }

  grouped
}

fn same_minute(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
  a.timestamp().div_euclid(60) == b.timestamp().div_euclid(60)
}

fn summarize(rows: &[JoinedRow]) -> Summary {
  let mut summary = Summary {
    total_processes: rows.len(),
    unique_processes: rows.iter().map(|r| &r.id).collect::<BTreeSet<_>>().len(),
    ..Summary::default()
  };

  for row in rows {
    if row.last_movement.is_some() {
      summary.with_movements += 1;
    } else {
      summary.without_movements += 1;
    }
    if let Some(category) = &row.category {
      *summary.categories.entry(category.clone()).or_default() += 1;
    }
    if let Some(tribunal) = &row.tribunal {
      *summary.tribunals.entry(tribunal.clone()).or_default() += 1;
    }
  }

  summary
}

// ============================================================================
// Service
// ============================================================================

/// Read side: every view goes through the cache.
#[derive(Clone)]
pub struct ViewService {
  store: Arc<Store>,
  cache: ViewCache,
}

impl ViewService {
  /// Wire `cache` to `store` writes.
  pub fn new(store: Arc<Store>, cache: ViewCache) -> Self {
    store.subscribe(Arc::new(cache.clone()));
    Self { store, cache }
  }

  fn cached<T: Send + Sync + 'static>(
    &self,
    key: ViewKey,
    build: impl FnOnce() -> Result<T>,
  ) -> Result<Arc<T>> {
    let result = self.cache.get_or_build(&key, build)?;
    debug!(view = %key.description(), source = ?result.source, "view served");
    Ok(result.data)
  }

  pub fn tribunals(&self) -> Result<Arc<Vec<String>>> {
    self.cached(ViewKey::Tribunals, || self.store.distinct_tribunals())
  }

  /// Categories of tracked processes that are stored.
  pub fn categories(&self) -> Result<Arc<Vec<String>>> {
    self.cached(ViewKey::Categories, || {
      let cleaned: BTreeSet<String> = self
        .store
        .tracked_categories()?
        .iter()
        .filter_map(|c| clean_category(c))
        .collect();
      Ok(cleaned.into_iter().collect())
    })
  }

  pub fn joined(&self, filter: &JoinedFilter) -> Result<Arc<Vec<JoinedRow>>> {
    if filter.is_empty() {
      return self.cached(ViewKey::Joined(JoinedFilter::default()), || {
        let rows = self
          .store
          .joined_rows()?
          .into_iter()
          .map(|row| JoinedRow {
            category: row.category.as_deref().and_then(clean_category),
            ..row
          })
          .collect();
        Ok(rows)
      });
    }

    self.cached(ViewKey::Joined(filter.clone()), || {
      let all = self.joined(&JoinedFilter::default())?;
      Ok(all.iter().filter(|row| filter.matches(row)).cloned().collect())
    })
  }

  /// One page of joined rows, ordered by process number.
  pub fn list_processes(&self, filter: &JoinedFilter, page: Page) -> Result<Listing<JoinedRow>> {
    let rows = self.joined(filter)?;
    Ok(Listing::new(page.slice(&rows), page, rows.len()))
  }

  pub fn updates_by_period(&self, filter: &JoinedFilter) -> Result<Arc<UpdatesByPeriod>> {
    self.updates_at(filter, Utc::now())
  }

  /// Bucketing depends on the clock: a view measured in an earlier minute is
  /// replaced rather than kept next to the new one.
  fn updates_at(&self, filter: &JoinedFilter, now: DateTime<Utc>) -> Result<Arc<UpdatesByPeriod>> {
    let key = ViewKey::Updates(filter.clone());
    let build = || Ok(group_by_period(&self.joined(filter)?, now));

    let view = self.cached(key.clone(), build)?;
    if same_minute(view.as_of, now) {
      return Ok(view);
    }
    self.cache.remove(&key);
    self.cached(key, build)
  }

  pub fn summary(&self) -> Result<Arc<Summary>> {
    self.cached(ViewKey::Summary, || {
      Ok(summarize(&self.joined(&JoinedFilter::default())?))
    })
  }

  pub fn filter_lists(&self) -> Result<FilterLists> {
    Ok(FilterLists {
      tribunais: self.tribunals()?.to_vec(),
      categorias: self.categories()?.to_vec(),
    })
  }

  pub fn cache_stats(&self) -> CacheStats {
    self.cache.stats()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::datajud::types::ListRow;
  use crate::db::fixtures::{at, pid, process, record};
  use chrono::TimeZone;

  fn service() -> ViewService {
    ViewService::new(Arc::new(Store::open_in_memory().unwrap()), ViewCache::memory())
  }

  fn upload(service: &ViewService, raw: &str, category: &str) {
    service
      .store
      .register_uploads(
        &[ListRow {
          id: pid(raw),
          tribunal: None,
          category: Some(category.to_string()),
        }],
        at(1),
      )
      .unwrap();
  }

  fn joined_row(id: &str, updated_at: Option<&str>) -> JoinedRow {
    JoinedRow {
      id: id.to_string(),
      tribunal: Some("TJSP".to_string()),
      category: None,
      system_name: None,
      updated_at: updated_at.map(String::from),
      last_movement: None,
    }
  }

  #[test]
  fn test_view_rebuilds_after_store_write() {
    let service = service();
    service
      .store
      .record_fetch(&record("0001", "TJSP", &[]), "TJSP", at(1))
      .unwrap();

    assert_eq!(*service.tribunals().unwrap(), vec!["TJSP"]);
    assert_eq!(*service.tribunals().unwrap(), vec!["TJSP"]);
    assert_eq!(service.cache_stats().hits, 1);

    service
      .store
      .record_fetch(&record("0002", "TJRJ", &[]), "TJRJ", at(2))
      .unwrap();

    assert_eq!(*service.tribunals().unwrap(), vec!["TJRJ", "TJSP"]);
    assert_eq!(service.cache_stats().hits, 1);
  }

  #[test]
  fn test_categories_are_cleaned_and_limited_to_stored() {
    let service = service();
    upload(&service, "0001", "\u{a0}Cível ");
    upload(&service, "0002", "Cível");
    upload(&service, "0003", "   ");
    upload(&service, "0004", "Trabalhista");
    for raw in ["0001", "0002", "0003"] {
      service
        .store
        .record_fetch(&record(raw, "TJSP", &[]), "TJSP", at(2))
        .unwrap();
    }

    assert_eq!(*service.categories().unwrap(), vec!["Cível"]);
  }

  #[test]
  fn test_joined_filters_and_pages() {
    let service = service();
    upload(&service, "0001", "Cível ");
    upload(&service, "0002", "Trabalhista");
    service
      .store
      .record_fetch(&record("0001", "TJSP", &[("Sentença", "2024-01-01T00:00:00Z")]), "TJSP", at(2))
      .unwrap();
    service
      .store
      .record_fetch(&record("0002", "TJRJ", &[]), "TJRJ", at(2))
      .unwrap();
    service
      .store
      .upsert_process(&process("0003", "TJSP", "2024-01-01T00:00:00Z"))
      .unwrap();

    let all = service.joined(&JoinedFilter::default()).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].category.as_deref(), Some("Cível"));

    let tjsp = service
      .joined(&JoinedFilter {
        tribunal: Some("TJSP".to_string()),
        ..JoinedFilter::default()
      })
      .unwrap();
    let ids: Vec<_> = tjsp.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["0001", "0003"]);

    let civil = service
      .joined(&JoinedFilter {
        category: Some("Cível".to_string()),
        ..JoinedFilter::default()
      })
      .unwrap();
    assert_eq!(civil.len(), 1);
    assert_eq!(civil[0].last_movement.as_deref(), Some("Sentença"));

    let by_id = service
      .joined(&JoinedFilter {
        id: Some("00-02".to_string()),
        ..JoinedFilter::default()
      })
      .unwrap();
    assert_eq!(by_id[0].id, "0002");

    let page = service
      .list_processes(&JoinedFilter::default(), Page::new(Some(2), Some(1)))
      .unwrap();
    assert_eq!(page.pagination.total, 3);
    let ids: Vec<_> = page.data.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["0002", "0003"]);
  }

  #[test]
  fn test_group_by_period_boundaries() {
    let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
    let rows = vec![
      joined_row("a", Some("2024-06-29T12:00:00Z")),
      joined_row("b", Some("2024-06-25 08:00:00")),
      joined_row("c", Some("2024-06-01")),
      joined_row("d", Some("01/01/2024 00:00:00")),
      joined_row("e", Some("2023-01-01T00:00:00.000Z")),
      joined_row("f", None),
      joined_row("g", Some("sem data")),
    ];

    let grouped = group_by_period(&rows, now);
    let ids = |rows: &[JoinedRow]| rows.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&grouped.ultimas_24h), vec!["a"]);
    assert_eq!(ids(&grouped.ultimos_7_dias), vec!["b"]);
    assert_eq!(ids(&grouped.ultimo_mes), vec!["c"]);
    assert_eq!(ids(&grouped.ultimo_ano), vec!["d"]);
    assert_eq!(ids(&grouped.mais_de_um_ano), vec!["e", "f", "g"]);
  }

  #[test]
  fn test_summary() {
    let service = service();
    upload(&service, "0001", "Cível");
    service
      .store
      .record_fetch(&record("0001", "TJSP", &[("Sentença", "2024-01-01T00:00:00Z")]), "TJSP", at(2))
      .unwrap();
    service
      .store
      .record_fetch(&record("0002", "TJRJ", &[]), "TJRJ", at(2))
      .unwrap();

    let summary = service.summary().unwrap();
    assert_eq!(summary.total_processes, 2);
    assert_eq!(summary.unique_processes, 2);
    assert_eq!((summary.with_movements, summary.without_movements), (1, 1));
    assert_eq!(summary.categories.get("Cível"), Some(&1));
    assert_eq!(summary.tribunals.get("TJRJ"), Some(&1));
  }

  #[test]
  fn test_view_keys_are_distinct() {
    let a = ViewKey::Joined(JoinedFilter {
      tribunal: Some("TJSP".to_string()),
      ..JoinedFilter::default()
    });
    let b = ViewKey::Joined(JoinedFilter {
      category: Some("TJSP".to_string()),
      ..JoinedFilter::default()
    });
    assert_ne!(a.cache_hash(), b.cache_hash());
    assert_eq!(a.cache_hash().len(), 64);
    assert_ne!(ViewKey::Tribunals.cache_hash(), ViewKey::Categories.cache_hash());

    // Separators inside values do not shift fields
    let piped = ViewKey::Joined(JoinedFilter {
      tribunal: Some("TJSP|Cível".to_string()),
      ..JoinedFilter::default()
    });
    let split = ViewKey::Joined(JoinedFilter {
      tribunal: Some("TJSP".to_string()),
      category: Some("Cível".to_string()),
      ..JoinedFilter::default()
    });
    assert_ne!(piped.cache_hash(), split.cache_hash());

    let blank = ViewKey::Joined(JoinedFilter {
      id: Some(String::new()),
      ..JoinedFilter::default()
    });
    assert_ne!(blank.cache_hash(), ViewKey::Joined(JoinedFilter::default()).cache_hash());
  }

  #[test]
  fn test_period_view_is_replaced_each_minute() {
    let service = service();
    service
      .store
      .record_fetch(&record("0001", "TJSP", &[]), "TJSP", at(1))
      .unwrap();
    let filter = JoinedFilter::default();
    let t0 = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 5).unwrap();

    let first = service.updates_at(&filter, t0).unwrap();
    assert_eq!(first.as_of, t0);
    let entries = service.cache_stats().entries;

    let same = service.updates_at(&filter, t0 + Duration::seconds(30)).unwrap();
    assert!(Arc::ptr_eq(&first, &same));

    for minutes in 1..=3 {
      let later = t0 + Duration::minutes(minutes);
      let view = service.updates_at(&filter, later).unwrap();
      assert_eq!(view.as_of, later);
    }
    assert_eq!(service.cache_stats().entries, entries);
  }
}
