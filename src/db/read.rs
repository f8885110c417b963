use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::datajud::types::{MasterListEntry, Movement, Process, ProcessId};

use super::{parse_ts, Store};

const MAX_PAGE: i64 = 1000;

/// Limit/offset pair, clamped to `1..=1000` and `>= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
  pub limit: i64,
  pub offset: i64,
}

impl Default for Page {
  fn default() -> Self {
    Self {
      limit: MAX_PAGE,
      offset: 0,
    }
  }
}

impl Page {
  pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
    Self {
      limit: limit.unwrap_or(MAX_PAGE).clamp(1, MAX_PAGE),
      offset: offset.unwrap_or(0).max(0),
    }
  }

  /// Apply to rows already in memory.
  pub fn slice<T: Clone>(&self, rows: &[T]) -> Vec<T> {
    rows
      .iter()
      .skip(self.offset as usize)
      .take(self.limit as usize)
      .cloned()
      .collect()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
  pub limit: i64,
  pub offset: i64,
  pub total: usize,
}

/// One page of rows plus the unpaginated total.
#[derive(Debug, Clone, Serialize)]
pub struct Listing<T> {
  pub data: Vec<T>,
  pub pagination: Pagination,
}

impl<T> Listing<T> {
  pub fn new(data: Vec<T>, page: Page, total: usize) -> Self {
    Self {
      data,
      pagination: Pagination {
        limit: page.limit,
        offset: page.offset,
        total,
      },
    }
  }
}

/// A stored process with its tracking category and latest movement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedRow {
  #[serde(rename = "numeroProcesso")]
  pub id: String,
  pub tribunal: Option<String>,
  #[serde(rename = "categoria")]
  pub category: Option<String>,
  #[serde(rename = "sistema_nome")]
  pub system_name: Option<String>,
  #[serde(rename = "dataHoraUltimaAtualizacao")]
  pub updated_at: Option<String>,
  #[serde(rename = "ultimoMovimento")]
  pub last_movement: Option<String>,
}

/// Everything known locally about one identifier.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessDetail {
  #[serde(rename = "processo")]
  pub process: Option<Process>,
  /// Latest movements first, at most [`DETAIL_MOVEMENTS`]
  #[serde(rename = "movimentos")]
  pub movements: Vec<Movement>,
  #[serde(rename = "total_movimentos")]
  pub total_movements: usize,
  #[serde(rename = "processos_lista")]
  pub master_entry: Option<MasterListEntry>,
}

pub const DETAIL_MOVEMENTS: i64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
  pub processes: usize,
  pub movements: usize,
  pub tracked: usize,
  /// Tracked entries without any sync attempt yet
  pub never_synced: usize,
}

impl Store {
  pub fn get_process(&self, id: &ProcessId) -> Result<Option<Process>> {
    self.read(|conn| {
      conn
        .query_row(
          &format!("{} WHERE numero_processo = ?1", PROCESS_SELECT),
          params![id.as_str()],
          RawProcess::from_row,
        )
        .optional()
        .map_err(|e| eyre!("Failed to read process {}: {}", id, e))?
        .map(RawProcess::into_process)
        .transpose()
    })
  }

  pub fn get_master_entry(&self, id: &ProcessId) -> Result<Option<MasterListEntry>> {
    self.read(|conn| {
      conn
        .query_row(
          &format!("{} WHERE numero_processo = ?1", ENTRY_SELECT),
          params![id.as_str()],
          RawEntry::from_row,
        )
        .optional()
        .map_err(|e| eyre!("Failed to read list entry {}: {}", id, e))?
        .map(RawEntry::into_entry)
        .transpose()
    })
  }

  /// The whole tracking list, oldest inclusion first.
  pub fn list_master_entries(&self) -> Result<Vec<MasterListEntry>> {
    self.read(|conn| {
      query_entries(
        conn,
        &format!("{} ORDER BY primeira_inclusao, numero_processo", ENTRY_SELECT),
        params![],
      )
    })
  }

  /// One page of the tracking list, newest inclusion first.
  pub fn tracked_page(&self, page: Page) -> Result<Listing<MasterListEntry>> {
    self.read(|conn| {
      let data = query_entries(
        conn,
        &format!(
          "{} ORDER BY primeira_inclusao DESC, numero_processo LIMIT ?1 OFFSET ?2",
          ENTRY_SELECT
        ),
        params![page.limit, page.offset],
      )?;
      let total = count(conn, "SELECT COUNT(*) FROM processos_lista", params![])?;
      Ok(Listing::new(data, page, total))
    })
  }

  /// Movements of `id`, latest first.
  pub fn movements(&self, id: &ProcessId, page: Page) -> Result<Vec<Movement>> {
    self.read(|conn| query_movements(conn, id, page))
  }

  pub fn movement_count(&self, id: &ProcessId) -> Result<usize> {
    self.read(|conn| {
      count(
        conn,
        "SELECT COUNT(*) FROM movimentos WHERE numero_processo = ?1",
        params![id.as_str()],
      )
    })
  }

  /// Process, latest movements and tracking entry of `id`.
  ///
  /// `None` when the identifier is unknown to every table.
  pub fn process_detail(&self, id: &ProcessId) -> Result<Option<ProcessDetail>> {
    let process = self.get_process(id)?;
    let master_entry = self.get_master_entry(id)?;
    let (movements, total_movements) = self.read(|conn| {
      let movements = query_movements(conn, id, Page::new(Some(DETAIL_MOVEMENTS), None))?;
      let total = count(
        conn,
        "SELECT COUNT(*) FROM movimentos WHERE numero_processo = ?1",
        params![id.as_str()],
      )?;
      Ok((movements, total))
    })?;

    if process.is_none() && master_entry.is_none() && total_movements == 0 {
      return Ok(None);
    }

    Ok(Some(ProcessDetail {
      process,
      movements,
      total_movements,
      master_entry,
    }))
  }

  pub fn counts(&self) -> Result<StoreCounts> {
    self.read(|conn| {
      Ok(StoreCounts {
        processes: count(conn, "SELECT COUNT(*) FROM processos", params![])?,
        movements: count(conn, "SELECT COUNT(*) FROM movimentos", params![])?,
        tracked: count(conn, "SELECT COUNT(*) FROM processos_lista", params![])?,
        never_synced: count(
          conn,
          "SELECT COUNT(*) FROM processos_lista WHERE ultimo_update IS NULL",
          params![],
        )?,
      })
    })
  }

  /// Every stored process joined with its tracking category and the name of
  /// its latest dated movement, ordered by process number.
  pub fn joined_rows(&self) -> Result<Vec<JoinedRow>> {
    self.read(|conn| {
      let mut stmt = conn
        .prepare(
          "WITH ultimo_movimento AS (
             SELECT numero_processo, mov_nome,
                    ROW_NUMBER() OVER (
                      PARTITION BY numero_processo ORDER BY mov_data_hora DESC
                    ) AS rn
             FROM movimentos
             WHERE mov_data_hora IS NOT NULL
           )
           SELECT p.numero_processo, p.tribunal, l.categoria, p.sistema_nome,
                  p.data_hora_ultima_atualizacao, m.mov_nome
           FROM processos p
           LEFT JOIN processos_lista l ON l.numero_processo = p.numero_processo
           LEFT JOIN ultimo_movimento m ON m.numero_processo = p.numero_processo AND m.rn = 1
           ORDER BY p.numero_processo",
        )
        .map_err(|e| eyre!("Failed to prepare joined query: {}", e))?;

      let rows = stmt
        .query_map([], |row| {
          Ok(JoinedRow {
            id: row.get(0)?,
            tribunal: row.get(1)?,
            category: row.get(2)?,
            system_name: row.get(3)?,
            updated_at: row.get(4)?,
            last_movement: row.get(5)?,
          })
        })
        .map_err(|e| eyre!("Failed to query joined rows: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read joined row: {}", e))?;

      Ok(rows)
    })
  }

  /// Distinct non-empty tribunals of stored processes, sorted.
  pub fn distinct_tribunals(&self) -> Result<Vec<String>> {
    self.read(|conn| {
      strings(
        conn,
        "SELECT DISTINCT TRIM(tribunal) AS t FROM processos
         WHERE tribunal IS NOT NULL AND TRIM(tribunal) <> ''
         ORDER BY t",
      )
    })
  }

  /// Raw categories of tracked entries whose process is stored.
  pub fn tracked_categories(&self) -> Result<Vec<String>> {
    self.read(|conn| {
      strings(
        conn,
        "SELECT DISTINCT l.categoria FROM processos_lista l
         JOIN processos p ON p.numero_processo = l.numero_processo
         WHERE l.categoria IS NOT NULL",
      )
    })
  }
}

const PROCESS_SELECT: &str = "SELECT numero_processo, tribunal, classe_codigo, classe_nome,
  sistema_codigo, sistema_nome, data_hora_ultima_atualizacao, extra, fetched_at
  FROM processos";

const ENTRY_SELECT: &str = "SELECT numero_processo, tribunal_inicial, categoria,
  primeira_inclusao, ultimo_update
  FROM processos_lista";

/// Column values as stored; timestamps and JSON are decoded afterwards.
struct RawProcess {
  id: String,
  tribunal: Option<String>,
  class_code: Option<i64>,
  class_name: Option<String>,
  system_code: Option<i64>,
  system_name: Option<String>,
  updated_at: Option<String>,
  extra: String,
  fetched_at: Option<String>,
}

impl RawProcess {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      tribunal: row.get(1)?,
      class_code: row.get(2)?,
      class_name: row.get(3)?,
      system_code: row.get(4)?,
      system_name: row.get(5)?,
      updated_at: row.get(6)?,
      extra: row.get(7)?,
      fetched_at: row.get(8)?,
    })
  }

  fn into_process(self) -> Result<Process> {
    let extra: BTreeMap<String, serde_json::Value> = serde_json::from_str(&self.extra)
      .map_err(|e| eyre!("Failed to deserialize process {}: {}", self.id, e))?;
    let fetched_at = self.fetched_at.as_deref().map(parse_ts).transpose()?;

    Ok(Process {
      id: stored_id(&self.id)?,
      tribunal: self.tribunal,
      class_code: self.class_code,
      class_name: self.class_name,
      system_code: self.system_code,
      system_name: self.system_name,
      updated_at: self.updated_at,
      extra,
      fetched_at,
    })
  }
}

struct RawEntry {
  id: String,
  initial_tribunal: Option<String>,
  category: Option<String>,
  first_included: String,
  last_update: Option<String>,
}

impl RawEntry {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      initial_tribunal: row.get(1)?,
      category: row.get(2)?,
      first_included: row.get(3)?,
      last_update: row.get(4)?,
    })
  }

  fn into_entry(self) -> Result<MasterListEntry> {
    Ok(MasterListEntry {
      id: stored_id(&self.id)?,
      initial_tribunal: self.initial_tribunal,
      category: self.category,
      first_included: parse_ts(&self.first_included)?,
      last_update: self.last_update.as_deref().map(parse_ts).transpose()?,
    })
  }
}

fn stored_id(raw: &str) -> Result<ProcessId> {
  ProcessId::parse(raw).map_err(|e| eyre!("Corrupt stored identifier: {}", e))
}

fn query_entries(
  conn: &Connection,
  sql: &str,
  params: impl rusqlite::Params,
) -> Result<Vec<MasterListEntry>> {
  let mut stmt = conn
    .prepare(sql)
    .map_err(|e| eyre!("Failed to prepare list query: {}", e))?;
  let raw = stmt
    .query_map(params, RawEntry::from_row)
    .map_err(|e| eyre!("Failed to query list entries: {}", e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| eyre!("Failed to read list entry: {}", e))?;

  raw.into_iter().map(RawEntry::into_entry).collect()
}

fn query_movements(conn: &Connection, id: &ProcessId, page: Page) -> Result<Vec<Movement>> {
  let mut stmt = conn
    .prepare(
      "SELECT mov_codigo, mov_nome, mov_data_hora, mov_orgao_codigo, mov_orgao_nome
       FROM movimentos WHERE numero_processo = ?1
       ORDER BY mov_data_hora DESC
       LIMIT ?2 OFFSET ?3",
    )
    .map_err(|e| eyre!("Failed to prepare movement query: {}", e))?;

  let movements = stmt
    .query_map(params![id.as_str(), page.limit, page.offset], |row| {
      Ok(Movement {
        process_id: id.clone(),
        code: row.get(0)?,
        name: row.get(1)?,
        occurred_at: row.get(2)?,
        body_code: row.get(3)?,
        body_name: row.get(4)?,
      })
    })
    .map_err(|e| eyre!("Failed to query movements of {}: {}", id, e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| eyre!("Failed to read movement of {}: {}", id, e))?;

  Ok(movements)
}

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<usize> {
  conn
    .query_row(sql, params, |row| row.get::<_, i64>(0))
    .map(|n| n as usize)
    .map_err(|e| eyre!("Failed to count rows: {}", e))
}

fn strings(conn: &Connection, sql: &str) -> Result<Vec<String>> {
  let mut stmt = conn
    .prepare(sql)
    .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
  let values = stmt
    .query_map([], |row| row.get::<_, String>(0))
    .map_err(|e| eyre!("Failed to run query: {}", e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| eyre!("Failed to read row: {}", e))?;
  Ok(values)
}
