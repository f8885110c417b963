//! Write path. Every method takes the writer lock for one call and commits
//! before returning; observers are notified afterwards.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};

use crate::datajud::types::{ListRow, MasterListEntry, Movement, Process, ProcessId, RemoteRecord};

use super::{format_ts, Store};

impl Store {
  /// Insert or fully overwrite a process row.
  #[allow(dead_code)]
  pub fn upsert_process(&self, process: &Process) -> Result<()> {
    self.write(|conn| upsert_process(conn, process))
  }

  /// Replace the whole movement set of `id`.
  #[allow(dead_code)]
  pub fn replace_movements(&self, id: &ProcessId, movements: &[Movement]) -> Result<()> {
    self.write(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      replace_movements(&tx, id, movements)?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))
    })
  }

  /// Insert a tracking entry or merge into the existing one.
  ///
  /// `first_included` is only written on insert and `initial_tribunal` only
  /// fills a missing value.
  #[allow(dead_code)]
  pub fn upsert_master_entry(&self, entry: &MasterListEntry) -> Result<()> {
    self.write(|conn| {
      conn
        .execute(
          "INSERT INTO processos_lista
             (numero_processo, tribunal_inicial, categoria, primeira_inclusao, ultimo_update)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(numero_processo) DO UPDATE SET
             tribunal_inicial = COALESCE(processos_lista.tribunal_inicial, excluded.tribunal_inicial),
             categoria = COALESCE(excluded.categoria, processos_lista.categoria),
             ultimo_update = COALESCE(excluded.ultimo_update, processos_lista.ultimo_update)",
          params![
            entry.id.as_str(),
            entry.initial_tribunal,
            entry.category,
            format_ts(&entry.first_included),
            entry.last_update.as_ref().map(format_ts),
          ],
        )
        .map_err(|e| eyre!("Failed to upsert list entry {}: {}", entry.id, e))?;
      Ok(())
    })
  }

  /// Mark a sync attempt on `id`, creating the entry if needed.
  pub fn touch_master_entry(
    &self,
    id: &ProcessId,
    tribunal: Option<&str>,
    at: DateTime<Utc>,
  ) -> Result<()> {
    self.write(|conn| touch_master_entry(conn, id, tribunal, &at))
  }

  /// Commit one successful lookup: process, movements and tracking entry
  /// in a single transaction.
  pub fn record_fetch(&self, record: &RemoteRecord, tribunal: &str, at: DateTime<Utc>) -> Result<()> {
    let process = Process {
      fetched_at: Some(at),
      tribunal: record
        .process
        .tribunal
        .clone()
        .or_else(|| Some(tribunal.to_string())),
      ..record.process.clone()
    };

    self.write(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      upsert_process(&tx, &process)?;
      replace_movements(&tx, &process.id, &record.movements)?;
      touch_master_entry(&tx, &process.id, Some(tribunal), &at)?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit fetch of {}: {}", process.id, e))
    })
  }

  /// Track every uploaded identifier; returns how many were new.
  ///
  /// Existing entries only get a category when they had none.
  pub fn register_uploads(&self, rows: &[ListRow], at: DateTime<Utc>) -> Result<usize> {
    let included = format_ts(&at);
    self.write(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      let mut created = 0;
      {
        let mut insert = tx
          .prepare(
            "INSERT OR IGNORE INTO processos_lista
               (numero_processo, categoria, primeira_inclusao)
             VALUES (?1, ?2, ?3)",
          )
          .map_err(|e| eyre!("Failed to prepare insert: {}", e))?;
        let mut fill = tx
          .prepare(
            "UPDATE processos_lista SET categoria = ?2
             WHERE numero_processo = ?1 AND (categoria IS NULL OR TRIM(categoria) = '')",
          )
          .map_err(|e| eyre!("Failed to prepare update: {}", e))?;

        for row in rows {
          created += insert
            .execute(params![row.id.as_str(), row.category, included])
            .map_err(|e| eyre!("Failed to register {}: {}", row.id, e))?;
          if let Some(category) = &row.category {
            fill
              .execute(params![row.id.as_str(), category])
              .map_err(|e| eyre!("Failed to set category of {}: {}", row.id, e))?;
          }
        }
      }
      tx.commit()
        .map_err(|e| eyre!("Failed to commit upload: {}", e))?;
      Ok(created)
    })
  }

  /// Delete every process, movement and tracking entry.
  pub fn clear_all(&self) -> Result<()> {
    self.write(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      tx.execute_batch(
        "DELETE FROM movimentos;
         DELETE FROM processos;
         DELETE FROM processos_lista;",
      )
      .map_err(|e| eyre!("Failed to clear store: {}", e))?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit clear: {}", e))
    })
  }
}

fn upsert_process(conn: &Connection, p: &Process) -> Result<()> {
  let extra =
    serde_json::to_string(&p.extra).map_err(|e| eyre!("Failed to serialize process: {}", e))?;

  conn
    .execute(
      "INSERT INTO processos
         (numero_processo, tribunal, classe_codigo, classe_nome, sistema_codigo, sistema_nome,
          data_hora_ultima_atualizacao, extra, fetched_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
       ON CONFLICT(numero_processo) DO UPDATE SET
         tribunal = excluded.tribunal,
         classe_codigo = excluded.classe_codigo,
         classe_nome = excluded.classe_nome,
         sistema_codigo = excluded.sistema_codigo,
         sistema_nome = excluded.sistema_nome,
         data_hora_ultima_atualizacao = excluded.data_hora_ultima_atualizacao,
         extra = excluded.extra,
         fetched_at = excluded.fetched_at",
      params![
        p.id.as_str(),
        p.tribunal,
        p.class_code,
        p.class_name,
        p.system_code,
        p.system_name,
        p.updated_at,
        extra,
        p.fetched_at.as_ref().map(format_ts),
      ],
    )
    .map_err(|e| eyre!("Failed to upsert process {}: {}", p.id, e))?;

  Ok(())
}

fn replace_movements(conn: &Connection, id: &ProcessId, movements: &[Movement]) -> Result<()> {
  conn
    .execute(
      "DELETE FROM movimentos WHERE numero_processo = ?1",
      params![id.as_str()],
    )
    .map_err(|e| eyre!("Failed to delete movements of {}: {}", id, e))?;

  let mut stmt = conn
    .prepare(
      "INSERT INTO movimentos
         (numero_processo, mov_codigo, mov_nome, mov_data_hora, mov_orgao_codigo, mov_orgao_nome)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .map_err(|e| eyre!("Failed to prepare movement insert: {}", e))?;

  for m in movements {
    stmt
      .execute(params![
        id.as_str(),
        m.code,
        m.name,
        m.occurred_at,
        m.body_code,
        m.body_name,
      ])
      .map_err(|e| eyre!("Failed to insert movement of {}: {}", id, e))?;
  }

  Ok(())
}

fn touch_master_entry(
  conn: &Connection,
  id: &ProcessId,
  tribunal: Option<&str>,
  at: &DateTime<Utc>,
) -> Result<()> {
  let at = format_ts(at);
  conn
    .execute(
      "INSERT INTO processos_lista
         (numero_processo, tribunal_inicial, primeira_inclusao, ultimo_update)
       VALUES (?1, ?2, ?3, ?3)
       ON CONFLICT(numero_processo) DO UPDATE SET
         tribunal_inicial = COALESCE(processos_lista.tribunal_inicial, excluded.tribunal_inicial),
         ultimo_update = excluded.ultimo_update",
      params![id.as_str(), tribunal, at],
    )
    .map_err(|e| eyre!("Failed to touch list entry {}: {}", id, e))?;
  Ok(())
}
