//! Serde-deserializable types matching DataJud search responses.
//!
//! Court systems do not agree on one document shape, so every endpoint carries a
//! [`SchemaVariant`] and the conversion into domain types dispatches on it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use super::types::{Movement, Process, ProcessId, RemoteRecord};

/// Document layout served by a court system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
  /// ISO timestamps, movement bodies under `codigoOrgao`/`nomeOrgao`
  #[default]
  Standard,
  /// `yyyyMMddHHmmss` timestamps, movement bodies under `codigo`/`nome`
  Compact,
}

// ============================================================================
// Search envelope
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiSearchResponse {
  pub hits: ApiHits,
}

#[derive(Debug, Deserialize)]
pub struct ApiHits {
  #[serde(default)]
  pub hits: Vec<ApiHit>,
}

#[derive(Debug, Deserialize)]
pub struct ApiHit {
  #[serde(rename = "_source")]
  pub source: ApiSource,
}

// ============================================================================
// Process document
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCoded {
  pub codigo: Option<i64>,
  pub nome: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiSource {
  pub tribunal: Option<String>,
  pub classe: Option<ApiCoded>,
  pub sistema: Option<ApiCoded>,
  #[serde(rename = "dataHoraUltimaAtualizacao")]
  pub updated_at: Option<String>,
  #[serde(default)]
  pub movimentos: Vec<ApiMovement>,
  // Everything else (grau, orgaoJulgador, formato, ...) passes through
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMovement {
  pub codigo: Option<i64>,
  pub nome: Option<String>,
  #[serde(rename = "dataHora")]
  pub data_hora: Option<String>,
  #[serde(rename = "orgaoJulgador")]
  pub orgao_julgador: Option<Value>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl SchemaVariant {
  fn timestamp(self, raw: Option<String>) -> Option<String> {
    match self {
      SchemaVariant::Standard => raw,
      SchemaVariant::Compact => raw.map(|s| expand_compact_timestamp(&s).unwrap_or(s)),
    }
  }

  fn body_keys(self) -> (&'static str, &'static str) {
    match self {
      SchemaVariant::Standard => ("codigoOrgao", "nomeOrgao"),
      SchemaVariant::Compact => ("codigo", "nome"),
    }
  }

  fn movement(self, id: &ProcessId, m: ApiMovement) -> Movement {
    let (code_key, name_key) = self.body_keys();
    let body = m.orgao_julgador.as_ref();
    Movement {
      process_id: id.clone(),
      code: m.codigo,
      name: m.nome,
      occurred_at: self.timestamp(m.data_hora),
      body_code: body.and_then(|b| scalar_text(b.get(code_key))),
      body_name: body.and_then(|b| scalar_text(b.get(name_key))),
    }
  }

  /// Map one source document into the fixed internal shape.
  pub fn normalize(self, id: &ProcessId, source: ApiSource) -> RemoteRecord {
    let movements = source
      .movimentos
      .into_iter()
      .map(|m| self.movement(id, m))
      .collect();

    let (class_code, class_name) = split_coded(source.classe);
    let (system_code, system_name) = split_coded(source.sistema);

    RemoteRecord {
      process: Process {
        id: id.clone(),
        tribunal: source.tribunal,
        class_code,
        class_name,
        system_code,
        system_name,
        updated_at: self.timestamp(source.updated_at),
        extra: source.extra,
        fetched_at: None,
      },
      movements,
    }
  }
}

/// Decode a search response body.
///
/// A number may come back once per degree. Process fields come from the most
/// recently updated document; movements are the union of every document's,
/// without repeats. Returns `None` when the search had no hits.
pub fn normalize_response(
  id: &ProcessId,
  body: &[u8],
  variant: SchemaVariant,
) -> serde_json::Result<Option<RemoteRecord>> {
  let response: ApiSearchResponse = serde_json::from_slice(body)?;

  let records: Vec<RemoteRecord> = response
    .hits
    .hits
    .into_iter()
    .map(|hit| variant.normalize(id, hit.source))
    .collect();

  let Some(latest) = records
    .iter()
    .enumerate()
    .max_by(|(_, a), (_, b)| a.process.updated_at.cmp(&b.process.updated_at))
    .map(|(i, _)| i)
  else {
    return Ok(None);
  };

  let mut seen = HashSet::new();
  let mut process = None;
  let mut movements = Vec::new();
  for (i, record) in records.into_iter().enumerate() {
    for m in record.movements {
      if seen.insert((m.code, m.occurred_at.clone(), m.name.clone())) {
        movements.push(m);
      }
    }
    if i == latest {
      process = Some(record.process);
    }
  }

  Ok(process.map(|process| RemoteRecord { process, movements }))
}

// ============================================================================
// Helpers
// ============================================================================

fn split_coded(coded: Option<ApiCoded>) -> (Option<i64>, Option<String>) {
  match coded {
    Some(c) => (c.codigo, c.nome),
    None => (None, None),
  }
}

/// Codes arrive as numbers on some courts and strings on others.
fn scalar_text(value: Option<&Value>) -> Option<String> {
  match value? {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn expand_compact_timestamp(raw: &str) -> Option<String> {
  NaiveDateTime::parse_from_str(raw.trim(), "%Y%m%d%H%M%S")
    .ok()
    .map(|dt| dt.and_utc().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}
