//! Narrows the court systems a lookup has to probe.
//!
//! With a known court-system hint only that endpoint is queried. Without one
//! every endpoint is probed, most recently successful first.

use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::config::DataJudConfig;

use super::api_types::SchemaVariant;
use super::types::ProcessId;

/// Search endpoint of one court system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
  pub tribunal: String,
  pub url: Url,
  pub schema: SchemaVariant,
}

/// State courts by state abbreviation and full name, as spreadsheets spell them.
const STATE_COURTS: &[(&str, &str, &str)] = &[
  ("AC", "TJAC", "TRIBUNAL DE JUSTIÇA DO ACRE"),
  ("AL", "TJAL", "TRIBUNAL DE JUSTIÇA DE ALAGOAS"),
  ("AM", "TJAM", "TRIBUNAL DE JUSTIÇA DO AMAZONAS"),
  ("AP", "TJAP", "TRIBUNAL DE JUSTIÇA DO AMAPÁ"),
  ("BA", "TJBA", "TRIBUNAL DE JUSTIÇA DA BAHIA"),
  ("CE", "TJCE", "TRIBUNAL DE JUSTIÇA DO CEARÁ"),
  ("DF", "TJDFT", "TRIBUNAL DE JUSTIÇA DO DISTRITO FEDERAL"),
  ("ES", "TJES", "TRIBUNAL DE JUSTIÇA DO ESPÍRITO SANTO"),
  ("GO", "TJGO", "TRIBUNAL DE JUSTIÇA DE GOIÁS"),
  ("MA", "TJMA", "TRIBUNAL DE JUSTIÇA DO MARANHÃO"),
  ("MG", "TJMG", "TRIBUNAL DE JUSTIÇA DE MINAS GERAIS"),
  ("MS", "TJMS", "TRIBUNAL DE JUSTIÇA DE MATO GROSSO DO SUL"),
  ("MT", "TJMT", "TRIBUNAL DE JUSTIÇA DE MATO GROSSO"),
  ("PA", "TJPA", "TRIBUNAL DE JUSTIÇA DO PARÁ"),
  ("PB", "TJPB", "TRIBUNAL DE JUSTIÇA DA PARAIBA"),
  ("PE", "TJPE", "TRIBUNAL DE JUSTIÇA DE PERNAMBUCO"),
  ("PI", "TJPI", "TRIBUNAL DE JUSTIÇA DO PIAUÍ"),
  ("PR", "TJPR", "TRIBUNAL DE JUSTIÇA DO PARANÁ"),
  ("RJ", "TJRJ", "TRIBUNAL DE JUSTIÇA DO RIO DE JANEIRO"),
  ("RN", "TJRN", "TRIBUNAL DE JUSTIÇA DO RIO GRANDE DO NORTE"),
  ("RO", "TJRO", "TRIBUNAL DE JUSTIÇA DE RONDÔNIA"),
  ("RR", "TJRR", "TRIBUNAL DE JUSTIÇA DE RORAIMA"),
  ("RS", "TJRS", "TRIBUNAL DE JUSTIÇA DO RIO GRANDE DO SUL"),
  ("SC", "TJSC", "TRIBUNAL DE JUSTIÇA DE SANTA CATARINA"),
  ("SE", "TJSE", "TRIBUNAL DE JUSTIÇA DE SERGIPE"),
  ("SP", "TJSP", "TRIBUNAL DE JUSTIÇA DE SÃO PAULO"),
  ("TO", "TJTO", "TRIBUNAL DE JUSTIÇA DO TOCANTINS"),
];

#[derive(Debug)]
pub struct Router {
  /// Static priority order
  endpoints: Vec<Endpoint>,
  /// Tribunal codes, most recent hit first
  recent: Mutex<Vec<String>>,
}

impl Router {
  pub fn new(endpoints: Vec<Endpoint>) -> Self {
    Self {
      endpoints,
      recent: Mutex::new(Vec::new()),
    }
  }

  /// Build the endpoint table from configuration.
  ///
  /// Endpoints without an explicit URL live at `<base>/api_publica_<code>/_search`.
  pub fn from_config(config: &DataJudConfig) -> Result<Self> {
    let base = config.base_url.trim_end_matches('/');
    let endpoints = config
      .tribunals
      .iter()
      .map(|t| {
        let raw = match &t.url {
          Some(url) => url.clone(),
          None => format!("{}/api_publica_{}/_search", base, t.code.to_lowercase()),
        };
        let url = Url::parse(&raw)
          .map_err(|e| eyre!("Invalid endpoint URL for {}: {} ({})", t.code, raw, e))?;
        Ok(Endpoint {
          tribunal: t.code.clone(),
          url,
          schema: t.schema,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self::new(endpoints))
  }

  pub fn endpoints(&self) -> &[Endpoint] {
    &self.endpoints
  }

  /// Map a spreadsheet spelling of a court system onto a configured endpoint.
  ///
  /// Accepts `TJSP`, `tjsp`, `TJ-SP`, `SP` and the full court name.
  pub fn resolve(&self, hint: &str) -> Option<&Endpoint> {
    let upper = hint.trim().to_uppercase();
    if upper.is_empty() {
      return None;
    }

    let dashless = upper.replace('-', "");
    let code = STATE_COURTS
      .iter()
      .find(|(state, code, name)| {
        upper == *state || upper == *name || dashless == *code || dashless == format!("TJ{}", state)
      })
      .map(|(_, code, _)| code.to_string())
      .unwrap_or(dashless);

    self.endpoints.iter().find(|e| e.tribunal == code)
  }

  /// Ordered endpoints to probe for `id`.
  pub fn candidates(&self, id: &ProcessId, known_tribunal: Option<&str>) -> Vec<Endpoint> {
    if let Some(hint) = known_tribunal {
      match self.resolve(hint) {
        Some(endpoint) => {
          debug!(process = %id, tribunal = %endpoint.tribunal, "routing to hinted court system");
          return vec![endpoint.clone()];
        }
        None => {
          warn!(process = %id, hint = %hint, "unrecognized court system hint, probing all");
        }
      }
    }

    let recent = self.recent.lock().map(|r| r.clone()).unwrap_or_default();

    let mut ordered: Vec<Endpoint> = recent
      .iter()
      .filter_map(|code| self.endpoints.iter().find(|e| &e.tribunal == code))
      .cloned()
      .collect();
    ordered.extend(
      self
        .endpoints
        .iter()
        .filter(|e| !recent.contains(&e.tribunal))
        .cloned(),
    );

    debug!(process = %id, candidates = ordered.len(), "probing all court systems");
    ordered
  }

  /// Move `tribunal` to the front of the broadcast order.
  pub fn record_success(&self, tribunal: &str) {
    if let Ok(mut recent) = self.recent.lock() {
      recent.retain(|code| code != tribunal);
      recent.insert(0, tribunal.to_string());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::TribunalConfig;

  fn router(codes: &[&str]) -> Router {
    let config = DataJudConfig {
      tribunals: codes.iter().map(|c| TribunalConfig::from_code(c)).collect(),
      ..DataJudConfig::default()
    };
    Router::from_config(&config).unwrap()
  }

  fn codes(endpoints: &[Endpoint]) -> Vec<&str> {
    endpoints.iter().map(|e| e.tribunal.as_str()).collect()
  }

  fn id() -> ProcessId {
    ProcessId::parse("0001").unwrap()
  }

  #[test]
  fn test_hint_yields_single_candidate() {
    let r = router(&["TJAC", "TJRJ", "TJSP"]);
    let candidates = r.candidates(&id(), Some("TJSP"));
    assert_eq!(codes(&candidates), vec!["TJSP"]);
    assert_eq!(
      candidates[0].url.as_str(),
      "https://api-publica.datajud.cnj.jus.br/api_publica_tjsp/_search"
    );
  }

  #[test]
  fn test_no_hint_yields_static_order() {
    let r = router(&["TJAC", "TJRJ", "TJSP"]);
    assert_eq!(codes(&r.candidates(&id(), None)), vec!["TJAC", "TJRJ", "TJSP"]);
  }

  #[test]
  fn test_unknown_hint_falls_back_to_broadcast() {
    let r = router(&["TJAC", "TJSP"]);
    assert_eq!(codes(&r.candidates(&id(), Some("TRF9"))), vec!["TJAC", "TJSP"]);
  }

  #[test]
  fn test_hint_aliases() {
    let r = router(&["TJDFT", "TJSP"]);
    for hint in ["tjsp", "TJ-SP", "SP", " sp ", "Tribunal de Justiça de São Paulo"] {
      assert_eq!(r.resolve(hint).map(|e| e.tribunal.as_str()), Some("TJSP"), "{}", hint);
    }
    assert_eq!(r.resolve("TJ-DF").map(|e| e.tribunal.as_str()), Some("TJDFT"));
    assert_eq!(r.resolve("DF").map(|e| e.tribunal.as_str()), Some("TJDFT"));
    assert!(r.resolve("TJRJ").is_none());
    assert!(r.resolve("").is_none());
  }

  #[test]
  fn test_recent_success_goes_first() {
    let r = router(&["TJAC", "TJRJ", "TJSP"]);
    r.record_success("TJSP");
    assert_eq!(codes(&r.candidates(&id(), None)), vec!["TJSP", "TJAC", "TJRJ"]);

    r.record_success("TJRJ");
    assert_eq!(codes(&r.candidates(&id(), None)), vec!["TJRJ", "TJSP", "TJAC"]);

    // Hints are unaffected by recency
    assert_eq!(codes(&r.candidates(&id(), Some("AC"))), vec!["TJAC"]);
  }

  #[test]
  fn test_explicit_url_is_kept() {
    let config = DataJudConfig {
      tribunals: vec![TribunalConfig {
        code: "TRT1".to_string(),
        url: Some("http://localhost:9200/trt1/_search".to_string()),
        schema: SchemaVariant::Compact,
      }],
      ..DataJudConfig::default()
    };
    let r = Router::from_config(&config).unwrap();
    assert_eq!(r.endpoints()[0].url.as_str(), "http://localhost:9200/trt1/_search");
    assert_eq!(r.endpoints()[0].schema, SchemaVariant::Compact);
  }
}
