use color_eyre::{eyre::eyre, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::future::Future;
use thiserror::Error;
use tracing::debug;

use crate::config::DataJudConfig;
use crate::sync::ErrorKind;

use super::api_types::normalize_response;
use super::routing::Endpoint;
use super::types::{ProcessId, RemoteRecord};

#[derive(Debug, Error)]
pub enum LookupError {
  #[error("request to {tribunal} failed: {source}")]
  Unavailable {
    tribunal: String,
    #[source]
    source: reqwest::Error,
  },
  #[error("{tribunal} returned {status}: {body}")]
  Http {
    tribunal: String,
    status: u16,
    body: String,
  },
  #[error("{tribunal} returned an unreadable payload: {source}")]
  Malformed {
    tribunal: String,
    #[source]
    source: serde_json::Error,
  },
}

impl LookupError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      LookupError::Unavailable { .. } | LookupError::Http { .. } => ErrorKind::RemoteUnavailable,
      LookupError::Malformed { .. } => ErrorKind::MalformedRemoteData,
    }
  }
}

/// Lookup of one process number on one court system.
///
/// `Ok(None)` is the valid negative answer: the court does not know the number.
pub trait RemoteLookup: Send + Sync {
  fn lookup(
    &self,
    endpoint: &Endpoint,
    id: &ProcessId,
  ) -> impl Future<Output = Result<Option<RemoteRecord>, LookupError>> + Send;
}

/// DataJud public API client
#[derive(Clone, Debug)]
pub struct DataJudClient {
  http: reqwest::Client,
  api_key: String,
  page_size: u32,
}

impl DataJudClient {
  pub fn new(config: &DataJudConfig, api_key: String) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(config.request_timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      api_key,
      page_size: config.page_size,
    })
  }

  /// Search one court system by process number
  pub async fn search(
    &self,
    endpoint: &Endpoint,
    id: &ProcessId,
  ) -> Result<Option<RemoteRecord>, LookupError> {
    let tribunal = endpoint.tribunal.clone();
    debug!(tribunal = %tribunal, process = %id, "querying court system");

    let response = self
      .http
      .post(endpoint.url.clone())
      .header(AUTHORIZATION, format!("APIKey {}", self.api_key))
      .header(CONTENT_TYPE, "application/json")
      .body(search_body(id, self.page_size))
      .send()
      .await
      .map_err(|source| LookupError::Unavailable {
        tribunal: tribunal.clone(),
        source,
      })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(LookupError::Http {
        tribunal,
        status: status.as_u16(),
        body,
      });
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|source| LookupError::Unavailable {
        tribunal: tribunal.clone(),
        source,
      })?;

    normalize_response(id, &bytes, endpoint.schema)
      .map_err(|source| LookupError::Malformed { tribunal, source })
  }
}

fn search_body(id: &ProcessId, size: u32) -> String {
  serde_json::json!({
    "size": size,
    "query": {
      "match": {
        "numeroProcesso": id.as_str()
      }
    }
  })
  .to_string()
}

impl RemoteLookup for DataJudClient {
  fn lookup(
    &self,
    endpoint: &Endpoint,
    id: &ProcessId,
  ) -> impl Future<Output = Result<Option<RemoteRecord>, LookupError>> + Send {
    self.search(endpoint, id)
  }
}
