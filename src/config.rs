use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::datajud::api_types::SchemaVariant;
use crate::sync::FreshnessBasis;

const DEFAULT_BASE_URL: &str = "https://api-publica.datajud.cnj.jus.br";

/// State courts queried by default, in static broadcast priority.
const DEFAULT_TRIBUNALS: &[&str] = &[
  "TJAC", "TJAL", "TJAM", "TJAP", "TJBA", "TJCE", "TJDFT", "TJES", "TJGO", "TJMA", "TJMG", "TJMS",
  "TJMT", "TJPA", "TJPB", "TJPE", "TJPI", "TJPR", "TJRJ", "TJRN", "TJRO", "TJRR", "TJRS", "TJSC",
  "TJSE", "TJSP", "TJTO",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub datajud: DataJudConfig,
  pub sync: SyncConfig,
  pub cache: CacheConfig,
  /// SQLite file (defaults to $XDG_DATA_HOME/datajud-sync/processos.db)
  pub database: Option<PathBuf>,
  /// Write logs to a daily rolling file in this directory instead of stderr
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataJudConfig {
  pub base_url: String,
  /// Seconds before a single lookup is abandoned
  pub request_timeout_secs: u64,
  /// Pause after every remote call, in milliseconds
  pub request_delay_ms: u64,
  /// `size` sent with every search; lookups by number return one hit
  pub page_size: u32,
  /// Court systems in static broadcast priority
  #[serde(deserialize_with = "deserialize_tribunals")]
  pub tribunals: Vec<TribunalConfig>,
}

impl Default for DataJudConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.to_string(),
      request_timeout_secs: 30,
      request_delay_ms: 300,
      page_size: 10,
      tribunals: DEFAULT_TRIBUNALS
        .iter()
        .map(|code| TribunalConfig::from_code(code))
        .collect(),
    }
  }
}

/// One remote court system.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TribunalConfig {
  pub code: String,
  /// Full search URL; derived from `base_url` and `code` when omitted
  pub url: Option<String>,
  #[serde(default)]
  pub schema: SchemaVariant,
}

impl TribunalConfig {
  pub fn from_code(code: &str) -> Self {
    Self {
      code: code.to_uppercase(),
      url: None,
      schema: SchemaVariant::default(),
    }
  }
}

/// Tribunals can be listed either as bare codes or as full entries.
fn deserialize_tribunals<'de, D>(deserializer: D) -> Result<Vec<TribunalConfig>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Entry {
    Code(String),
    Full(TribunalConfig),
  }

  let entries: Vec<Entry> = Vec::deserialize(deserializer)?;
  Ok(
    entries
      .into_iter()
      .map(|e| match e {
        Entry::Code(code) => TribunalConfig::from_code(&code),
        Entry::Full(mut t) => {
          t.code = t.code.to_uppercase();
          t
        }
      })
      .collect(),
  )
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// How old a process row may get before it is fetched again
  pub freshness_hours: u64,
  /// Which timestamp the freshness check looks at
  pub freshness_basis: FreshnessBasis,
  /// Remote lookups in flight at once
  pub concurrency: usize,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      freshness_hours: 24,
      freshness_basis: FreshnessBasis::default(),
      concurrency: 1,
    }
  }
}

impl SyncConfig {
  /// Saturates for windows too large to represent; `Config::parse` rejects
  /// those.
  pub fn freshness(&self) -> chrono::Duration {
    hours(self.freshness_hours).unwrap_or(chrono::Duration::MAX)
  }
}

fn hours(value: u64) -> Option<chrono::Duration> {
  i64::try_from(value).ok().and_then(chrono::Duration::try_hours)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self { enabled: true }
  }
}

impl DataJudConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn request_delay(&self) -> Duration {
    Duration::from_millis(self.request_delay_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./datajud-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/datajud-sync/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("datajud-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("datajud-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to unit, not to an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    if config.datajud.tribunals.is_empty() {
      return Err(eyre!("datajud.tribunals must list at least one court system"));
    }
    if hours(config.sync.freshness_hours).is_none() {
      return Err(eyre!(
        "sync.freshness_hours is out of range: {}",
        config.sync.freshness_hours
      ));
    }
    Ok(config)
  }

  /// Resolve the database path, falling back to the data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("datajud-sync").join("processos.db"))
  }

  /// Get the DataJud API key from environment variables.
  ///
  /// Checks DATAJUD_SYNC_APIKEY first, then DATAJUD_APIKEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("DATAJUD_SYNC_APIKEY")
      .or_else(|_| std::env::var("DATAJUD_APIKEY"))
      .map_err(|_| {
        eyre!("DataJud API key not found. Set DATAJUD_SYNC_APIKEY or DATAJUD_APIKEY environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_without_file() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.sync.concurrency, 1);
    assert_eq!(config.sync.freshness_hours, 24);
    assert_eq!(config.sync.freshness_basis, FreshnessBasis::Fetched);
    assert_eq!(config.datajud.tribunals.len(), DEFAULT_TRIBUNALS.len());
    assert_eq!(config.datajud.tribunals[0].code, "TJAC");
    assert!(config.cache.enabled);
  }

  #[test]
  fn test_partial_yaml_keeps_other_defaults() {
    let config = Config::parse(
      r#"
sync:
  concurrency: 4
cache:
  enabled: false
"#,
    )
    .unwrap();
    assert_eq!(config.sync.concurrency, 4);
    assert_eq!(config.sync.freshness_hours, 24);
    assert!(!config.cache.enabled);
    assert_eq!(config.datajud.request_delay_ms, 300);
  }

  #[test]
  fn test_tribunals_mixed_forms() {
    let config = Config::parse(
      r#"
datajud:
  tribunals:
    - tjsp
    - code: TJRJ
      schema: compact
    - code: TRT1
      url: "http://localhost:9200/trt1/_search"
"#,
    )
    .unwrap();
    let tribunals = &config.datajud.tribunals;
    assert_eq!(tribunals.len(), 3);
    assert_eq!(tribunals[0], TribunalConfig::from_code("TJSP"));
    assert_eq!(tribunals[1].schema, SchemaVariant::Compact);
    assert_eq!(
      tribunals[2].url.as_deref(),
      Some("http://localhost:9200/trt1/_search")
    );
  }

  #[test]
  fn test_empty_tribunal_list_rejected() {
    assert!(Config::parse("datajud:\n  tribunals: []\n").is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "sync:\n  freshness_hours: 6\n  freshness_basis: remote\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.sync.freshness(), chrono::Duration::hours(6));
    assert_eq!(config.sync.freshness_basis, FreshnessBasis::Remote);
  }

  #[test]
  fn test_out_of_range_freshness_is_rejected() {
    let err = Config::parse("sync:\n  freshness_hours: 9000000000000000\n").unwrap_err();
    assert!(err.to_string().contains("freshness_hours"));
    assert!(Config::parse("sync:\n  freshness_hours: 18446744073709551615\n").is_err());

    let huge = SyncConfig {
      freshness_hours: u64::MAX,
      ..SyncConfig::default()
    };
    assert_eq!(huge.freshness(), chrono::Duration::MAX);
  }

  #[test]
  fn test_missing_explicit_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
  }
}
