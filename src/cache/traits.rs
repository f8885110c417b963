//! Core traits and types for the view cache.

use chrono::{DateTime, Utc};

/// Key of a derived view.
///
/// Two keys with the same hash address the same cached value.
pub trait CacheKey {
  /// Stable, fixed-length key
  fn cache_hash(&self) -> String;

  /// Human-readable form for logs
  fn description(&self) -> String;
}

/// A view together with where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the value was built
  pub built_at: DateTime<Utc>,
}

impl<T> CacheResult<T> {
  pub fn hit(data: T, built_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Hit,
      built_at,
    }
  }

  pub fn built(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Built,
      built_at: Utc::now(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Served from the cache
  Hit,
  /// Recomputed from the store
  Built,
}
