//! Cache layer that memoizes derived views until the next store write.

use color_eyre::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::db::WriteObserver;

use super::storage::{CacheStorage, CachedView, MemoryStorage, NoopStorage};
use super::traits::{CacheKey, CacheResult};

#[derive(Default)]
struct Counters {
  hits: AtomicU64,
  misses: AtomicU64,
  invalidations: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub invalidations: u64,
  pub generation: u64,
  /// Views currently stored
  pub entries: usize,
}

/// Whole-cache invalidation: every write bumps the generation, and values
/// built under an older generation are never served.
pub struct ViewCache {
  storage: Arc<dyn CacheStorage>,
  generation: Arc<AtomicU64>,
  counters: Arc<Counters>,
}

impl ViewCache {
  /// Create a cache over the given storage backend.
  pub fn new<S: CacheStorage + 'static>(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      generation: Arc::new(AtomicU64::new(0)),
      counters: Arc::new(Counters::default()),
    }
  }

  pub fn memory() -> Self {
    Self::new(MemoryStorage::new())
  }

  /// Every lookup rebuilds.
  pub fn disabled() -> Self {
    Self::new(NoopStorage)
  }

  /// Return the view stored under `key`, building it with `build` when it is
  /// missing or was built before the last invalidation.
  pub fn get_or_build<K, T, F>(&self, key: &K, build: F) -> Result<CacheResult<Arc<T>>>
  where
    K: CacheKey,
    T: Send + Sync + 'static,
    F: FnOnce() -> Result<T>,
  {
    let hash = key.cache_hash();
    let generation = self.generation.load(Ordering::SeqCst);

    if let Some(cached) = self.storage.get(&hash) {
      if cached.generation == generation {
        if let Ok(value) = cached.value.downcast::<T>() {
          self.counters.hits.fetch_add(1, Ordering::Relaxed);
          debug!(view = %key.description(), "view cache hit");
          return Ok(CacheResult::hit(value, cached.built_at));
        }
      }
    }

    self.counters.misses.fetch_add(1, Ordering::Relaxed);
    debug!(view = %key.description(), generation, "building view");
    let value = Arc::new(build()?);

    // Tagged with the generation read before building, so a write that
    // lands mid-build leaves this entry unusable.
    let built = CacheResult::built(Arc::clone(&value));
    self.storage.put(
      &hash,
      CachedView {
        value: value as Arc<dyn std::any::Any + Send + Sync>,
        generation,
        built_at: built.built_at,
      },
    );

    Ok(built)
  }

  /// Drop the view stored under `key`.
  pub fn remove<K: CacheKey>(&self, key: &K) {
    self.storage.remove(&key.cache_hash());
    debug!(view = %key.description(), "view dropped");
  }

  /// Drop every cached view.
  pub fn invalidate(&self) {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    self.storage.clear();
    self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
    debug!(generation, "view cache invalidated");
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      hits: self.counters.hits.load(Ordering::Relaxed),
      misses: self.counters.misses.load(Ordering::Relaxed),
      invalidations: self.counters.invalidations.load(Ordering::Relaxed),
      generation: self.generation.load(Ordering::SeqCst),
      entries: self.storage.entry_count(),
    }
  }
}

impl WriteObserver for ViewCache {
  fn on_write(&self) {
    self.invalidate();
  }
}

impl Clone for ViewCache {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation: Arc::clone(&self.generation),
      counters: Arc::clone(&self.counters),
    }
  }
}

impl Default for ViewCache {
  fn default() -> Self {
    Self::memory()
  }
}
