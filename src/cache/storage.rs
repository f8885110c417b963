//! Cache storage trait and in-memory implementation.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A built view, type-erased.
#[derive(Clone)]
pub struct CachedView {
  pub value: Arc<dyn Any + Send + Sync>,
  /// Cache generation the value was built under
  pub generation: u64,
  pub built_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  fn get(&self, key: &str) -> Option<CachedView>;

  fn put(&self, key: &str, view: CachedView);

  fn remove(&self, key: &str);

  /// Drop every entry.
  fn clear(&self);

  fn entry_count(&self) -> usize;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - every lookup misses.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &str) -> Option<CachedView> {
    None
  }

  fn put(&self, _key: &str, _view: CachedView) {}

  fn remove(&self, _key: &str) {}

  fn clear(&self) {}

  fn entry_count(&self) -> usize {
    0
  }
}

/// Process-local storage keyed by view hash.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CachedView>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedView>> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &str) -> Option<CachedView> {
    self.entries().get(key).cloned()
  }

  fn put(&self, key: &str, view: CachedView) {
    self.entries().insert(key.to_string(), view);
  }

  fn remove(&self, key: &str) {
    self.entries().remove(key);
  }

  fn clear(&self) {
    self.entries().clear();
  }

  fn entry_count(&self) -> usize {
    self.entries().len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn view(n: u32, generation: u64) -> CachedView {
    CachedView {
      value: Arc::new(n),
      generation,
      built_at: Utc::now(),
    }
  }

  #[test]
  fn test_memory_storage() {
    let storage = MemoryStorage::new();
    assert!(storage.get("a").is_none());

    storage.put("a", view(1, 0));
    storage.put("a", view(2, 1));
    let cached = storage.get("a").unwrap();
    assert_eq!(cached.generation, 1);
    assert_eq!(cached.value.downcast_ref::<u32>(), Some(&2));

    storage.put("b", view(3, 1));
    assert_eq!(storage.entry_count(), 2);
    storage.remove("b");
    assert!(storage.get("b").is_none());
    assert_eq!(storage.entry_count(), 1);

    storage.clear();
    assert!(storage.get("a").is_none());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.put("a", view(1, 0));
    assert!(storage.get("a").is_none());
  }
}
