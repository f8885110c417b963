//! Memoization of derived views over the store.
//!
//! Views are cached until the next committed store write; the cache registers
//! itself as a store write observer and drops everything on notification.

mod layer;
mod storage;
mod traits;

pub use layer::{CacheStats, ViewCache};
pub use traits::CacheKey;
