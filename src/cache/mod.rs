//! Named cache stores keyed by request identity.
//!
//! This module provides the storage primitive the router works against:
//! - Any number of named stores, enumerable in creation order
//! - One response per request identity per store, replaced on write
//! - All-or-nothing batch writes for precaching
//! - Store deletion for version cleanup

mod memory;
mod storage;
mod traits;

pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource, CacheStorage, CachedResponse};
