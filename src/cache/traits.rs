//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::net::{Request, Response};

/// A response read back from a cache store.
#[derive(Debug)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was written
  pub cached_at: DateTime<Utc>,
}

/// A set of named cache stores, each mapping request identity to the most
/// recent response for it.
///
/// Opening a store never removes other stores; only `delete` does.
/// Implementations must be safe to share between concurrent fetches.
pub trait CacheStorage: Send + Sync {
  /// Open the named store, creating it if absent.
  fn open(&self, store: &str) -> Result<()>;

  /// Store names in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and all its entries. Returns false if it did not exist.
  fn delete(&self, store: &str) -> Result<bool>;

  /// Store a response for the request, replacing any previous one.
  /// Creates the store if needed.
  fn put(&self, store: &str, request: &Request, response: Response) -> Result<()>;

  /// Store all entries or none of them.
  fn put_all(&self, store: &str, entries: Vec<(Request, Response)>) -> Result<()>;

  /// Look up the request in one store.
  fn match_request(&self, store: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Request keys held by a store, sorted.
  fn entries(&self, store: &str) -> Result<Vec<String>>;

  /// Look up the request in every store, oldest store first.
  fn match_any(&self, request: &Request) -> Result<Option<CachedResponse>> {
    for store in self.keys()? {
      if let Some(hit) = self.match_request(&store, request)? {
        return Ok(Some(hit));
      }
    }
    Ok(None)
  }
}

/// Result from a routed fetch, including the response and where it came from.
#[derive(Debug)]
pub struct CacheResult {
  pub response: Response,
  pub source: CacheSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl CacheResult {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_shell(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: CacheSource::Shell,
      cached_at: Some(cached.cached_at),
    }
  }

  /// Network failed and the API store had a copy.
  pub fn offline(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: CacheSource::Offline,
      cached_at: Some(cached.cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cache-first hit in a precached store
  Shell,
  /// Network unavailable, serving the last API response
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Network => write!(f, "network"),
      Self::Shell => write!(f, "shell-cache"),
      Self::Offline => write!(f, "api-cache"),
    }
  }
}
