//! In-process cache storage. Nothing survives the process.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStorage, CachedResponse};
use crate::net::{Request, Response};

struct Store {
  name: String,
  entries: BTreeMap<String, CachedResponse>,
}

/// Memory-backed storage. Stores are kept in creation order.
#[derive(Default)]
pub struct MemoryStorage {
  stores: Mutex<Vec<Store>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Vec<Store>>> {
    self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn find_or_create<'a>(stores: &'a mut Vec<Store>, name: &str) -> &'a mut Store {
  let index = match stores.iter().position(|s| s.name == name) {
    Some(index) => index,
    None => {
      stores.push(Store {
        name: name.to_string(),
        entries: BTreeMap::new(),
      });
      stores.len() - 1
    }
  };
  &mut stores[index]
}

fn copy_of(cached: &CachedResponse) -> CachedResponse {
  CachedResponse {
    response: cached.response.duplicate(),
    cached_at: cached.cached_at,
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, store: &str) -> Result<()> {
    let mut stores = self.lock()?;
    find_or_create(&mut stores, store);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.iter().map(|s| s.name.clone()).collect())
  }

  fn delete(&self, store: &str) -> Result<bool> {
    let mut stores = self.lock()?;
    let before = stores.len();
    stores.retain(|s| s.name != store);
    Ok(stores.len() != before)
  }

  fn put(&self, store: &str, request: &Request, response: Response) -> Result<()> {
    let mut stores = self.lock()?;
    find_or_create(&mut stores, store).entries.insert(
      request.cache_key(),
      CachedResponse {
        response,
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn put_all(&self, store: &str, entries: Vec<(Request, Response)>) -> Result<()> {
    // Single lock; nothing can fail between the first and last insert
    let mut stores = self.lock()?;
    let target = find_or_create(&mut stores, store);
    let cached_at = Utc::now();
    for (request, response) in entries {
      target.entries.insert(
        request.cache_key(),
        CachedResponse {
          response,
          cached_at,
        },
      );
    }
    Ok(())
  }

  fn match_request(&self, store: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let stores = self.lock()?;
    Ok(
      stores
        .iter()
        .find(|s| s.name == store)
        .and_then(|s| s.entries.get(&request.cache_key()))
        .map(copy_of),
    )
  }

  fn entries(&self, store: &str) -> Result<Vec<String>> {
    let stores = self.lock()?;
    Ok(
      stores
        .iter()
        .find(|s| s.name == store)
        .map(|s| s.entries.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }
}
