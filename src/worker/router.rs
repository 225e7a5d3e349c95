//! Cache policy router: picks and runs a caching strategy per request.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheResult, CacheStorage};
use crate::config::Config;
use crate::net::{Network, Request, Response};

use super::matcher::{self, RequestMatcher};

/// What the router decided for an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
  /// Not intercepted; the request proceeds to the network unmodified
  PassThrough,
  /// Intercepted and answered
  Respond(CacheResult),
}

/// Result of pruning stores on activation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub deleted: Vec<String>,
  /// Stores that could not be deleted, with the reason
  pub failed: Vec<(String, String)>,
}

/// Routes requests between the app shell store, the API store and the network.
///
/// - Non-GET requests and excluded API paths pass through untouched
/// - API requests: network first, API store on network failure
/// - Everything else: cache first, network on miss (not cached)
pub struct Router<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: N,
  matcher: Box<dyn RequestMatcher>,
  shell_store: String,
  api_store: String,
  precache: Vec<Url>,
}

impl<S: CacheStorage, N: Network> Router<S, N> {
  pub fn new(config: &Config, storage: Arc<S>, network: N) -> Result<Self> {
    Ok(Self {
      storage,
      network,
      matcher: matcher::from_config(&config.api),
      shell_store: config.shell_store_name(),
      api_store: config.api_store_name(),
      precache: config.precache_urls()?,
    })
  }

  pub fn shell_store(&self) -> &str {
    &self.shell_store
  }

  pub fn api_store(&self) -> &str {
    &self.api_store
  }

  pub fn network(&self) -> &N {
    &self.network
  }

  /// Populate the app shell store with the whole precache list.
  ///
  /// Every resource must come back with a 2xx status, otherwise the install
  /// fails and nothing is written. Returns the number of entries stored.
  pub async fn on_install(&self) -> Result<usize> {
    self.storage.open(&self.shell_store)?;
    info!(store = %self.shell_store, "Opened app shell cache");

    let mut fetches = Vec::with_capacity(self.precache.len());
    for url in &self.precache {
      fetches.push(self.precache_one(url));
    }

    let entries: Vec<(Request, Response)> = futures::future::try_join_all(fetches).await?;
    let count = entries.len();

    self.storage.put_all(&self.shell_store, entries)?;
    info!(store = %self.shell_store, count, "Precached app shell");

    Ok(count)
  }

  /// Handle one intercepted request.
  pub async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    // Only GET requests are cached
    if request.method != reqwest::Method::GET {
      debug!(method = %request.method, url = %request.url, "Passing through non-GET request");
      return Ok(FetchOutcome::PassThrough);
    }

    if self.matcher.is_api(&request.url) {
      if self.matcher.is_excluded(&request.url) {
        debug!(url = %request.url, "Bypassing cache for streaming request");
        return Ok(FetchOutcome::PassThrough);
      }
      return self.network_first(request).await;
    }

    self.cache_first(request).await
  }

  /// Delete every store that is not the current shell or API store.
  ///
  /// Deletion failures are logged and reported, never fatal.
  pub fn on_activate(&self) -> Result<ActivationReport> {
    let whitelist = [self.shell_store.as_str(), self.api_store.as_str()];
    let mut report = ActivationReport::default();

    for name in self.storage.keys()? {
      if whitelist.contains(&name.as_str()) {
        continue;
      }

      info!(store = %name, "Deleting old cache");
      match self.storage.delete(&name) {
        Ok(true) => report.deleted.push(name),
        Ok(false) => {}
        Err(e) => {
          warn!(store = %name, error = %e, "Failed to delete old cache");
          report.failed.push((name, e.to_string()));
        }
      }
    }

    Ok(report)
  }

  async fn precache_one(&self, url: &Url) -> Result<(Request, Response)> {
    let request = Request::get(url.clone());
    let response = self
      .network
      .fetch(&request)
      .await
      .map_err(|e| e.wrap_err(format!("Failed to precache {}", url)))?;

    if !response.is_ok() {
      return Err(eyre!(
        "Failed to precache {}: status {}",
        url,
        response.status
      ));
    }

    Ok((request, response))
  }

  async fn network_first(&self, request: &Request) -> Result<FetchOutcome> {
    self.storage.open(&self.api_store)?;

    match self.network.fetch(request).await {
      Ok(response) => {
        // The stored copy and the returned response must be independent
        if let Err(e) = self
          .storage
          .put(&self.api_store, request, response.duplicate())
        {
          warn!(url = %request.url, error = %e, "Failed to cache API response");
        }
        Ok(FetchOutcome::Respond(CacheResult::from_network(response)))
      }
      Err(err) => match self.storage.match_request(&self.api_store, request)? {
        Some(cached) => {
          info!(
            url = %request.url,
            cached_at = %cached.cached_at,
            "Network failed, serving cached API response"
          );
          Ok(FetchOutcome::Respond(CacheResult::offline(cached)))
        }
        None => Err(err.wrap_err(format!("No cached response for {}", request.url))),
      },
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<FetchOutcome> {
    if let Some(cached) = self.storage.match_any(request)? {
      return Ok(FetchOutcome::Respond(CacheResult::from_shell(cached)));
    }

    let response = self.network.fetch(request).await?;
    Ok(FetchOutcome::Respond(CacheResult::from_network(response)))
  }
}

#[cfg(test)]
impl<S: CacheStorage, N: Network> Router<S, N> {
  /// Replace the URL predicates.
  pub fn with_matcher(mut self, matcher: impl RequestMatcher + 'static) -> Self {
    self.matcher = Box::new(matcher);
    self
  }
}
