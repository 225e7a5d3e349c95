//! URL predicates that decide which strategy a request gets.

use url::Url;

use crate::config::{ApiConfig, MatchMode};

pub trait RequestMatcher: Send + Sync {
  /// Request goes to the API host.
  fn is_api(&self, url: &Url) -> bool;

  /// API request that must never be cached (streaming media).
  fn is_excluded(&self, url: &Url) -> bool;
}

/// Plain text containment over the whole URL.
///
/// Coarse on purpose: the API host text matches anywhere, query strings
/// included, and so do the excluded path fragments.
#[derive(Debug, Clone)]
pub struct SubstringMatcher {
  api_host: String,
  excluded_paths: Vec<String>,
}

impl SubstringMatcher {
  pub fn new(api_host: impl Into<String>, excluded_paths: Vec<String>) -> Self {
    Self {
      api_host: api_host.into(),
      excluded_paths,
    }
  }
}

impl RequestMatcher for SubstringMatcher {
  fn is_api(&self, url: &Url) -> bool {
    !self.api_host.is_empty() && url.as_str().contains(&self.api_host)
  }

  fn is_excluded(&self, url: &Url) -> bool {
    self
      .excluded_paths
      .iter()
      .any(|p| !p.is_empty() && url.as_str().contains(p.as_str()))
  }
}

/// Exact host comparison; exclusions are path prefixes.
#[derive(Debug, Clone)]
pub struct HostMatcher {
  api_host: String,
  excluded_paths: Vec<String>,
}

impl HostMatcher {
  pub fn new(api_host: impl Into<String>, excluded_paths: Vec<String>) -> Self {
    Self {
      api_host: api_host.into().to_lowercase(),
      excluded_paths,
    }
  }
}

impl RequestMatcher for HostMatcher {
  fn is_api(&self, url: &Url) -> bool {
    url.host_str() == Some(self.api_host.as_str())
  }

  fn is_excluded(&self, url: &Url) -> bool {
    self
      .excluded_paths
      .iter()
      .any(|p| !p.is_empty() && url.path().starts_with(p.as_str()))
  }
}

/// Build the matcher selected by configuration.
pub fn from_config(api: &ApiConfig) -> Box<dyn RequestMatcher> {
  match api.matching {
    MatchMode::Substring => Box::new(SubstringMatcher::new(
      api.host.clone(),
      api.excluded_paths.clone(),
    )),
    MatchMode::Host => Box::new(HostMatcher::new(
      api.host.clone(),
      api.excluded_paths.clone(),
    )),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn substring() -> SubstringMatcher {
    SubstringMatcher::new("api.example.onrender.com", vec!["/play/".to_string()])
  }

  #[test]
  fn test_substring_matches_api_host() {
    let m = substring();
    assert!(m.is_api(&url("https://api.example.onrender.com/songs")));
    assert!(!m.is_api(&url("https://cdn.tailwindcss.com/")));
  }

  #[test]
  fn test_substring_matches_host_text_in_query() {
    let m = substring();
    assert!(m.is_api(&url(
      "https://proxy.example.com/?target=api.example.onrender.com"
    )));
  }

  #[test]
  fn test_substring_exclusion_anywhere() {
    let m = substring();
    assert!(m.is_excluded(&url("https://api.example.onrender.com/play/track123")));
    assert!(m.is_excluded(&url("https://api.example.onrender.com/v2/play/x")));
    assert!(!m.is_excluded(&url("https://api.example.onrender.com/songs")));
  }

  #[test]
  fn test_empty_patterns_never_match() {
    let m = SubstringMatcher::new("", vec![String::new()]);
    assert!(!m.is_api(&url("https://anything.example.com/")));
    assert!(!m.is_excluded(&url("https://anything.example.com/")));
  }

  #[test]
  fn test_host_matcher_is_strict() {
    let m = HostMatcher::new("API.example.onrender.com", vec!["/play/".to_string()]);
    assert!(m.is_api(&url("https://api.example.onrender.com/songs")));
    assert!(!m.is_api(&url(
      "https://proxy.example.com/?target=api.example.onrender.com"
    )));
    assert!(m.is_excluded(&url("https://api.example.onrender.com/play/track123")));
    assert!(!m.is_excluded(&url("https://api.example.onrender.com/v2/play/x")));
  }
}
