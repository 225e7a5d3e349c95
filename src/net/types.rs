use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

/// An outgoing request intercepted from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Build a request from user input such as `("post", "https://host/path")`.
  pub fn parse(method: &str, url: &str) -> Result<Self> {
    let method = Method::from_bytes(method.trim().to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid HTTP method '{}': {}", method, e))?;
    let url = Url::parse(url.trim()).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
    Ok(Self::new(method, url))
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Request identity used as the cache store key.
  ///
  /// Fragments never reach the server, so they are not part of the identity.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    format!("{} {}", self.method.as_str(), url)
  }
}

/// A network or cached response.
///
/// Not `Clone`: a response body is read once. Anything that needs to both
/// store and return a response must call [`Response::duplicate`].
#[derive(Debug, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  /// Final URL after redirects
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// Produce an independent copy of this response.
  pub fn duplicate(&self) -> Self {
    Self {
      status: self.status,
      status_text: self.status_text.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }

  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with this name, compared case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn into_body(self) -> Vec<u8> {
    self.body
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(status: u16) -> Response {
    Response {
      status,
      status_text: String::new(),
      url: "https://example.com/".to_string(),
      headers: vec![("Content-Type".to_string(), "text/html".to_string())],
      body: b"<html></html>".to_vec(),
    }
  }

  #[test]
  fn test_cache_key_ignores_fragment() {
    let a = Request::parse("get", "https://example.com/index.html#top").unwrap();
    let b = Request::parse("GET", "https://example.com/index.html").unwrap();
    assert_eq!(a.cache_key(), b.cache_key());
    assert_eq!(a.cache_key(), "GET https://example.com/index.html");
  }

  #[test]
  fn test_cache_key_keeps_query_and_method() {
    let get = Request::parse("GET", "https://example.com/songs?q=a").unwrap();
    let head = Request::parse("HEAD", "https://example.com/songs?q=a").unwrap();
    assert_ne!(get.cache_key(), head.cache_key());
    assert!(get.cache_key().ends_with("?q=a"));
  }

  #[test]
  fn test_parse_rejects_bad_url() {
    assert!(Request::parse("GET", "not a url").is_err());
  }

  #[test]
  fn test_duplicate_is_independent() {
    let original = response(200);
    let mut copy = original.duplicate();
    copy.body.clear();
    assert_eq!(original.body, b"<html></html>");
    assert_eq!(copy.status, original.status);
  }

  #[test]
  fn test_is_ok_and_header_lookup() {
    assert!(response(204).is_ok());
    assert!(!response(404).is_ok());
    assert_eq!(response(200).header("content-type"), Some("text/html"));
    assert_eq!(response(200).header("etag"), None);
  }
}
