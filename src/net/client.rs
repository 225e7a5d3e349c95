use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::NetworkConfig;

use super::types::{Request, Response};

/// The live network as seen by the router.
pub trait Network: Send + Sync {
  /// Perform the request. An `Err` means the network failed; any HTTP status,
  /// including 4xx/5xx, is a successful fetch.
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

impl<T: Network> Network for Arc<T> {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    (**self).fetch(request)
  }
}

/// reqwest-backed network client
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if config.timeout_secs > 0 {
      builder = builder.timeout(Duration::from_secs(config.timeout_secs));
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  /// Access the underlying reqwest client
  pub fn inner(&self) -> &reqwest::Client {
    &self.client
  }
}

impl Network for HttpClient {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status();
    let url = response.url().to_string();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      url,
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  /// URL of a local port with nothing listening on it.
  fn closed_port_url(path: &str) -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{}{}", port, path)).unwrap()
  }

  fn client() -> HttpClient {
    HttpClient::new(&NetworkConfig { timeout_secs: 5 }).unwrap()
  }

  #[tokio::test]
  async fn test_fetch_collects_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/songs"))
      .and(header("accept", "application/json"))
      .respond_with(
        ResponseTemplate::new(200).set_body_raw(r#"[{"title":"a"}]"#, "application/json"),
      )
      .expect(1)
      .mount(&server)
      .await;

    let url = Url::parse(&format!("{}/songs", server.uri())).unwrap();
    let request = Request::get(url).with_header("Accept", "application/json");
    let response = client().fetch(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.body, br#"[{"title":"a"}]"#);
  }

  #[tokio::test]
  async fn test_error_status_is_not_a_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let url = Url::parse(&format!("{}/songs", server.uri())).unwrap();
    let response = client().fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, 503);
    assert!(!response.is_ok());
  }

  #[tokio::test]
  async fn test_unreachable_host_is_error() {
    let url = closed_port_url("/songs");
    assert!(client().fetch(&Request::get(url)).await.is_err());
  }
}
