//! Keep-alive ping for the API host, which sleeps when idle.

use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const PING_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a ping that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingStatus {
  /// 2xx response
  Alive(u16),
  /// Server answered with a non-success status; it is awake regardless
  Degraded { status: u16, body_preview: String },
}

/// Send a single GET to `url`. Only a transport failure is an error.
pub async fn ping(client: &reqwest::Client, url: &Url) -> Result<PingStatus> {
  info!(%url, "Pinging API to keep it alive");

  let response = client
    .get(url.clone())
    .timeout(PING_TIMEOUT)
    .send()
    .await
    .map_err(|e| eyre!("Ping to {} failed: {}", url, e))?;

  let status = response.status();
  if status.is_success() {
    info!(status = status.as_u16(), "Ping succeeded");
    return Ok(PingStatus::Alive(status.as_u16()));
  }

  let body = response.text().await.unwrap_or_default();
  let body_preview: String = body.chars().take(200).collect();
  warn!(
    status = status.as_u16(),
    body = %body_preview,
    "Ping received non-success status"
  );

  Ok(PingStatus::Degraded {
    status: status.as_u16(),
    body_preview,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_ping_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let url = Url::parse(&format!("{}/", server.uri())).unwrap();
    let status = ping(&reqwest::Client::new(), &url).await.unwrap();
    assert_eq!(status, PingStatus::Alive(200));
  }

  #[tokio::test]
  async fn test_ping_non_success_truncates_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(502).set_body_string("x".repeat(500)))
      .mount(&server)
      .await;

    let url = Url::parse(&format!("{}/", server.uri())).unwrap();
    match ping(&reqwest::Client::new(), &url).await.unwrap() {
      PingStatus::Degraded {
        status,
        body_preview,
      } => {
        assert_eq!(status, 502);
        assert_eq!(body_preview.len(), 200);
      }
      other => panic!("expected degraded ping, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_ping_unreachable_is_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
    assert!(ping(&reqwest::Client::new(), &url).await.is_err());
  }
}
