use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::net::{Network, Request, Response};

/// Scripted network: routed URLs answer with their status and body,
/// anything else answers 404. Records every URL it was asked for.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, (u16, String)>>,
  calls: Mutex<Vec<String>>,
  offline: AtomicBool,
  delay: Mutex<Duration>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, url: &str, status: u16, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), (status, body.to_string()));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Make every fetch take `delay` before answering.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = delay;
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    let delay = *self.delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unreachable", url));
    }

    let (status, body) = self
      .routes
      .lock()
      .unwrap()
      .get(&url)
      .cloned()
      .unwrap_or((404, "not found".to_string()));

    Ok(Response {
      status,
      status_text: String::new(),
      url,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: body.into_bytes(),
    })
  }
}
