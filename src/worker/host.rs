//! Event host that drives the router through its lifecycle.
//!
//! Lifecycle events are delivered over a channel and handled one at a time;
//! fetch events are spawned as independent tasks. Every spawned fetch is
//! tracked until it settles, and the host does not finish while any are
//! outstanding.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::net::{Network, Request};

use super::router::{ActivationReport, FetchOutcome, Router};

/// Worker lifecycle. There are no transitions back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; this worker never controls a page
  Redundant,
}

impl std::fmt::Display for Lifecycle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Events delivered to the worker
enum HostEvent {
  Install(oneshot::Sender<Result<usize>>),
  Activate(oneshot::Sender<Result<ActivationReport>>),
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<FetchOutcome>>,
  },
  State(oneshot::Sender<Lifecycle>),
}

/// Cloneable handle for dispatching events to a running worker.
///
/// The worker shuts down once every handle is dropped.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<HostEvent>,
}

impl WorkerHandle {
  pub async fn install(&self) -> Result<usize> {
    self.request(HostEvent::Install).await?
  }

  pub async fn activate(&self) -> Result<ActivationReport> {
    self.request(HostEvent::Activate).await?
  }

  pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
    self.dispatch_fetch(request)?.await.map_err(dropped)?
  }

  /// Queue a fetch event and return the pending reply without waiting for it.
  pub fn dispatch_fetch(
    &self,
    request: Request,
  ) -> Result<oneshot::Receiver<Result<FetchOutcome>>> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(HostEvent::Fetch { request, reply })
      .map_err(|_| eyre!("Service worker has shut down"))?;
    Ok(rx)
  }

  /// Current lifecycle state, as seen after all earlier events were handled.
  pub async fn state(&self) -> Result<Lifecycle> {
    self.request(HostEvent::State).await
  }

  async fn request<T>(&self, event: impl FnOnce(oneshot::Sender<T>) -> HostEvent) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(event(reply))
      .map_err(|_| eyre!("Service worker has shut down"))?;
    rx.await.map_err(dropped)
  }
}

fn dropped(_: oneshot::error::RecvError) -> color_eyre::Report {
  eyre!("Service worker dropped the event without replying")
}

/// Owns the router and its lifecycle state.
pub struct ServiceWorker<S: CacheStorage, N: Network> {
  router: Arc<Router<S, N>>,
  state: Lifecycle,
  rx: mpsc::UnboundedReceiver<HostEvent>,
  /// Fetch handlers still running
  pending: JoinSet<()>,
}

impl<S: CacheStorage + 'static, N: Network + 'static> ServiceWorker<S, N> {
  /// Start the worker on the tokio runtime.
  ///
  /// The returned task resolves to the final lifecycle state after every
  /// handle has been dropped and all outstanding fetches have settled.
  pub fn spawn(router: Router<S, N>) -> (WorkerHandle, JoinHandle<Lifecycle>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = Self {
      router: Arc::new(router),
      state: Lifecycle::Parsed,
      rx,
      pending: JoinSet::new(),
    };

    (WorkerHandle { tx }, tokio::spawn(worker.run()))
  }

  async fn run(mut self) -> Lifecycle {
    loop {
      tokio::select! {
        event = self.rx.recv() => match event {
          Some(event) => self.handle_event(event).await,
          None => break,
        },
        Some(joined) = self.pending.join_next(), if !self.pending.is_empty() => {
          if let Err(e) = joined {
            warn!(error = %e, "Fetch handler failed");
          }
        }
      }
    }

    if !self.pending.is_empty() {
      debug!(
        outstanding = self.pending.len(),
        "Waiting for fetch handlers"
      );
    }
    while let Some(joined) = self.pending.join_next().await {
      if let Err(e) = joined {
        warn!(error = %e, "Fetch handler failed");
      }
    }

    info!(state = %self.state, "Service worker stopped");
    self.state
  }

  async fn handle_event(&mut self, event: HostEvent) {
    match event {
      HostEvent::Install(reply) => {
        let result = self.install().await;
        let _ = reply.send(result);
      }
      HostEvent::Activate(reply) => {
        let result = self.activate();
        let _ = reply.send(result);
      }
      HostEvent::Fetch { request, reply } => self.fetch(request, reply),
      HostEvent::State(reply) => {
        let _ = reply.send(self.state);
      }
    }
  }

  async fn install(&mut self) -> Result<usize> {
    if self.state != Lifecycle::Parsed {
      return Err(eyre!("Cannot install a worker that is {}", self.state));
    }

    self.state = Lifecycle::Installing;
    match self.router.on_install().await {
      Ok(count) => {
        self.state = Lifecycle::Installed;
        Ok(count)
      }
      Err(e) => {
        warn!(error = %e, "Install failed, worker is redundant");
        self.state = Lifecycle::Redundant;
        Err(e)
      }
    }
  }

  fn activate(&mut self) -> Result<ActivationReport> {
    if self.state != Lifecycle::Installed {
      return Err(eyre!("Cannot activate a worker that is {}", self.state));
    }

    self.state = Lifecycle::Activating;
    let result = self.router.on_activate();
    // Cleanup problems never block activation
    self.state = Lifecycle::Activated;
    result
  }

  fn fetch(&mut self, request: Request, reply: oneshot::Sender<Result<FetchOutcome>>) {
    if self.state != Lifecycle::Activated {
      debug!(url = %request.url, state = %self.state, "No active worker, passing through");
      let _ = reply.send(Ok(FetchOutcome::PassThrough));
      return;
    }

    let router = Arc::clone(&self.router);
    self.pending.spawn(async move {
      let outcome = router.on_fetch(&request).await;
      let _ = reply.send(outcome);
    });
  }
}
