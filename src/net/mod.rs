//! HTTP request/response types and the live network.

mod client;
mod ping;
mod types;

pub use client::{HttpClient, Network};
pub use ping::{ping, PingStatus};
pub use types::{Request, Response};
