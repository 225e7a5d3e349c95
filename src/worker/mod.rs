//! The cache policy router and the event host that drives it.

mod host;
pub mod matcher;
mod router;
#[cfg(test)]
mod testing;

pub use host::ServiceWorker;
pub use router::{FetchOutcome, Router};
