//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → every worker thread stops accepting
//!               → closes its connections → final deferred pass → exit
//! ```
//!
//! # Design Decisions
//! - One coordinator per server, cloned into each worker thread
//! - A worker that subscribes after the trigger still sees it

pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownListener};
