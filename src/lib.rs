//! Per-connection I/O and HTTP/1.1 + HTTP/2 multiplexing core.
//!
//! # Architecture Overview
//!
//! ```text
//!   driver (server::driver)         worker (one per thread)
//!   ───────────────────────         ───────────────────────────────────────────
//!   accept ───────────────────────▶ Worker::accept ─▶ Connection { io, proto }
//!   readable ─────────────────────▶ on_readable ─┬─▶ http1 handler ─▶ Pipeline
//!                                                └─▶ http2 adapter ─▶ Session
//!   writable ─────────────────────▶ on_writable ─▶ flush ─▶ schedule / resume
//!   tick ─────────────────────────▶ fire_timers ─▶ recv / send timeout
//!   end of every event ───────────▶ run_deferred ─▶ flush buffered output,
//!                                                   free closed connections
//! ```
//!
//! The framing library ([`http2::Session`]), the HTTP/1 parser
//! ([`http1::Http1Handler`]) and the content pipeline ([`request::Pipeline`])
//! are injected through [`worker::Components`].

pub mod config;
pub mod error;
pub mod http1;
pub mod http2;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod request;
pub mod server;
pub mod worker;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use lifecycle::Shutdown;
pub use server::Server;
pub use worker::{Components, Worker};
