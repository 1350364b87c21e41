//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with connection_id / peer / stream fields
//!     → logging.rs (EnvFilter + fmt layer)
//!     → stdout
//! ```
//!
//! # Design Decisions
//! - Structured fields instead of formatted messages
//! - Connection ID flows through every event about a connection

pub mod logging;
