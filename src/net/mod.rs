//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tcp.rs / transport.rs (non-blocking write side)
//!     → connection.rs (send buffer, timers, close)
//!     → Hand off to the protocol dispatcher
//!
//! Output:
//!     protocol writes → buffer.rs → flush → transport
//!     short write → send timer armed → retried on writability
//!     close / buffered output → defer.rs → end-of-turn pass
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Nothing is freed inside a protocol callback; the deferred pass frees
//! - TLS is optional and handled inside the transport

pub mod buffer;
pub mod connection;
pub mod defer;
pub mod listener;
pub mod tcp;
pub mod timer;
pub mod tls;
pub mod transport;

pub use buffer::{Reservation, SendBuffer};
pub use connection::{Connection, ConnectionId, ConnectionIo, Flush, Protocol, Space};
pub use defer::DeferQueue;
pub use listener::{Listen, Listener, ListenerError};
pub use timer::{Timer, TimerKind};
pub use transport::{CloseReason, Transport};
