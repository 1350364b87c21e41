//! HTTP/2 support.
//!
//! The frame parser and stream scheduler live behind [`Session`]; this module
//! binds sessions to connections and frames responses.
//!
//! # Data Flow
//! ```text
//! ALPN "h2" / prior-knowledge preface / HTTP/1 upgrade
//!     → adapter::connection_init (session created, 9 bytes of frame slack added)
//!     → adapter (hooks ↔ requests ↔ pipeline)
//!     → hpack.rs + frame.rs (HEADERS and DATA written in place)
//! ```

pub mod adapter;
pub mod frame;
pub mod hpack;
pub mod preface;
pub mod session;

pub use adapter::{Http2Responder, Http2State, HEADERS_HEADROOM};
pub use hpack::HeaderEncoder;
pub use session::{HeaderField, Session, SessionFactory, StreamHooks, StreamId};
