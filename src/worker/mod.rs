//! Per-thread connection owner.
//!
//! # Responsibilities
//! - Own every connection accepted on this thread, keyed by [`ConnectionId`]
//! - Own the deferred queue and run the end-of-turn pass
//! - Route driver events to the protocols (dispatch.rs)
//! - Apply the idle timer policy (timeout.rs)
//!
//! # Design Decisions
//! - Only [`Worker::run_deferred`] removes a connection from the map; a close
//!   anywhere else leaves the object in place for callers still up the stack
//! - The pipeline, HTTP/1 handler and session factory are injected per worker
//!   and lent to protocol code for the length of one call

mod dispatch;
mod timeout;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::http1::Http1Handler;
use crate::http2::SessionFactory;
use crate::net::connection::{Connection, ConnectionId, ConnectionIo, Flush};
use crate::net::defer::DeferQueue;
use crate::net::listener::Listen;
use crate::net::transport::Transport;
use crate::request::Pipeline;

/// Collaborators a worker lends to its connections.
pub struct Components {
    pub pipeline: Box<dyn Pipeline>,
    pub http1: Box<dyn Http1Handler>,
    pub sessions: Box<dyn SessionFactory>,
}

/// Owns the connections of one event loop.
pub struct Worker {
    connections: HashMap<ConnectionId, Connection>,
    defer: DeferQueue,
    pipeline: Box<dyn Pipeline>,
    http1: Box<dyn Http1Handler>,
    sessions: Box<dyn SessionFactory>,
}

impl Worker {
    pub fn new(components: Components) -> Self {
        Self {
            connections: HashMap::new(),
            defer: DeferQueue::new(),
            pipeline: components.pipeline,
            http1: components.http1,
            sessions: components.sessions,
        }
    }

    /// Take ownership of an accepted transport.
    pub fn accept(
        &mut self,
        listen: Arc<Listen>,
        mut transport: Box<dyn Transport>,
        peer: SocketAddr,
    ) -> Result<ConnectionId> {
        self.connections
            .try_reserve(1)
            .map_err(|_| Error::Allocation)?;

        if let Some(tls) = &listen.tls {
            if let Err(e) = transport.enable_tls(tls.clone()) {
                tracing::warn!(
                    peer = %peer,
                    listen = %listen.name(),
                    error = %e,
                    "Failed to enable TLS on accepted connection"
                );
                return Err(Error::Transport(e));
            }
        }

        let id = ConnectionId::new();
        let listen_name = listen.name().to_string();
        let mut io = ConnectionIo::new(id, listen, transport, peer);
        io.touch();
        self.connections.insert(id, Connection::new(io));

        tracing::info!(
            connection_id = %id,
            peer = %peer,
            listen = %listen_name,
            "Connection accepted"
        );
        Ok(id)
    }

    /// Close a connection. Safe to call repeatedly; the object lives until the
    /// next deferred pass.
    pub fn close(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.close(&mut self.defer, self.pipeline.as_mut());
        }
    }

    /// Close every connection, e.g. on shutdown.
    pub fn close_all(&mut self) {
        for conn in self.connections.values_mut() {
            conn.close(&mut self.defer, self.pipeline.as_mut());
        }
    }

    /// End-of-turn pass: free closed connections and flush the others.
    /// Returns how many connections were freed.
    pub fn run_deferred(&mut self) -> usize {
        let mut freed = 0;

        while let Some(id) = self.defer.pop() {
            let Some(conn) = self.connections.get_mut(&id) else {
                continue;
            };
            conn.io.clear_deferred();

            if conn.io.is_closed() {
                // a close nobody settled still gets its teardown and last write
                conn.settle(&mut self.defer, self.pipeline.as_mut());
                self.connections.remove(&id);
                freed += 1;
                tracing::trace!(connection_id = %id, "Connection freed");
                continue;
            }

            match conn.io.flush() {
                Ok(Flush::Done) => conn.io.buffer_mut().release(),
                Ok(Flush::Again) => {
                    tracing::trace!(
                        connection_id = %id,
                        remaining = conn.io.buffer().len(),
                        "Output left for writability"
                    );
                }
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "Deferred flush failed");
                    conn.close(&mut self.defer, self.pipeline.as_mut());
                }
            }
        }

        freed
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Live connections, closed-but-not-yet-freed included.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn defer_queue(&self) -> &DeferQueue {
        &self.defer
    }

    /// Earliest armed timer across all connections.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.connections
            .values()
            .flat_map(|c| [c.io.recv_timer().deadline(), c.io.send_timer().deadline()])
            .flatten()
            .min()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("connections", &self.connections.len())
            .field("deferred", &self.defer.len())
            .finish()
    }
}
