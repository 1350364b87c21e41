//! Idle timer policy.
//!
//! - recv: an HTTP/2 session may ask for more time (and ping the peer);
//!   anything else closes
//! - send: a short write that did not drain in time always closes

use std::time::{Duration, Instant};

use crate::net::connection::{ConnectionId, Protocol};
use crate::worker::Worker;

impl Worker {
    /// Nothing arrived within the receive timeout.
    pub fn recv_timeout(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.io.is_closed() {
            return;
        }

        let grace = match &mut conn.proto {
            Protocol::Http2(h2) => h2.idle_ping(&mut conn.io, &mut self.defer, self.pipeline.as_mut()),
            Protocol::Http1(_) => Duration::ZERO,
        };
        conn.settle(&mut self.defer, self.pipeline.as_mut());
        if conn.io.is_closed() {
            return;
        }

        if !grace.is_zero() {
            conn.io.recv_timer_mut().set_after(grace);
            tracing::debug!(
                connection_id = %id,
                grace_ms = grace.as_millis() as u64,
                "Idle connection given more time"
            );
            return;
        }

        tracing::debug!(
            connection_id = %id,
            idle_ms = conn.io.last_recv().elapsed().as_millis() as u64,
            "Receive timeout"
        );
        conn.close(&mut self.defer, self.pipeline.as_mut());
    }

    /// Buffered output did not drain within the send timeout.
    pub fn send_timeout(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        tracing::debug!(
            connection_id = %id,
            pending = conn.io.buffer().len(),
            "Send timeout"
        );
        conn.close(&mut self.defer, self.pipeline.as_mut());
    }

    /// Fire every timer expired at `now`: send timers first, then recv timers.
    /// Returns how many fired.
    pub fn fire_timers(&mut self, now: Instant) -> usize {
        let expired_send: Vec<ConnectionId> = self
            .connections
            .iter_mut()
            .filter_map(|(id, conn)| conn.io.send_timer_mut().expire(now).then_some(*id))
            .collect();
        for id in &expired_send {
            self.send_timeout(*id);
        }

        let expired_recv: Vec<ConnectionId> = self
            .connections
            .iter_mut()
            .filter_map(|(id, conn)| conn.io.recv_timer_mut().expire(now).then_some(*id))
            .collect();
        for id in &expired_recv {
            self.recv_timeout(*id);
        }

        expired_send.len() + expired_recv.len()
    }
}
