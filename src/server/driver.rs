//! Single-threaded event loop for one worker.
//!
//! # Data Flow
//! ```text
//! accept_loop (one per listening socket)
//!     → Worker::accept → spawn connection_task
//! connection_task
//!     handshake → Worker::on_negotiated (TLS listens, once)
//!     readable  → Worker::on_readable (unconsumed bytes kept in `pending`)
//!     writable  → pending TLS records, then Worker::on_writable
//!     blocked   → re-arm with write interest
//!     EOF/error → Worker::on_close
//!     every event → Worker::run_deferred
//! timer_loop
//!     every tick → Worker::fire_timers → Worker::run_deferred
//! ```
//!
//! Everything runs on a current-thread runtime inside a `LocalSet`, so the
//! worker sits in an `Rc<RefCell<_>>` and no borrow is held across an await.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::Interest;
use tokio::task::{JoinHandle, LocalSet};

use crate::error::Error;
use crate::lifecycle::ShutdownListener;
use crate::net::connection::ConnectionId;
use crate::net::listener::{ConnectionPermit, Listen, Listener, ListenerError};
use crate::net::tcp::{ReadEvent, TcpChannel, TcpTransport};
use crate::net::transport::CloseReason;
use crate::worker::{Components, Worker};

/// Timer resolution.
pub const TIMER_TICK: Duration = Duration::from_millis(100);

/// Bytes read from the socket per readiness event.
const READ_CHUNK: usize = 16 * 1024;

/// Unconsumed input a connection may hold before it is dropped.
const MAX_PENDING_INPUT: usize = 1024 * 1024;

type SharedWorker = Rc<RefCell<Worker>>;

/// Run one worker thread until shutdown: bind every listen, then serve.
pub fn run_worker(
    index: usize,
    listens: Vec<Arc<Listen>>,
    components: Components,
    shutdown: ShutdownListener,
) -> Result<(), ListenerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ListenerError::Bind)?;
    let local = LocalSet::new();

    local.block_on(&runtime, async move {
        let mut listeners = Vec::new();
        for listen in &listens {
            for addr in listen.addresses()? {
                listeners.push(Listener::bind(listen.clone(), addr)?);
            }
        }

        tracing::info!(worker = index, listeners = listeners.len(), "Worker started");
        serve(listeners, Worker::new(components), shutdown).await;
        tracing::info!(worker = index, "Worker stopped");
        Ok(())
    })
}

/// Serve already-bound listeners until shutdown. Must run inside a `LocalSet`.
pub async fn serve(listeners: Vec<Listener>, worker: Worker, mut shutdown: ShutdownListener) {
    let worker: SharedWorker = Rc::new(RefCell::new(worker));

    let mut tasks: Vec<JoinHandle<()>> = listeners
        .into_iter()
        .map(|listener| tokio::task::spawn_local(accept_loop(listener, worker.clone())))
        .collect();
    tasks.push(tokio::task::spawn_local(timer_loop(worker.clone())));

    shutdown.recv().await;

    for task in &tasks {
        task.abort();
    }

    let mut worker = worker.borrow_mut();
    tracing::info!(connections = worker.len(), "Closing connections for shutdown");
    worker.close_all();
    worker.run_deferred();
}

async fn accept_loop(listener: Listener, worker: SharedWorker) {
    loop {
        let (stream, peer, permit) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let channel = Rc::new(TcpChannel::new(stream));
        let transport = TcpTransport::new(channel.clone());

        let accepted = worker
            .borrow_mut()
            .accept(listener.listen().clone(), Box::new(transport), peer);
        let id = match accepted {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Connection rejected");
                continue;
            }
        };

        tokio::task::spawn_local(connection_task(id, channel, worker.clone(), permit));
    }
}

async fn timer_loop(worker: SharedWorker) {
    let mut tick = tokio::time::interval(TIMER_TICK);
    loop {
        tick.tick().await;
        let mut worker = worker.borrow_mut();
        worker.fire_timers(Instant::now());
        worker.run_deferred();
    }
}

async fn connection_task(
    id: ConnectionId,
    channel: Rc<TcpChannel>,
    worker: SharedWorker,
    _permit: ConnectionPermit,
) {
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    while !channel.is_closed() {
        let write_blocked = worker
            .borrow()
            .connection(id)
            .map(|c| c.io().write_blocked())
            .unwrap_or(false);
        let interest = if write_blocked || channel.wants_write() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        let ready = tokio::select! {
            ready = channel.ready(interest) => ready,
            _ = channel.closed() => break,
            _ = channel.blocked() => continue,
        };
        let ready = match ready {
            Ok(ready) => ready,
            Err(e) => {
                worker.borrow_mut().on_close(id, CloseReason::ReadError(e));
                break;
            }
        };

        if ready.is_readable() {
            match channel.read(&mut chunk, &mut pending) {
                Ok(ReadEvent::Eof) => {
                    worker.borrow_mut().on_close(id, CloseReason::PeerClosed);
                    break;
                }
                Ok(ReadEvent::Data(n)) => {
                    if let Some(negotiated) = channel.take_negotiated() {
                        worker
                            .borrow_mut()
                            .on_negotiated(id, negotiated.alpn.as_deref());
                    }
                    if n > 0 {
                        feed(id, &worker, &mut pending);
                    }
                }
                Err(e) => {
                    worker.borrow_mut().on_close(id, CloseReason::ReadError(e));
                    break;
                }
            }
        }

        if ready.is_writable() {
            if let Err(e) = channel.flush_tls() {
                worker.borrow_mut().on_close(id, CloseReason::WriteError(e));
                break;
            }
            if write_blocked {
                let result = worker.borrow_mut().on_writable(id);
                match result {
                    Ok(()) => feed(id, &worker, &mut pending),
                    Err(Error::Transport(e)) => {
                        worker.borrow_mut().on_close(id, CloseReason::WriteError(e));
                    }
                    Err(_) => worker.borrow_mut().close(id),
                }
            }
        }

        if pending.len() > MAX_PENDING_INPUT {
            tracing::warn!(connection_id = %id, pending = pending.len(), "Input backlog too large");
            worker.borrow_mut().on_close(id, CloseReason::ProtocolError);
        }

        worker.borrow_mut().run_deferred();
    }

    let mut worker = worker.borrow_mut();
    worker.close(id);
    worker.run_deferred();
}

/// Offer buffered input until the protocol stops consuming.
fn feed(id: ConnectionId, worker: &SharedWorker, pending: &mut Vec<u8>) {
    while !pending.is_empty() {
        let result = worker.borrow_mut().on_readable(id, pending);
        match result {
            Ok(0) => return,
            Ok(n) => {
                pending.drain(..n);
            }
            Err(Error::Closed) => return,
            Err(_) => {
                worker.borrow_mut().on_close(id, CloseReason::ProtocolError);
                return;
            }
        }
    }
}
