//! Multi-threaded server runtime.
//!
//! # Data Flow
//! ```text
//! ServerConfig
//!     → Listen::new per listen (TLS loaded once, shared)
//!     → N worker threads (runtime.workers, 0 = one per CPU)
//!         → driver::run_worker (own sockets via SO_REUSEPORT, own Worker)
//! Shutdown::trigger → every worker drains and exits → run() returns
//! ```

pub mod driver;

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::lifecycle::Shutdown;
use crate::net::listener::{Listen, ListenerError};
use crate::worker::Components;

/// Builds the per-worker collaborators; called once on each worker thread.
pub type ComponentsFactory = Arc<dyn Fn() -> Components + Send + Sync>;

pub struct Server {
    config: ServerConfig,
    listens: Vec<Arc<Listen>>,
    components: ComponentsFactory,
}

impl Server {
    /// Resolve every listen up front so certificate errors surface before any thread starts.
    pub fn new<F>(config: ServerConfig, components: F) -> Result<Self, ListenerError>
    where
        F: Fn() -> Components + Send + Sync + 'static,
    {
        let listens = config
            .listens
            .iter()
            .cloned()
            .map(|listen| Listen::new(listen).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            listens,
            components: Arc::new(components),
        })
    }

    pub fn listens(&self) -> &[Arc<Listen>] {
        &self.listens
    }

    /// Run worker threads until `shutdown` is triggered.
    ///
    /// Returns the first worker error, after every thread has exited.
    pub fn run(&self, shutdown: &Shutdown) -> Result<(), ListenerError> {
        let workers = self.config.runtime.worker_count();
        tracing::info!(
            workers,
            listens = self.listens.len(),
            "Starting server"
        );

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let listens = self.listens.clone();
            let components = self.components.clone();
            let listener = shutdown.subscribe();
            let shutdown = shutdown.clone();

            let handle = std::thread::Builder::new()
                .name(format!("muxd-worker-{}", index))
                .spawn(move || {
                    let result = driver::run_worker(index, listens, components(), listener);
                    if result.is_err() {
                        // one worker failing stops the rest
                        shutdown.trigger();
                    }
                    result
                })
                .map_err(ListenerError::Bind)?;
            handles.push(handle);
        }

        let mut first_error = None;
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(worker = index, error = %e, "Worker failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(_) => {
                    tracing::error!(worker = index, "Worker panicked");
                    shutdown.trigger();
                }
            }
        }

        tracing::info!("Shutdown complete");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
