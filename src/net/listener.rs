//! Listening sockets with backpressure.
//!
//! # Responsibilities
//! - Resolve a [`ListenConfig`] into a shared runtime [`Listen`] (TLS loaded once)
//! - Bind each configured address with `SO_REUSEPORT` so every worker owns its own socket
//! - Enforce max_connections limit via semaphore
//! - Graceful handling of accept errors

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Semaphore;

use crate::config::ListenConfig;
use crate::net::tls;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Address did not parse.
    Address(String),
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
    /// Certificate or key could not be loaded.
    Tls(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Address(a) => write!(f, "Invalid listen address: {}", a),
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Tls(e) => write!(f, "Failed to load TLS config: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Resolved listen settings, shared by every connection accepted on them.
#[derive(Debug)]
pub struct Listen {
    pub config: ListenConfig,
    /// Present when the listen terminates TLS.
    pub tls: Option<Arc<rustls::ServerConfig>>,
}

impl Listen {
    /// Resolve a listen config, loading certificates when TLS is configured.
    pub fn new(config: ListenConfig) -> Result<Self, ListenerError> {
        let tls = match &config.tls {
            Some(tls) => Some(tls::load_server_config(tls).map_err(ListenerError::Tls)?),
            None => None,
        };
        Ok(Self { config, tls })
    }

    /// A plaintext listen, ignoring any TLS section.
    pub fn plain(config: ListenConfig) -> Self {
        Self { config, tls: None }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Parsed socket addresses.
    pub fn addresses(&self) -> Result<Vec<SocketAddr>, ListenerError> {
        self.config
            .addresses
            .iter()
            .map(|a| a.parse().map_err(|_| ListenerError::Address(a.clone())))
            .collect()
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Settings handed to every accepted connection.
    listen: Arc<Listen>,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    /// Bind one address of `listen`. The socket shares its port with other workers.
    pub fn bind(listen: Arc<Listen>, addr: SocketAddr) -> Result<Self, ListenerError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(ListenerError::Bind)?;

        socket.set_reuseaddr(true).map_err(ListenerError::Bind)?;
        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        socket.set_reuseport(true).map_err(ListenerError::Bind)?;
        socket.bind(addr).map_err(ListenerError::Bind)?;

        let listener = socket.listen(1024).map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
        let max_connections = listen.config.network.max_connections;

        tracing::info!(
            listen = %listen.name(),
            address = %local_addr,
            tls = listen.is_tls(),
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            listen,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| {
                ListenerError::Accept(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "connection limit closed",
                ))
            })?;

        // Then accept the connection
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn listen(&self) -> &Arc<Listen> {
        &self.listen
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> Arc<Listen> {
        let mut config = ListenConfig::default();
        config.addresses = vec!["127.0.0.1:0".to_string()];
        config.network.max_connections = 1;
        Arc::new(Listen::plain(config))
    }

    #[test]
    fn bad_address_is_reported() {
        let mut config = ListenConfig::default();
        config.addresses = vec!["not-an-address".to_string()];
        let listen = Listen::plain(config);
        assert!(matches!(listen.addresses(), Err(ListenerError::Address(_))));
    }

    #[test]
    fn plain_listen_ignores_tls_section() {
        let mut config = ListenConfig::default();
        config.tls = Some(crate::config::TlsConfig {
            cert_path: "/nonexistent".into(),
            key_path: "/nonexistent".into(),
        });
        assert!(!Listen::plain(config.clone()).is_tls());
        assert!(matches!(Listen::new(config), Err(ListenerError::Tls(_))));
    }

    #[tokio::test]
    async fn permit_limits_connections() {
        let listen = loopback();
        let addr = listen.addresses().unwrap()[0];
        let listener = Listener::bind(listen, addr).unwrap();
        let local = listener.local_addr().unwrap();

        let _client = TcpStream::connect(local).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        drop(permit);
        assert_eq!(listener.available_permits(), 1);
    }
}
