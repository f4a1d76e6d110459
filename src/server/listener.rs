//! TCP listener for the chat server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::connection::{handle_connection, ConnectionLimits};
use crate::config::ServerConfig;
use crate::protocol::ProtocolDispatcher;
use crate::{ParleyError, Result};

/// Chat server that accepts TCP connections.
pub struct ChatServer {
    listener: TcpListener,
    semaphore: Arc<Semaphore>,
    max_connections: usize,
    limits: ConnectionLimits,
}

impl ChatServer {
    /// Create a new ChatServer bound to the configured address.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Chat server listening on {}", local_addr);

        Ok(Self {
            listener,
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            limits: ConnectionLimits::from_config(config),
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get the maximum number of connections allowed.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get the number of available connection slots.
    pub fn available_connections(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get the number of active connections.
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Accept a new connection.
    ///
    /// Waits until a connection slot is available, then accepts the next
    /// incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit)> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ParleyError::Io(std::io::Error::other("semaphore closed")))?;

        let (stream, addr) = self.listener.accept().await?;
        debug!("Accepted connection from {}", addr);

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Each connection runs in its own task. On shutdown every online
    /// session is asked to close.
    pub async fn run_until<F>(self, dispatcher: Arc<ProtocolDispatcher>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down, closing {} session(s)", self.active_connections());
                    break;
                }
                result = self.accept() => match result {
                    Ok((stream, addr, permit)) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        let limits = self.limits.clone();
                        tokio::spawn(async move {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                            }
                            handle_connection(stream, Some(addr), dispatcher, limits).await;
                            // Releases the connection slot.
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        dispatcher.directory().close_all().await;
        Ok(())
    }

    /// Accept connections until Ctrl-C.
    pub async fn run_until_ctrl_c(self, dispatcher: Arc<ProtocolDispatcher>) -> Result<()> {
        self.run_until(dispatcher, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

/// A permit that represents an active connection slot.
///
/// When this permit is dropped, the connection slot is released.
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
