//! TCP server that services one connection at a time.
//!
//! The listener is bound once and owned by `Server`. Each accepted
//! connection runs its session to completion and is closed before the
//! next `accept`.

use crate::config::Config;
use crate::session::{handle_session, SessionConfig};
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Pending connection backlog for the listening socket.
const LISTEN_BACKLOG: i32 = 128;

/// Server instance
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    session: SessionConfig,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let target = format!("{}:{}", config.host, config.port);
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| ServerError::Resolve(target.clone(), e))?
            .next()
            .ok_or(ServerError::NoAddress(target))?;

        let listener = create_listener(addr).map_err(|e| ServerError::Bind(addr, e))?;
        let listener = TcpListener::from_std(listener).map_err(|e| ServerError::Bind(addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(addr, e))?;

        Ok(Server {
            listener,
            local_addr,
            session: config.session(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and service connections until `shutdown` resolves.
    ///
    /// `shutdown` is polled while waiting for a connection and while a
    /// session is running. When it fires, the active connection and the
    /// listener are dropped and this returns. Nothing after a successful
    /// bind is fatal, so there is no error to report.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            info!(address = %self.local_addr, "Waiting for connection");

            let (mut stream, peer) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            info!(peer = %peer, "Connected");

            let outcome = tokio::select! {
                _ = &mut shutdown => {
                    info!(peer = %peer, "Shutdown requested, closing active connection");
                    return;
                }
                outcome = handle_session(&mut stream, &self.session) => outcome,
            };

            match outcome {
                Ok(summary) => debug!(
                    peer = %peer,
                    end = ?summary.end,
                    bytes_read = summary.bytes_read,
                    acks_sent = summary.acks_sent,
                    "Session finished"
                ),
                Err(e) => warn!(peer = %peer, error = %e, "Session failed"),
            }

            drop(stream);
            info!(peer = %peer, "Connection closed");
        }
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Errors that prevent the server from starting.
#[derive(Debug)]
pub enum ServerError {
    Resolve(String, io::Error),
    NoAddress(String),
    Bind(SocketAddr, io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Resolve(target, e) => write!(f, "Failed to resolve '{}': {}", target, e),
            ServerError::NoAddress(target) => write!(f, "No address found for '{}'", target),
            ServerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Resolve(_, e) | ServerError::Bind(_, e) => Some(e),
            ServerError::NoAddress(_) => None,
        }
    }
}
