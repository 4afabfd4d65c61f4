//! ack-server: a serial acknowledgment server
//!
//! Accepts one TCP connection at a time and answers every read with a fixed
//! acknowledgment payload until the peer disconnects.
//!
//! Features:
//! - Byte mode (one byte per read, `$` terminator) and chunk mode
//! - Configurable acknowledgment payload and optional idle timeout
//! - Configuration via CLI arguments, environment or TOML file
//! - Clean shutdown on SIGINT/SIGTERM/SIGQUIT

mod config;
mod server;
mod session;

use config::Config;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        mode = ?config.mode,
        ack = %config.ack,
        idle_timeout = ?config.idle_timeout,
        "Starting ack-server"
    );

    // Sessions are strictly serial, so one thread is all we need.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let server = Server::bind(&config).inspect_err(|e| {
            error!(error = %e, "Failed to start server");
        })?;
        info!(address = %server.local_addr(), "Listening");

        server.run(wait_for_shutdown_signal()).await;
        info!("Server stopped");
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

/// Resolve once a shutdown signal arrives. If no handler can be installed,
/// never resolve, so the server keeps serving instead of exiting at once.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigquit) =
            match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
                (Ok(term), Ok(quit)) => (term, quit),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl-C");
                    ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigquit.recv() => {},
            _ = ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    until_signal(tokio::signal::ctrl_c()).await
}

/// Wait on a signal listener. A listener that fails to install is logged
/// and treated as a signal that never arrives.
async fn until_signal<F>(listener: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = listener.await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
