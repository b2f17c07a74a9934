//! Tapstake binary: loads configuration and runs the engine until Ctrl+C
//! or SIGTERM.

use tapstake::telemetry::init_tracing;
use tapstake::{AppConfig, TapstakeError, TapstakeServer};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), TapstakeError> {
    init_tracing();
    let server = TapstakeServer::builder()
        .config(AppConfig::load())
        .build()
        .await?;
    server.run(shutdown_signal()).await
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot install SIGTERM handler; Ctrl+C only"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl+C; shutting down");
    }
}
