use log::warn;
use tokio_util::sync::CancellationToken;

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
#[cfg(unix)]
pub async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Cancels `cancel` once the process is asked to stop.
pub async fn cancel_on_shutdown(cancel: CancellationToken) {
    match shutdown_signal().await {
        Ok(()) => {
            eprintln!("\nReceived interrupt, stopping benchmark...");
            cancel.cancel();
        }
        Err(e) => warn!("failed to install signal handler: {}", e),
    }
}
