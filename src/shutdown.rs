use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and ctrl-c.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. All long-running loops watch this token and drain gracefully.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("Received ctrl-c, initiating graceful shutdown");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("Received ctrl-c, initiating graceful shutdown");
        }

        token_clone.cancel();
    });

    token
}
