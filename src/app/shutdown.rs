use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels `token` on SIGINT or SIGTERM.
///
/// The watcher also exits quietly when the token is cancelled by someone
/// else, so it never outlives the application.
pub fn spawn_signal_watcher(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = wait_for_signal() => token.cancel(),
        }
    })
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match unix_signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
                return wait_for_ctrl_c().await;
            }
        };

        tokio::select! {
            () = wait_for_ctrl_c() => {}
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        Err(err) => {
            error!("Failed to listen for SIGINT: {}", err);
            // Without a handler there is nothing to wait for.
            std::future::pending::<()>().await;
        }
    }
}
