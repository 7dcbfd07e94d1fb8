//! Shutdown signal handling for a running pipeline.

use tokio::signal;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Waits for a reason to shut the pipeline down and broadcasts it through `cln_token`.
///
/// This happens in 3 cases:
///     1. the process receives SIGINT or SIGTERM
///     2. the user explicitly asks for shutdown through `shutdown_from_user`
///     3. somebody else already cancelled the token (e.g. the pipeline finished on its own)
///
/// The token is cancelled when this future completes or is dropped.
pub async fn shutdown_signal(
    shutdown_from_user: Option<oneshot::Receiver<()>>,
    cln_token: CancellationToken,
) {
    // will call cln_token.cancel() on drop of guard
    let _drop_guard = cln_token.clone().drop_guard();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    let shutdown_from_user_future = async {
        match shutdown_from_user {
            Some(rx) => {
                rx.await.ok();
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "Signal received, shutting down"),
        _ = terminate => info!(signal = "SIGTERM", "Signal received, shutting down"),
        _ = shutdown_from_user_future => info!("Shutdown requested"),
        _ = cln_token.cancelled() => {},
    }
}
