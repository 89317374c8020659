//! Graceful shutdown: waits for SIGINT or SIGTERM and resolves once either
//! fires, so the caller can let an in-flight reconciler pass finish rather
//! than cutting it off mid-sweep.

use tokio::signal::unix::{signal, SignalKind};

/// Resolves on the first SIGINT or SIGTERM. Call this as one arm of a
/// `tokio::select!` alongside the reconciler loop so an in-flight sweep
/// finishes before the process exits rather than being cut off mid-pass.
pub async fn wait_for_shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
    }
}
