//! Daemon role: the background terminal helper process
//!
//! Startup follows a strict bind-before-dial order: the daemon's own
//! gRPC server must be live before the handshake reports its address,
//! so the app can dial back the moment the address arrives.

use std::error::Error;

use tokio::sync::watch;

use crate::error::ResolveError;
use crate::rpc::client::{self, RetryConfig};
use crate::rpc::proto::PublishEventRequest;
use crate::rpc::server;

/// Startup handshake progress, broadcast over a watch channel for
/// logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    NotStarted,
    AwaitingOwnListener,
    DialingApp,
    Resolved,
    Failed,
}

pub struct DaemonOptions {
    /// Bootstrap address of the app's startup service.
    pub app_addr: String,
    /// Bind address for the daemon's own control server; port 0 for
    /// OS-assigned.
    pub listen_addr: String,
    pub retry: RetryConfig,
}

/// Run the handshake against `app_addr`, tracking progress in `phase_tx`.
///
/// Precondition: the daemon server behind `own_addr` is already bound.
pub async fn run_handshake(
    phase_tx: &watch::Sender<HandshakePhase>,
    app_addr: &str,
    own_addr: &str,
    retry: &RetryConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ResolveError> {
    phase_tx.send_replace(HandshakePhase::DialingApp);
    tracing::debug!("dialing app startup service at {}", app_addr);

    match client::resolve(app_addr, own_addr, retry, shutdown).await {
        Ok(()) => {
            phase_tx.send_replace(HandshakePhase::Resolved);
            Ok(())
        }
        Err(err) => {
            phase_tx.send_replace(HandshakePhase::Failed);
            Err(err)
        }
    }
}

/// Run the daemon until shutdown is requested.
///
/// A failed handshake is fatal: without the app reachable the daemon has
/// no channel to push events over, so the error propagates to process
/// exit instead of running half-initialized.
pub async fn run(
    opts: DaemonOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (phase_tx, _phase_rx) = watch::channel(HandshakePhase::NotStarted);

    phase_tx.send_replace(HandshakePhase::AwaitingOwnListener);
    let (listener, own_addr) = server::bind(&opts.listen_addr).await?;
    tracing::info!("daemon control server listening on {}", own_addr);

    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::serve_daemon(listener, server_shutdown).await {
            tracing::error!("daemon gRPC server error: {}", e);
        }
    });

    let handshake = run_handshake(
        &phase_tx,
        &opts.app_addr,
        &own_addr.to_string(),
        &opts.retry,
        shutdown.clone(),
    )
    .await;

    if let Err(err) = handshake {
        tracing::error!("startup handshake with {} failed: {}", opts.app_addr, err);
        server_task.abort();
        return Err(format!("startup handshake with {} failed: {}", opts.app_addr, err).into());
    }

    match client::connect_events(&opts.app_addr, opts.retry.connect_timeout).await {
        Ok(mut events) => {
            let started = PublishEventRequest {
                kind: "daemon-started".to_string(),
                message: format!("daemon listening on {}", own_addr),
            };
            if let Err(e) = events.publish_event(started).await {
                tracing::warn!("could not push startup event: {}", e);
            }
        }
        Err(e) => tracing::warn!("could not connect events channel: {}", e),
    }

    tracing::info!("daemon ready");

    let _ = shutdown.wait_for(|stop| *stop).await;
    tracing::info!("daemon shutting down");
    let _ = server_task.await;
    Ok(())
}
