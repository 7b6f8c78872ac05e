//! App role: the parent process that owns the daemon
//!
//! Hosts the startup resolver and the event sink, spawns the daemon
//! sidecar with the bootstrap address, and dials the daemon back once
//! it reports where it is listening.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::rpc::client;
use crate::rpc::server::{self, AddressSlot};
use crate::sidecar::DaemonSidecar;

pub struct AppOptions {
    /// Bind address for the app's gRPC server; port 0 for OS-assigned.
    pub listen_addr: String,
    /// Spawn the daemon sidecar after binding.
    pub spawn_daemon: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            spawn_daemon: true,
        }
    }
}

/// Run the app until shutdown is requested.
pub async fn run(
    opts: AppOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (listener, local_addr) = server::bind(&opts.listen_addr).await?;

    // Wrapper scripts parse this line to learn the assigned port.
    println!("{{TERMLINK_GRPC_PORT: {}}}", local_addr.port());
    tracing::info!("app gRPC server listening on {}", local_addr);

    let slot = Arc::new(AddressSlot::new());
    let (events_tx, mut events_rx) = mpsc::channel(64);

    let server_slot = slot.clone();
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::serve_app(listener, server_slot, events_tx, server_shutdown).await {
            tracing::error!("app gRPC server error: {}", e);
        }
    });

    spawn_dial_back(slot.clone(), shutdown.clone());

    let mut sidecar = if opts.spawn_daemon {
        let mut sidecar = DaemonSidecar::new(local_addr.to_string());
        sidecar.start()?;
        Some(sidecar)
    } else {
        tracing::info!(
            "not spawning a daemon; waiting for one to call in at {}",
            local_addr
        );
        None
    };

    let mut shutdown = shutdown;
    let mut liveness = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => {
                    tracing::info!("event from daemon: [{}] {}", event.kind, event.message);
                }
                None => break,
            },
            _ = liveness.tick() => {
                if let Some(s) = sidecar.as_mut() {
                    if !s.is_running() {
                        tracing::warn!("daemon process exited");
                        sidecar = None;
                    }
                }
            }
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }

    if let Some(mut sidecar) = sidecar.take() {
        sidecar.stop();
    }
    let _ = server_task.await;
    Ok(())
}

/// Dial the daemon back whenever it (re)reports an address.
///
/// Runs until shutdown; an idempotent re-resolve from a restarted daemon
/// produces a fresh dial-back.
fn spawn_dial_back(slot: Arc<AddressSlot>, mut shutdown: watch::Receiver<bool>) {
    let mut addr_rx = slot.subscribe();
    tokio::spawn(async move {
        tracing::info!("waiting for daemon address");
        loop {
            let current = addr_rx.borrow_and_update().clone();
            if let Some(addr) = current {
                match client::ping_daemon(&addr, Duration::from_secs(1)).await {
                    Ok(()) => tracing::info!("daemon reachable at {}", addr),
                    Err(e) => tracing::warn!("daemon at {} not answering: {}", addr, e),
                }
            }
            tokio::select! {
                changed = addr_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
    });
}
