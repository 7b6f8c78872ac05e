//! gRPC clients for the startup handshake
//!
//! The daemon reports its own address to the app's startup service with
//! bounded retry, then pushes events over a long-lived channel; the app
//! uses [`ping_daemon`] to dial the reported address back.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;

use super::proto::daemon_service_client::DaemonServiceClient;
use super::proto::events_service_client::EventsServiceClient;
use super::proto::startup_service_client::StartupServiceClient;
use super::proto::{Empty, ResolveDaemonAddressRequest};
use super::{endpoint_uri, validate_endpoint};
use crate::error::ResolveError;

/// Retry schedule for the startup handshake.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// First retry delay; doubles after every transient failure.
    pub initial_backoff: Duration,
    /// Upper bound for a single backoff interval.
    pub max_backoff: Duration,
    /// Timeout for one connection attempt.
    pub connect_timeout: Duration,
    /// Overall budget for the whole handshake.
    pub deadline: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            deadline: Duration::from_secs(10),
        }
    }
}

/// Open a channel to `addr` with a connect timeout.
async fn connect(addr: &str, connect_timeout: Duration) -> Result<Channel, ResolveError> {
    Endpoint::from_shared(endpoint_uri(addr))
        .map_err(|source| ResolveError::Unreachable {
            addr: addr.to_string(),
            source,
        })?
        .connect_timeout(connect_timeout)
        .connect()
        .await
        .map_err(|source| ResolveError::Unreachable {
            addr: addr.to_string(),
            source,
        })
}

/// Report `own_addr` to the app's startup service at `app_addr`.
///
/// Must only be called after the daemon's own server is bound: the app
/// dials the reported address back as soon as it arrives. Transient
/// failures (the app still coming up) are retried with exponential
/// backoff until `retry.deadline`; validation failures are never
/// retried. The backoff sleep aborts as soon as `shutdown` flips to true.
pub async fn resolve(
    app_addr: &str,
    own_addr: &str,
    retry: &RetryConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ResolveError> {
    if let Err(reason) = validate_endpoint(own_addr) {
        return Err(ResolveError::InvalidAddress {
            addr: own_addr.to_string(),
            reason,
        });
    }

    let started = Instant::now();
    let mut backoff = retry.initial_backoff;
    let mut attempt = 1u32;

    loop {
        match try_resolve(app_addr, own_addr, retry.connect_timeout).await {
            Ok(()) => {
                tracing::info!(
                    "handshake with {} completed on attempt {}",
                    app_addr,
                    attempt
                );
                return Ok(());
            }
            Err(err) if err.is_transient() => {
                tracing::debug!("handshake attempt {} failed: {}", attempt, err);
            }
            Err(err) => return Err(err),
        }

        let elapsed = started.elapsed();
        if elapsed >= retry.deadline {
            return Err(ResolveError::Timeout {
                deadline: retry.deadline,
            });
        }

        // Never sleep past the deadline.
        let pause = backoff.min(retry.deadline - elapsed);
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shutdown.wait_for(|stop| *stop) => return Err(ResolveError::Cancelled),
        }

        backoff = (backoff * 2).min(retry.max_backoff);
        attempt += 1;
    }
}

async fn try_resolve(
    app_addr: &str,
    own_addr: &str,
    connect_timeout: Duration,
) -> Result<(), ResolveError> {
    let channel = connect(app_addr, connect_timeout).await?;
    let mut client = StartupServiceClient::new(channel);

    let request = ResolveDaemonAddressRequest {
        address: own_addr.to_string(),
    };

    match client.resolve_daemon_address(request).await {
        Ok(_) => Ok(()),
        Err(status) if status.code() == Code::InvalidArgument => {
            Err(ResolveError::InvalidAddress {
                addr: own_addr.to_string(),
                reason: status.message().to_string(),
            })
        }
        Err(status) => Err(ResolveError::Rejected(status)),
    }
}

/// Connect the long-lived events channel to the app.
pub async fn connect_events(
    app_addr: &str,
    connect_timeout: Duration,
) -> Result<EventsServiceClient<Channel>, ResolveError> {
    let channel = connect(app_addr, connect_timeout).await?;
    Ok(EventsServiceClient::new(channel))
}

/// Ping the daemon's control service to confirm its reported address is live.
pub async fn ping_daemon(addr: &str, connect_timeout: Duration) -> Result<(), ResolveError> {
    let channel = connect(addr, connect_timeout).await?;
    let mut client = DaemonServiceClient::new(channel);
    client.ping(Empty {}).await.map_err(ResolveError::Rejected)?;
    Ok(())
}
