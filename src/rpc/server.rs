//! gRPC services for the app and daemon processes
//!
//! The app side hosts `StartupService` (the address resolver) and
//! `EventsService`; the daemon side hosts `DaemonService`, which the app
//! dials back once the daemon's address is known.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

use super::proto::daemon_service_server::{DaemonService, DaemonServiceServer};
use super::proto::events_service_server::{EventsService, EventsServiceServer};
use super::proto::startup_service_server::{StartupService, StartupServiceServer};
use super::proto::{Empty, PublishEventRequest, ResolveDaemonAddressRequest};
use super::validate_endpoint;

/// One-slot cell holding the daemon address reported during startup.
///
/// Writers go through [`AddressSlot::publish`]; readers either poll
/// [`AddressSlot::get`] or await a subscribed receiver. Repeated publishes
/// overwrite, so a restarted daemon can re-resolve.
#[derive(Debug)]
pub struct AddressSlot {
    tx: watch::Sender<Option<String>>,
}

impl AddressSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Record `addr`, returning the value it replaced, if any.
    pub fn publish(&self, addr: String) -> Option<String> {
        self.tx.send_replace(Some(addr))
    }

    /// Current value without waiting.
    pub fn get(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Receiver for awaiting the address becoming available or changing.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

impl Default for AddressSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Startup handshake implementation, app side.
pub struct StartupServiceImpl {
    slot: Arc<AddressSlot>,
}

impl StartupServiceImpl {
    pub fn new(slot: Arc<AddressSlot>) -> Self {
        Self { slot }
    }
}

#[tonic::async_trait]
impl StartupService for StartupServiceImpl {
    async fn resolve_daemon_address(
        &self,
        request: Request<ResolveDaemonAddressRequest>,
    ) -> Result<Response<Empty>, Status> {
        let address = request.into_inner().address;

        if let Err(reason) = validate_endpoint(&address) {
            tracing::warn!("RPC: resolve_daemon_address rejected: {}", reason);
            return Err(Status::invalid_argument(reason));
        }

        match self.slot.publish(address.clone()) {
            None => tracing::info!("RPC: daemon address resolved: {}", address),
            Some(previous) if previous != address => {
                tracing::warn!(
                    "RPC: daemon address re-resolved: {} -> {} (daemon restarted?)",
                    previous,
                    address
                );
            }
            Some(_) => tracing::debug!("RPC: daemon address re-resolved, unchanged"),
        }

        Ok(Response::new(Empty {}))
    }
}

/// Event sink implementation, app side. Forwards pushed events to the
/// app's main loop over an mpsc channel.
pub struct EventsServiceImpl {
    events_tx: mpsc::Sender<PublishEventRequest>,
}

impl EventsServiceImpl {
    pub fn new(events_tx: mpsc::Sender<PublishEventRequest>) -> Self {
        Self { events_tx }
    }
}

#[tonic::async_trait]
impl EventsService for EventsServiceImpl {
    async fn publish_event(
        &self,
        request: Request<PublishEventRequest>,
    ) -> Result<Response<Empty>, Status> {
        let event = request.into_inner();
        tracing::debug!("RPC: event received: {}", event.kind);

        if self.events_tx.send(event).await.is_err() {
            return Err(Status::unavailable("event consumer stopped"));
        }

        Ok(Response::new(Empty {}))
    }
}

/// Control surface implementation, daemon side.
pub struct DaemonServiceImpl;

#[tonic::async_trait]
impl DaemonService for DaemonServiceImpl {
    async fn ping(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        tracing::debug!("RPC: ping received");
        Ok(Response::new(Empty {}))
    }
}

/// Bind a loopback listener, returning it with its OS-assigned address.
///
/// The listener is bound before any serving starts so the caller knows
/// the final address up front (bind-before-dial).
pub async fn bind(addr: &str) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

/// Serve `StartupService` and `EventsService` for the app process until
/// `shutdown` flips to true.
pub async fn serve_app(
    listener: TcpListener,
    slot: Arc<AddressSlot>,
    events_tx: mpsc::Sender<PublishEventRequest>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), tonic::transport::Error> {
    tonic::transport::Server::builder()
        .add_service(StartupServiceServer::new(StartupServiceImpl::new(slot)))
        .add_service(EventsServiceServer::new(EventsServiceImpl::new(events_tx)))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

/// Serve `DaemonService` for the daemon process until `shutdown` flips
/// to true.
pub async fn serve_daemon(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), tonic::transport::Error> {
    tonic::transport::Server::builder()
        .add_service(DaemonServiceServer::new(DaemonServiceImpl))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}
