//! Integration tests for the startup handshake, over real loopback
//! sockets on OS-assigned ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use termlink::daemon::{self, HandshakePhase};
use termlink::error::ResolveError;
use termlink::rpc::client::{self, RetryConfig};
use termlink::rpc::proto::startup_service_client::StartupServiceClient;
use termlink::rpc::proto::{PublishEventRequest, ResolveDaemonAddressRequest};
use termlink::rpc::server::{self, AddressSlot};
use termlink::rpc::endpoint_uri;

struct AppStack {
    addr: SocketAddr,
    slot: Arc<AddressSlot>,
    events_rx: mpsc::Receiver<PublishEventRequest>,
    // Keeps the server alive for the duration of the test.
    _shutdown_tx: watch::Sender<bool>,
}

/// Bind the app-side services on an ephemeral port and serve them in the
/// background.
async fn start_app_stack() -> AppStack {
    let (listener, addr) = server::bind("127.0.0.1:0").await.unwrap();
    let slot = Arc::new(AddressSlot::new());
    let (events_tx, events_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let serve_slot = slot.clone();
    tokio::spawn(async move {
        let _ = server::serve_app(listener, serve_slot, events_tx, shutdown_rx).await;
    });

    AppStack {
        addr,
        slot,
        events_rx,
        _shutdown_tx: shutdown_tx,
    }
}

fn quick_retry() -> RetryConfig {
    RetryConfig {
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(100),
        connect_timeout: Duration::from_millis(500),
        deadline: Duration::from_secs(2),
    }
}

fn idle_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Grab an ephemeral port and release it so nothing is listening there.
async fn dead_addr() -> SocketAddr {
    let (listener, addr) = server::bind("127.0.0.1:0").await.unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_resolve_round_trip() {
    let stack = start_app_stack().await;
    let (_tx, rx) = idle_shutdown();

    client::resolve(&stack.addr.to_string(), "127.0.0.1:45678", &quick_retry(), rx)
        .await
        .unwrap();

    assert_eq!(stack.slot.get().as_deref(), Some("127.0.0.1:45678"));
}

#[tokio::test]
async fn test_empty_own_address_rejected_locally() {
    let (_tx, rx) = idle_shutdown();

    // Fails before any dialing; the target address doesn't matter.
    let err = client::resolve("127.0.0.1:1", "", &quick_retry(), rx)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::InvalidAddress { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_malformed_address_rejected_by_server_without_storing() {
    let stack = start_app_stack().await;

    // Go through a raw client to bypass the resolver's local validation.
    let mut startup = StartupServiceClient::connect(endpoint_uri(&stack.addr.to_string()))
        .await
        .unwrap();
    let status = startup
        .resolve_daemon_address(ResolveDaemonAddressRequest {
            address: "not-an-endpoint".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert_eq!(stack.slot.get(), None);
}

#[tokio::test]
async fn test_resolve_waits_for_late_listener() {
    let addr = dead_addr().await;

    let slot = Arc::new(AddressSlot::new());
    let (events_tx, _events_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    // App comes up on the reserved port 200ms after the daemon starts dialing.
    let serve_slot = slot.clone();
    let listen = addr.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let (listener, _) = server::bind(&listen).await.unwrap();
        let _ = server::serve_app(listener, serve_slot, events_tx, shutdown_rx).await;
    });

    let (_tx, rx) = idle_shutdown();
    client::resolve(&addr.to_string(), "127.0.0.1:40000", &quick_retry(), rx)
        .await
        .unwrap();

    assert_eq!(slot.get().as_deref(), Some("127.0.0.1:40000"));
}

#[tokio::test]
async fn test_resolve_times_out_when_app_never_listens() {
    let addr = dead_addr().await;

    let retry = RetryConfig {
        deadline: Duration::from_millis(500),
        ..quick_retry()
    };
    let (_tx, rx) = idle_shutdown();

    let started = Instant::now();
    let err = client::resolve(&addr.to_string(), "127.0.0.1:40000", &retry, rx)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ResolveError::Timeout { .. }), "got {:?}", err);
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_repeat_resolve_overwrites_address() {
    let stack = start_app_stack().await;
    let (_tx, rx) = idle_shutdown();
    let app = stack.addr.to_string();

    client::resolve(&app, "127.0.0.1:40001", &quick_retry(), rx.clone())
        .await
        .unwrap();
    client::resolve(&app, "127.0.0.1:40002", &quick_retry(), rx)
        .await
        .unwrap();

    assert_eq!(stack.slot.get().as_deref(), Some("127.0.0.1:40002"));
}

#[tokio::test]
async fn test_cancel_aborts_retry_promptly() {
    let addr = dead_addr().await;

    let retry = RetryConfig {
        deadline: Duration::from_secs(5),
        ..quick_retry()
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let started = Instant::now();
    let app = addr.to_string();
    let handle = tokio::spawn(async move {
        client::resolve(&app, "127.0.0.1:40000", &retry, shutdown_rx).await
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown_tx.send(true).unwrap();

    let err = handle.await.unwrap().unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ResolveError::Cancelled), "got {:?}", err);
    // Must abort within about one backoff interval, not ride out the
    // full 5s deadline.
    assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_handshake_phases_on_success() {
    let stack = start_app_stack().await;
    let (phase_tx, phase_rx) = watch::channel(HandshakePhase::NotStarted);
    let (_tx, rx) = idle_shutdown();

    daemon::run_handshake(
        &phase_tx,
        &stack.addr.to_string(),
        "127.0.0.1:40000",
        &quick_retry(),
        rx,
    )
    .await
    .unwrap();

    assert_eq!(*phase_rx.borrow(), HandshakePhase::Resolved);
}

#[tokio::test]
async fn test_handshake_failure_is_terminal() {
    let addr = dead_addr().await;
    let (phase_tx, phase_rx) = watch::channel(HandshakePhase::NotStarted);
    let retry = RetryConfig {
        deadline: Duration::from_millis(300),
        ..quick_retry()
    };
    let (_tx, rx) = idle_shutdown();

    daemon::run_handshake(&phase_tx, &addr.to_string(), "127.0.0.1:40000", &retry, rx)
        .await
        .unwrap_err();

    assert_eq!(*phase_rx.borrow(), HandshakePhase::Failed);
}

#[tokio::test]
async fn test_daemon_event_reaches_app() {
    let mut stack = start_app_stack().await;

    let mut events = client::connect_events(&stack.addr.to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    events
        .publish_event(PublishEventRequest {
            kind: "daemon-started".to_string(),
            message: "daemon listening on 127.0.0.1:40000".to_string(),
        })
        .await
        .unwrap();

    let event = stack.events_rx.recv().await.unwrap();
    assert_eq!(event.kind, "daemon-started");
}

#[tokio::test]
async fn test_dial_back_ping() {
    let (listener, addr) = server::bind("127.0.0.1:0").await.unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = server::serve_daemon(listener, shutdown_rx).await;
    });

    client::ping_daemon(&addr.to_string(), Duration::from_secs(1))
        .await
        .unwrap();
}
