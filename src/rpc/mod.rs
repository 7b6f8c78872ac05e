//! RPC module for termlink daemon IPC
//!
//! Implements Gauntlet-style gRPC communication between the app process
//! and the terminal daemon.

pub mod client;
pub mod server;

// Include generated protobuf code
pub mod proto {
    tonic::include_proto!("termlink");
}

/// Environment variable carrying the app's bootstrap address to the daemon.
pub const APP_ADDR_ENV: &str = "TERMLINK_APP_ADDR";

/// Turn a plain `host:port` into the URI form tonic expects.
pub fn endpoint_uri(addr: &str) -> String {
    format!("http://{}", addr)
}

/// Check that `addr` is a plausible `host:port` endpoint.
///
/// Accepts anything that parses as a socket address, plus `name:port`
/// forms like `localhost:34567`. Reachability is not checked.
pub fn validate_endpoint(addr: &str) -> Result<(), String> {
    if addr.is_empty() {
        return Err("address is empty".to_string());
    }
    if addr.parse::<std::net::SocketAddr>().is_ok() {
        return Ok(());
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            if port.parse::<u16>().is_ok() {
                Ok(())
            } else {
                Err(format!("invalid port in {:?}", addr))
            }
        }
        _ => Err(format!("expected host:port, got {:?}", addr)),
    }
}
