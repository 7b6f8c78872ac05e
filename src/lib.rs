//! Termlink: terminal helper with a Gauntlet-style daemon architecture
//!
//! Two co-located processes start independently on OS-assigned loopback
//! ports and find each other through a one-shot gRPC startup handshake:
//! the daemon reports its own bound address to the app process, and the
//! app dials back. No fixed well-known port is involved.

pub mod app;
pub mod daemon;
pub mod error;
pub mod rpc;
pub mod sidecar;
