//! Duplex framed connection to the upstream conversation service.

pub mod backoff;
pub mod client;
pub mod mock;
pub mod protocol;
pub mod transport;

pub use backoff::Backoff;
pub use client::{UpstreamClient, UpstreamEvent, UpstreamHandle, UpstreamState};
pub use protocol::ServerFrame;
pub use transport::{Duplex, UpstreamTransport, WebSocketTransport, WireFrame};
