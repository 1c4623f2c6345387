//! # Denoise Backend
//!
//! Everything between a finished batch and the remote denoise service.
//!
//! ## Modules:
//! - `manager`: connection lifecycle, request/response correlation, reconnects
//! - `transport`: the connect/send/receive seam and its websocket implementation
//! - `protocol`: control messages on the wire
//! - `state`: connection state machine
//! - `backoff`: reconnect delays

pub mod backoff;
pub mod manager;
pub mod protocol;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use manager::{BackendEvent, ConnectionManager, SendRejected};
pub use state::ConnectionState;
pub use transport::{BackendSink, BackendStream, Transport, WebSocketTransport};
