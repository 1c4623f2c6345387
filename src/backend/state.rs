//! # Connection State
//!
//! Lifecycle of the streaming connection to the denoise backend.
//!
//! ## State Transitions:
//! ```text
//! Disconnected --connect()------> Connecting
//! Connecting   --handshake ok---> Connected
//! Connecting   --handshake fail-> Failed
//! Connected    --socket error---> Failed
//! Failed       --after backoff--> Connecting
//! any          --shutdown-------> Disconnected (terminal)
//! ```
//!
//! Only the connection manager holds the writing half ([`StateCell`]);
//! everybody else gets a `watch::Receiver` and can read or await changes.

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tracing::debug;

/// Current state of the backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started yet, or shut down for good
    Disconnected,
    /// Transport being established / handshake in progress
    Connecting,
    /// Epoch live, batches can be sent
    Connected,
    /// Last attempt or epoch failed; a reconnect is scheduled
    Failed,
}

impl ConnectionState {
    /// Status string for logs and the stats snapshot.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// `Disconnected` is reachable from anywhere (shutdown); the terminal
    /// case is tracked by [`StateCell`], not here.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Failed)
                | (Failed, Connecting)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owning side of the connection state.
///
/// Rejects illegal transitions and, once shut down, every transition.
pub struct StateCell {
    tx: watch::Sender<ConnectionState>,
    terminated: bool,
}

impl StateCell {
    pub fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (
            Self {
                tx,
                terminated: false,
            },
            rx,
        )
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next`. Returns false (and changes nothing) if the
    /// transition is not allowed.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if self.terminated {
            return false;
        }

        let current = self.get();
        if !current.can_transition_to(next) {
            debug!(from = %current, to = %next, "Ignoring illegal state transition");
            return false;
        }

        self.tx.send_replace(next);
        true
    }

    /// Final transition to `Disconnected`; later transitions are ignored.
    pub fn terminate(&mut self) {
        if !self.terminated {
            self.tx.send_replace(ConnectionState::Disconnected);
            self.terminated = true;
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}
