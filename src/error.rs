//! # Error Handling
//!
//! Error taxonomy for the denoise stage and its backend connection.
//!
//! ## Propagation Policy:
//! None of these errors ever reach the host pipeline through
//! [`crate::stage::DenoiseStage::process`]. They are produced and consumed
//! inside the connection manager and the stage, where every failure is turned
//! into passthrough audio plus a log line and a counter bump.
//!
//! The only place a caller sees a `DenoiseError` directly is construction:
//! loading or validating configuration (`Config`).
//!
//! ## Error Categories:
//! - **Auth**: backend rejected the API key during the handshake
//! - **Connect**: transport could not be established (DNS, TCP, TLS, upgrade)
//! - **NotConnected**: a batch was offered while no epoch was live
//! - **SendTimeout**: a pending batch got no response within the bound
//! - **Decode**: backend sent something that is not a valid response
//! - **Closed**: the connection manager has shut down
//! - **Config**: invalid configuration values

use std::fmt;
use tokio_tungstenite::tungstenite;

/// Errors produced by the denoise subsystem.
///
/// ## Usage Example:
/// ```rust
/// use stream_denoise::error::DenoiseError;
///
/// let err = DenoiseError::Connect("connection refused".to_string());
/// assert!(err.is_transient());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenoiseError {
    /// Credential rejected at connect time
    Auth(String),

    /// Transport failure while connecting or while the socket was live
    Connect(String),

    /// No live connection to hand a batch to
    NotConnected,

    /// No response for an in-flight batch within the response timeout
    SendTimeout { waited_ms: u64 },

    /// Malformed or unexpected message from the backend
    Decode(String),

    /// The connection manager has been shut down
    Closed,

    /// Configuration file or environment variable problems
    Config(String),
}

impl DenoiseError {
    /// Whether the connection manager should keep retrying after this error.
    ///
    /// `Config` (e.g. a key that cannot be put in a header) and `Closed` stop
    /// the reconnect loop for good. Everything else is retried; `Auth` is
    /// retried too since keys can be rotated server-side while the stage keeps
    /// running.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DenoiseError::Closed | DenoiseError::Config(_))
    }

    /// Short machine-readable label, used as a `tracing` field.
    pub fn kind(&self) -> &'static str {
        match self {
            DenoiseError::Auth(_) => "auth_error",
            DenoiseError::Connect(_) => "connect_error",
            DenoiseError::NotConnected => "not_connected",
            DenoiseError::SendTimeout { .. } => "send_timeout",
            DenoiseError::Decode(_) => "decode_error",
            DenoiseError::Closed => "closed",
            DenoiseError::Config(_) => "config_error",
        }
    }
}

impl fmt::Display for DenoiseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenoiseError::Auth(msg) => write!(f, "Authentication rejected: {}", msg),
            DenoiseError::Connect(msg) => write!(f, "Connection error: {}", msg),
            DenoiseError::NotConnected => write!(f, "Not connected to denoise backend"),
            DenoiseError::SendTimeout { waited_ms } => {
                write!(f, "No response from denoise backend after {}ms", waited_ms)
            }
            DenoiseError::Decode(msg) => write!(f, "Malformed backend message: {}", msg),
            DenoiseError::Closed => write!(f, "Connection manager is shut down"),
            DenoiseError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for DenoiseError {}

/// Automatic conversion from websocket errors.
///
/// An HTTP 401/403 answer to the upgrade request means the key was refused;
/// everything else is a transport problem.
impl From<tungstenite::Error> for DenoiseError {
    fn from(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::Http(response) => {
                let status = response.status();
                if status == tungstenite::http::StatusCode::UNAUTHORIZED
                    || status == tungstenite::http::StatusCode::FORBIDDEN
                {
                    DenoiseError::Auth(format!("backend answered HTTP {}", status.as_u16()))
                } else {
                    DenoiseError::Connect(format!("backend answered HTTP {}", status.as_u16()))
                }
            }
            _ => DenoiseError::Connect(err.to_string()),
        }
    }
}

/// JSON control messages that fail to parse are protocol violations.
impl From<serde_json::Error> for DenoiseError {
    fn from(err: serde_json::Error) -> Self {
        DenoiseError::Decode(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for DenoiseError {
    fn from(err: config::ConfigError) -> Self {
        DenoiseError::Config(err.to_string())
    }
}

/// Shorthand for `Result<T, DenoiseError>`.
pub type DenoiseResult<T> = Result<T, DenoiseError>;
