//! # Backend Wire Protocol
//!
//! Control messages exchanged with the denoise backend over the websocket.
//!
//! ## Message Flow:
//! 1. **Upgrade**: HTTP upgrade carrying `Authorization: Bearer <api_key>`
//! 2. **Start**: client sends a JSON `start` message with the key and format
//! 3. **Ready**: backend answers `ready`, or `error` if it refuses the session
//! 4. **Audio**: binary messages both ways, raw 16-bit PCM, one response per
//!    request, in order
//!
//! ## Message Format:
//! - **Client → Server**: JSON text for control, binary for PCM batches
//! - **Server → Client**: JSON text for control/errors, binary for denoised PCM

use crate::audio::frame::{CHANNELS, INPUT_SAMPLE_RATE};
use crate::error::{DenoiseError, DenoiseResult};
use serde::{Deserialize, Serialize};

/// Encoding label announced in the `start` message.
pub const PCM_ENCODING: &str = "pcm_s16le";

/// Messages sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First message of every connection
    #[serde(rename = "start")]
    Start {
        api_key: String,
        sample_rate: u32,
        channels: u16,
        encoding: String,
    },

    /// Polite goodbye before closing the socket
    #[serde(rename = "stop")]
    Stop,
}

impl ClientMessage {
    pub fn start(api_key: &str) -> Self {
        ClientMessage::Start {
            api_key: api_key.to_string(),
            sample_rate: INPUT_SAMPLE_RATE,
            channels: CHANNELS,
            encoding: PCM_ENCODING.to_string(),
        }
    }
}

/// Messages sent by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Session accepted; audio may flow
    #[serde(rename = "ready")]
    Ready {
        #[serde(default)]
        session_id: Option<String>,
        /// Rate of the audio the backend will send back
        #[serde(default)]
        sample_rate: Option<u32>,
    },

    /// Session refused or broken
    #[serde(rename = "error")]
    Error {
        code: String,
        #[serde(default)]
        message: String,
    },
}

/// Parse a JSON text message from the backend.
pub fn parse_server_text(text: &str) -> DenoiseResult<ServerMessage> {
    Ok(serde_json::from_str(text)?)
}

/// Map a backend `error` message onto the error taxonomy.
pub fn classify_server_error(code: &str, message: &str) -> DenoiseError {
    match code {
        "unauthorized" | "invalid_api_key" | "forbidden" => {
            DenoiseError::Auth(format!("{}: {}", code, message))
        }
        _ => DenoiseError::Connect(format!("backend error {}: {}", code, message)),
    }
}

/// Check that a binary response can be a PCM batch.
pub fn validate_audio_payload(payload: &[u8]) -> DenoiseResult<()> {
    if payload.is_empty() {
        return Err(DenoiseError::Decode("empty audio response".to_string()));
    }
    if payload.len() % 2 != 0 {
        return Err(DenoiseError::Decode(format!(
            "audio response of {} bytes is not 16-bit aligned",
            payload.len()
        )));
    }
    Ok(())
}
