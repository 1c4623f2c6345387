//! # Stream Denoise
//!
//! A fail-open, real-time denoise stage for audio pipelines.
//!
//! Raw 16kHz mono PCM frames go in, get batched and streamed to a remote
//! denoise backend over a websocket, and come back out denoised and resampled
//! to the configured output rate. When the backend is slow, unreachable or
//! rejects the credential, the original audio is passed through instead; the
//! pipeline never stalls and never loses audio.
//!
//! ## Module Layout:
//! - **audio**: frames, batching, resampling
//! - **backend**: connection manager, transport, wire protocol
//! - **stage**: the [`DenoiseStage`] the host pipeline drives
//! - **config**: [`ServiceConfig`] and file/env loading
//! - **stats**: counters and JSON snapshots
//! - **error**: [`DenoiseError`]

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod stage;
pub mod stats;

pub use audio::{AudioBatch, AudioFrame, FrameAccumulator};
pub use backend::{ConnectionState, Transport, WebSocketTransport};
pub use config::{AppConfig, ServiceConfig};
pub use error::{DenoiseError, DenoiseResult};
pub use stage::{DenoiseStage, FrameProcessor};
pub use stats::StatsSnapshot;
