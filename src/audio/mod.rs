//! # Audio Module
//!
//! PCM plumbing around the denoise backend.
//!
//! ## Key Components:
//! - **Frame**: immutable 16-bit mono PCM chunk exchanged with the host
//! - **Accumulator**: batches frames into ~140ms units for the network
//! - **Resampler**: converts backend audio to the configured output rate
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz on input
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod accumulator;
pub mod frame;
pub mod resampler;

pub use accumulator::{AudioBatch, FrameAccumulator};
pub use frame::{AudioFrame, BYTES_PER_SAMPLE, CHANNELS, INPUT_SAMPLE_RATE};
pub use resampler::resample;
