//! # Audio Frames
//!
//! The unit of audio exchanged with the host pipeline.
//!
//! ## Audio Format:
//! - **Encoding**: 16-bit signed little-endian linear PCM
//! - **Channels**: mono
//! - **Input rate**: 16kHz (fixed assumption for frames entering the stage)
//!
//! Frames are immutable once built. Output frames produced from backend audio
//! are always freshly allocated, never views into an input buffer.

use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;

/// Sample rate assumed for every frame the host feeds into the stage.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// 16-bit PCM.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Mono.
pub const CHANNELS: u16 = 1;

/// One chunk of mono 16-bit PCM audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    audio: Vec<u8>,
    sample_rate: u32,
    sequence: u64,
}

impl AudioFrame {
    /// Create a frame from raw little-endian PCM bytes.
    ///
    /// ## Parameters:
    /// - **audio**: PCM payload; a trailing odd byte is carried but never
    ///   counted as a sample
    /// - **sample_rate**: rate of the payload in Hz
    /// - **sequence**: monotonic position assigned by the producer
    pub fn new(audio: Vec<u8>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            audio,
            sample_rate,
            sequence,
        }
    }

    /// Create a frame from decoded samples.
    pub fn from_samples(samples: &[i16], sample_rate: u32, sequence: u64) -> Self {
        Self::new(encode_pcm(samples), sample_rate, sequence)
    }

    pub fn audio(&self) -> &[u8] {
        &self.audio
    }

    pub fn into_audio(self) -> Vec<u8> {
        self.audio
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn num_samples(&self) -> usize {
        self.audio.len() / BYTES_PER_SAMPLE
    }

    pub fn duration(&self) -> Duration {
        pcm_duration(self.audio.len(), self.sample_rate)
    }

    /// Decode the payload into samples.
    pub fn samples(&self) -> Vec<i16> {
        decode_pcm(&self.audio)
    }
}

/// Duration of `byte_len` bytes of mono 16-bit PCM at `sample_rate`.
pub fn pcm_duration(byte_len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let samples = (byte_len / BYTES_PER_SAMPLE) as u64;
    Duration::from_nanos(samples * 1_000_000_000 / sample_rate as u64)
}

/// Number of PCM bytes that make up `duration` at `sample_rate`.
pub fn pcm_bytes_for(duration: Duration, sample_rate: u32) -> usize {
    let samples = duration.as_nanos() * sample_rate as u128 / 1_000_000_000;
    samples as usize * BYTES_PER_SAMPLE
}

/// Decode little-endian 16-bit PCM. An odd trailing byte is ignored.
pub fn decode_pcm(bytes: &[u8]) -> Vec<i16> {
    let even = bytes.len() - bytes.len() % BYTES_PER_SAMPLE;
    let mut samples = vec![0i16; even / BYTES_PER_SAMPLE];
    LittleEndian::read_i16_into(&bytes[..even], &mut samples);
    samples
}

/// Encode samples as little-endian 16-bit PCM.
pub fn encode_pcm(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * BYTES_PER_SAMPLE];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}
