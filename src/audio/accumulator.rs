//! # Frame Accumulation
//!
//! Collects small host frames into batches large enough to be worth a network
//! round trip to the denoise backend.
//!
//! ## Batching Policy:
//! - Frames are appended to a byte buffer until the buffered duration reaches
//!   the configured window (140ms by default)
//! - The whole buffer is then flushed as one [`AudioBatch`] and cleared
//! - A batch is never split; the buffer never holds more than the window plus
//!   one input frame
//!
//! ## Known Limitation:
//! A partially filled buffer is discarded when the accumulator is dropped.
//! At most one window of trailing audio (140ms by default) is lost at
//! teardown in exchange for never sending undersized batches.
//!
//! ## Key Rust Concepts:
//! - **Moving out of a buffer**: `std::mem::take` hands the filled buffer to
//!   the batch and leaves an empty one behind, so no bytes are copied on flush
//! - **Drop**: the discard at teardown is logged from a `Drop` impl, which runs
//!   however the owning stage goes away
//! - **Option as a signal**: `push` returns `Some(batch)` only on a flush, so
//!   the caller's `if let` reads as "a batch is ready"

use crate::audio::frame::{pcm_bytes_for, pcm_duration, AudioFrame, BYTES_PER_SAMPLE};
use std::time::Duration; // Window length and buffered duration
use tracing::debug;

/// A contiguous block of accumulated audio sent to the backend as one unit.
///
/// Keeps the original frames it was built from so that, if the batch cannot
/// be denoised, exactly those frames can be passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBatch {
    sequence: u64,
    audio: Vec<u8>,
    sample_rate: u32,
    frames: Vec<AudioFrame>,
}

impl AudioBatch {
    /// Batch number, monotonic per accumulator.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Concatenated PCM of every frame in the batch.
    pub fn audio(&self) -> &[u8] {
        &self.audio
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        pcm_duration(self.audio.len(), self.sample_rate)
    }

    /// Sequence of the first input frame, used to stamp the denoised output.
    pub fn first_frame_sequence(&self) -> u64 {
        self.frames.first().map(|f| f.sequence()).unwrap_or_default()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Give back the original frames for passthrough.
    pub fn into_frames(self) -> Vec<AudioFrame> {
        self.frames
    }
}

/// Duration-based accumulator for 16-bit mono PCM frames.
pub struct FrameAccumulator {
    /// Append-only until flushed
    buffer: Vec<u8>,

    /// Frames whose bytes are currently in `buffer`
    frames: Vec<AudioFrame>,

    /// Flush as soon as `buffer` holds at least this many bytes
    threshold_bytes: usize,

    sample_rate: u32,

    next_batch_sequence: u64,
}

impl FrameAccumulator {
    /// Create an accumulator flushing every `window` of audio at `sample_rate`.
    ///
    /// ## Example:
    /// 140ms at 16kHz = 2240 samples = 4480 bytes per batch
    pub fn new(window: Duration, sample_rate: u32) -> Self {
        let threshold_bytes = pcm_bytes_for(window, sample_rate).max(BYTES_PER_SAMPLE);
        Self {
            buffer: Vec::with_capacity(threshold_bytes * 2),
            frames: Vec::new(),
            threshold_bytes,
            sample_rate,
            next_batch_sequence: 0,
        }
    }

    /// Whether a frame can be concatenated with the others without
    /// misaligning samples or mixing rates.
    pub fn accepts(&self, frame: &AudioFrame) -> bool {
        frame.sample_rate() == self.sample_rate && frame.audio().len() % BYTES_PER_SAMPLE == 0
    }

    /// Append a frame; returns a batch once the window is full.
    pub fn push(&mut self, frame: AudioFrame) -> Option<AudioBatch> {
        self.buffer.extend_from_slice(frame.audio());
        self.frames.push(frame);

        if self.buffer.len() < self.threshold_bytes {
            return None;
        }

        let batch = AudioBatch {
            sequence: self.next_batch_sequence,
            audio: std::mem::take(&mut self.buffer),
            sample_rate: self.sample_rate,
            frames: std::mem::take(&mut self.frames),
        };
        self.next_batch_sequence += 1;
        self.buffer.reserve(self.threshold_bytes * 2);

        Some(batch)
    }

    /// Empty the buffer and hand back the frames it held, unbatched.
    ///
    /// Used when the stage switches to passthrough mid-window so that frames
    /// already accepted are still delivered.
    pub fn take_pending(&mut self) -> Vec<AudioFrame> {
        self.buffer.clear();
        std::mem::take(&mut self.frames)
    }

    pub fn buffered_duration(&self) -> Duration {
        pcm_duration(self.buffer.len(), self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn threshold_bytes(&self) -> usize {
        self.threshold_bytes
    }
}

impl Drop for FrameAccumulator {
    fn drop(&mut self) {
        if !self.frames.is_empty() {
            debug!(
                discarded_ms = %self.buffered_duration().as_millis(),
                frames = self.frames.len(),
                "Discarding partial accumulation at teardown"
            );
        }
    }
}
