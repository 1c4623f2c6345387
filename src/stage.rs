//! # Denoise Stage
//!
//! The pipeline-facing unit. The host hands it raw 16kHz frames and gets back
//! audio in the same order: denoised where the backend answered, the original
//! frames wherever it could not.
//!
//! ## Processing Pipeline:
//! 1. **Accumulate**: frames are batched to the accumulation window
//! 2. **Submit**: full batches go to the [`ConnectionManager`] without waiting
//! 3. **Resolve**: denoised batches are resampled to the output rate; batches
//!    the manager could not deliver come back and are passed through
//! 4. **Sequence**: output is released strictly in input order
//!
//! ## Fail-Open:
//! `process()` never returns an error and never waits on the network. Any
//! backend trouble shows up as passthrough audio, a `warn!` in the logs and a
//! counter in [`StageStats`].
//!
//! ## Key Rust Concepts:
//! - **Default type parameters**: `DenoiseStage<T: Transport = WebSocketTransport>`
//!   lets production code name `DenoiseStage` while tests plug in a mock
//! - **Shared counters**: `Arc<StageStats>` is read by the stage and written by
//!   the manager task without a lock

use crate::audio::accumulator::{AudioBatch, FrameAccumulator};
use crate::audio::frame::{AudioFrame, INPUT_SAMPLE_RATE};
use crate::audio::resampler::resample;
use crate::backend::manager::{BackendEvent, ConnectionManager};
use crate::backend::state::ConnectionState;
use crate::backend::transport::{Transport, WebSocketTransport};
use crate::config::ServiceConfig;
use crate::error::DenoiseResult;
use crate::stats::{StageStats, StatsSnapshot};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Host boundary: a synchronous frame-in, frames-out pipeline stage.
pub trait FrameProcessor {
    /// Feed one input frame; returns whatever output is ready, possibly none.
    fn process(&mut self, frame: AudioFrame) -> Vec<AudioFrame>;

    /// Output that became ready since the last call, without new input.
    fn drain_ready(&mut self) -> Vec<AudioFrame>;
}

/// A span of output, in input order.
#[derive(Debug)]
enum Slot {
    /// Batch in flight, identified by its batch sequence
    Awaiting(u64),
    Ready(Vec<AudioFrame>),
}

/// Keeps output in input order while batches are in flight.
#[derive(Debug, Default)]
struct OutputSequencer {
    slots: VecDeque<Slot>,
    in_flight: usize,
}

impl OutputSequencer {
    fn push_ready(&mut self, frames: Vec<AudioFrame>) {
        if frames.is_empty() {
            return;
        }
        match self.slots.back_mut() {
            Some(Slot::Ready(tail)) => tail.extend(frames),
            _ => self.slots.push_back(Slot::Ready(frames)),
        }
    }

    fn push_awaiting(&mut self, batch_sequence: u64) {
        self.slots.push_back(Slot::Awaiting(batch_sequence));
        self.in_flight += 1;
    }

    /// Fill the slot of a batch. False if no such batch is in flight.
    fn resolve(&mut self, batch_sequence: u64, frames: Vec<AudioFrame>) -> bool {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| matches!(slot, Slot::Awaiting(seq) if *seq == batch_sequence));

        match slot {
            Some(slot) => {
                *slot = Slot::Ready(frames);
                self.in_flight -= 1;
                true
            }
            None => false,
        }
    }

    /// Everything ahead of the first unresolved batch.
    fn take_ready(&mut self) -> Vec<AudioFrame> {
        let mut out = Vec::new();
        while let Some(Slot::Ready(_)) = self.slots.front() {
            if let Some(Slot::Ready(frames)) = self.slots.pop_front() {
                out.extend(frames);
            }
        }
        out
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }
}

/// Real-time denoise stage over a backend [`Transport`].
///
/// ## Lifecycle:
/// - **new**: validates the config; nothing touches the network yet
/// - **first `process()`** (or [`DenoiseStage::start`]): spawns the connection
///   manager on the current tokio runtime
/// - **shutdown / drop**: the connection is closed; a partially filled batch
///   is discarded
///
/// ## Example:
/// ```no_run
/// # async fn run() -> stream_denoise::DenoiseResult<()> {
/// use stream_denoise::{AudioFrame, DenoiseStage, FrameProcessor, ServiceConfig};
///
/// let mut stage = DenoiseStage::websocket(ServiceConfig::new("my-api-key"))?;
/// let out = stage.process(AudioFrame::new(vec![0; 640], 16000, 0));
/// let rest = stage.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct DenoiseStage<T: Transport = WebSocketTransport> {
    config: Arc<ServiceConfig>,
    stats: Arc<StageStats>,
    accumulator: FrameAccumulator,
    manager: ConnectionManager,
    /// Consumed when the manager is started
    transport: Option<T>,
    events: mpsc::UnboundedReceiver<BackendEvent>,
    sequencer: OutputSequencer,
}

impl DenoiseStage<WebSocketTransport> {
    /// Stage talking to the websocket backend at `config.backend_url`.
    pub fn websocket(config: ServiceConfig) -> DenoiseResult<Self> {
        Self::new(config, WebSocketTransport)
    }
}

impl<T: Transport> DenoiseStage<T> {
    /// Create a stage. Fails only on invalid configuration.
    pub fn new(config: ServiceConfig, transport: T) -> DenoiseResult<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let stats = Arc::new(StageStats::new(Uuid::new_v4()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(config.clone(), stats.clone(), events_tx);
        let accumulator = FrameAccumulator::new(config.accumulation_window(), INPUT_SAMPLE_RATE);

        info!(
            stage_id = %stats.stage_id(),
            backend_url = %config.backend_url,
            window_ms = config.accumulation_window_ms,
            out_frame_rate = config.out_frame_rate,
            "Denoise stage created"
        );

        Ok(Self {
            config,
            stats,
            accumulator,
            manager,
            transport: Some(transport),
            events: events_rx,
            sequencer: OutputSequencer::default(),
        })
    }

    /// Start connecting now instead of on the first frame.
    ///
    /// Returns false if the connection manager could not be started (no
    /// tokio runtime); the stage then stays in passthrough for good.
    pub fn start(&mut self) -> bool {
        if let Some(transport) = self.transport.take() {
            if let Err(err) = self.manager.start(transport) {
                warn!(
                    stage_id = %self.stats.stage_id(),
                    error = %err,
                    "Could not start denoise backend connection, audio will pass through"
                );
            }
        }
        self.manager.is_started()
    }

    pub fn stage_id(&self) -> Uuid {
        self.stats.stage_id()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Stream of connection states, starting with the current one.
    pub fn state_changes(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.manager.subscribe())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.connection_state())
    }

    /// Batches sent and not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.sequencer.in_flight()
    }

    /// Wait for the next batch to resolve and return the output it released.
    ///
    /// Returns immediately with whatever is ready when nothing is in flight.
    pub async fn next_output(&mut self) -> Vec<AudioFrame> {
        loop {
            self.collect_events();
            let ready = self.take_output();
            if !ready.is_empty() || self.sequencer.in_flight() == 0 {
                return ready;
            }

            match self.events.recv().await {
                Some(event) => self.apply(event),
                None => return self.take_output(),
            }
        }
    }

    /// Wait until every in-flight batch has resolved.
    ///
    /// Resolution is bounded by the response timeout, so this does not hang
    /// on a silent backend.
    pub async fn drain_in_flight(&mut self) -> Vec<AudioFrame> {
        let mut out = self.take_output();
        while self.sequencer.in_flight() > 0 {
            let ready = self.next_output().await;
            if ready.is_empty() && self.sequencer.in_flight() > 0 {
                // Event channel gone with batches still owed
                break;
            }
            out.extend(ready);
        }
        out
    }

    /// Close the backend connection and return the output still owed.
    ///
    /// In-flight batches come back as passthrough; a partial accumulation is
    /// discarded.
    pub async fn shutdown(mut self) -> Vec<AudioFrame> {
        self.manager.shutdown().await;
        self.collect_events();
        let out = self.take_output();

        let stats = self.stats();
        info!(
            stage_id = %stats.stage_id,
            frames_in = stats.frames_in,
            frames_out = stats.frames_out,
            batches_denoised = stats.batches_denoised,
            batches_reclaimed = stats.batches_reclaimed,
            "Denoise stage shut down"
        );
        out
    }

    /// Send a full batch, or pass it through if the connection refuses it.
    fn submit(&mut self, batch: AudioBatch) {
        let sequence = batch.sequence();
        match self.manager.send(batch) {
            Ok(()) => {
                StageStats::incr(&self.stats.batches_sent);
                self.sequencer.push_awaiting(sequence);
            }
            Err(rejected) => {
                StageStats::incr(&self.stats.batches_rejected);
                debug!(batch = sequence, error = %rejected.error, "Batch not sent, passing through");
                self.pass_through(rejected.batch.into_frames());
            }
        }
    }

    fn pass_through(&mut self, frames: Vec<AudioFrame>) {
        StageStats::add(&self.stats.frames_passed_through, frames.len() as u64);
        self.sequencer.push_ready(frames);
    }

    fn collect_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Denoised { batch, audio } => {
                let pcm = resample(&audio, self.config.backend_sample_rate, self.config.out_frame_rate);
                let frame = AudioFrame::new(pcm, self.config.out_frame_rate, batch.first_frame_sequence());
                if !self.sequencer.resolve(batch.sequence(), vec![frame]) {
                    debug!(batch = batch.sequence(), "Denoised batch is not in flight, dropping");
                }
            }
            BackendEvent::Reclaimed { batch, reason } => {
                let sequence = batch.sequence();
                let frames = batch.into_frames();
                debug!(batch = sequence, reason = reason.kind(), "Passing reclaimed batch through");
                StageStats::add(&self.stats.frames_passed_through, frames.len() as u64);
                if !self.sequencer.resolve(sequence, frames) {
                    debug!(batch = sequence, "Reclaimed batch is not in flight, dropping");
                }
            }
        }
    }

    fn take_output(&mut self) -> Vec<AudioFrame> {
        let out = self.sequencer.take_ready();
        StageStats::add(&self.stats.frames_out, out.len() as u64);
        out
    }
}

impl<T: Transport> FrameProcessor for DenoiseStage<T> {
    fn process(&mut self, frame: AudioFrame) -> Vec<AudioFrame> {
        StageStats::incr(&self.stats.frames_in);
        self.start();

        // State first: the manager reclaims before it publishes a failure, so
        // everything it gave back is already queued once we see it.
        let state = self.manager.state();
        self.collect_events();

        if state != ConnectionState::Connected || !self.accumulator.accepts(&frame) {
            let mut frames = self.accumulator.take_pending();
            frames.push(frame);
            self.pass_through(frames);
        } else if let Some(batch) = self.accumulator.push(frame) {
            self.submit(batch);
        }

        self.take_output()
    }

    fn drain_ready(&mut self) -> Vec<AudioFrame> {
        self.collect_events();
        self.take_output()
    }
}
