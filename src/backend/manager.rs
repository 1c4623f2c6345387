//! # Connection Manager
//!
//! Owns the streaming connection to the denoise backend for one stage.
//!
//! ## Architecture:
//! ```text
//!  stage (host thread)            supervisor task (tokio)
//!  ───────────────────            ───────────────────────
//!  send(batch) ──try_send──▶ outbound queue ──▶ sink.send_audio
//!  state()     ◀──watch──────── StateCell
//!  events      ◀──unbounded──── Denoised / Reclaimed  ◀── stream.next_audio
//! ```
//!
//! ## Key Responsibilities:
//! - **Connect**: transport connect + authentication, bounded by the connect timeout
//! - **Receive loop**: responses are matched FIFO against pending requests
//! - **Failure detection**: read errors, remote close, malformed responses and
//!   response timeouts all end the epoch
//! - **Reconnection**: capped exponential backoff, no external trigger;
//!   errors that can never succeed (`Config`, `Closed`) stop the loop
//! - **Bounded writes**: a socket write that outlives the oldest response
//!   deadline ends the epoch with `SendTimeout`, so a backend that stops
//!   reading cannot wedge the task
//! - **Reclaim**: every batch that will never be answered goes back to the
//!   stage so its original audio can be passed through
//!
//! ## Key Rust Concepts Used:
//! - **tokio::select!**: one loop races shutdown, inbound audio, the response
//!   deadline and outbound batches; `biased;` makes shutdown win ties
//! - **watch channels**: the connection state and the shutdown flag are both
//!   single-value broadcasts; readers never block the writer
//! - **Ownership hand-off**: a batch moves stage → queue → `PendingRequest` →
//!   `BackendEvent`, so exactly one place owns its audio at any time
//!
//! `send` never awaits. The host thread only ever does a `try_send` on a
//! bounded queue and reads a `watch` value.

use crate::audio::accumulator::AudioBatch;
use crate::backend::backoff::Backoff;
use crate::backend::protocol::validate_audio_payload;
use crate::backend::state::{ConnectionState, StateCell};
use crate::backend::transport::{BackendSink, BackendStream, Transport};
use crate::config::ServiceConfig;
use crate::error::{DenoiseError, DenoiseResult};
use crate::stats::StageStats;
use std::collections::VecDeque; // FIFO of pending requests
use std::sync::Arc;
use tokio::sync::{mpsc, watch}; // Outbound queue, state and shutdown signals
use tokio::task::JoinHandle;
use tokio::time::Instant; // Tokio's clock so deadlines follow paused test time
use tracing::{debug, error, info, warn, Instrument}; // Structured logging

/// Outcome of a batch, delivered to the stage.
#[derive(Debug)]
pub enum BackendEvent {
    /// The backend answered; `audio` is PCM at the backend sample rate
    Denoised { batch: AudioBatch, audio: Vec<u8> },

    /// The batch will never be answered (connection lost, timed out, shut
    /// down); its original frames should be passed through
    Reclaimed { batch: AudioBatch, reason: DenoiseError },
}

/// A batch `send` refused, handed back to the caller.
#[derive(Debug)]
pub struct SendRejected {
    pub batch: AudioBatch,
    pub error: DenoiseError,
}

/// One outbound batch awaiting its response.
#[derive(Debug)]
struct PendingRequest {
    batch: AudioBatch,
    epoch: u64,
    sent_at: Instant,
}

/// Why an epoch ended.
enum EpochEnd {
    Failed(DenoiseError),
    Shutdown,
}

/// Everything the supervisor task takes ownership of when it starts.
struct SupervisorParts {
    state: StateCell,
    outbound: mpsc::Receiver<AudioBatch>,
    events: mpsc::UnboundedSender<BackendEvent>,
    shutdown: watch::Receiver<bool>,
}

/// Handle to the connection lifecycle of one stage.
///
/// Created idle; [`ConnectionManager::start`] spawns the supervisor task that
/// connects and keeps reconnecting until [`ConnectionManager::shutdown`] or
/// drop.
pub struct ConnectionManager {
    config: Arc<ServiceConfig>,
    stats: Arc<StageStats>,
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::Sender<AudioBatch>,
    shutdown: watch::Sender<bool>,
    parts: Option<SupervisorParts>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create an idle manager.
    ///
    /// ## Parameters:
    /// - **config**: shared read-only service configuration
    /// - **stats**: counters shared with the stage
    /// - **events**: where denoised and reclaimed batches are delivered
    pub fn new(
        config: Arc<ServiceConfig>,
        stats: Arc<StageStats>,
        events: mpsc::UnboundedSender<BackendEvent>,
    ) -> Self {
        let (state_cell, state_rx) = StateCell::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            stats,
            state: state_rx,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            parts: Some(SupervisorParts {
                state: state_cell,
                outbound: outbound_rx,
                events,
                shutdown: shutdown_rx,
            }),
            task: None,
        }
    }

    /// Spawn the supervisor task on the current tokio runtime.
    ///
    /// Fails with `Closed` if already started (or shut down) and with
    /// `Connect` when called outside a runtime.
    pub fn start<T: Transport>(&mut self, transport: T) -> DenoiseResult<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| DenoiseError::Connect("no tokio runtime available".to_string()))?;
        let parts = self.parts.take().ok_or(DenoiseError::Closed)?;

        let supervisor = Supervisor {
            config: self.config.clone(),
            transport,
            state: parts.state,
            outbound: parts.outbound,
            events: parts.events,
            shutdown: parts.shutdown,
            stats: self.stats.clone(),
            pending: VecDeque::new(),
            epoch: 0,
        };

        let span = tracing::info_span!("denoise_backend", stage_id = %self.stats.stage_id());
        self.task = Some(handle.spawn(supervisor.run().instrument(span)));
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.task.is_some()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Hand a batch to the connection without waiting.
    ///
    /// ## Returns:
    /// - **Ok(())**: queued for the live epoch; its outcome arrives later as a
    ///   [`BackendEvent`]
    /// - **Err(SendRejected)**: not connected or the writer is backed up; the
    ///   batch comes back so the caller can pass its audio through
    pub fn send(&self, batch: AudioBatch) -> Result<(), SendRejected> {
        if self.state() != ConnectionState::Connected {
            return Err(SendRejected {
                batch,
                error: DenoiseError::NotConnected,
            });
        }

        match self.outbound.try_send(batch) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(batch)) => {
                debug!("Outbound queue full, rejecting batch");
                Err(SendRejected {
                    batch,
                    error: DenoiseError::NotConnected,
                })
            }
            Err(mpsc::error::TrySendError::Closed(batch)) => Err(SendRejected {
                batch,
                error: DenoiseError::Closed,
            }),
        }
    }

    /// Stop the supervisor and wait for it to close the connection.
    ///
    /// Pending and queued batches are reclaimed before this returns.
    pub async fn shutdown(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Connection supervisor ended abnormally");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // The task notices and closes the socket on its own
        self.shutdown.send_replace(true);
    }
}

/// The background task driving the state machine.
struct Supervisor<T: Transport> {
    config: Arc<ServiceConfig>,
    transport: T,
    state: StateCell,
    outbound: mpsc::Receiver<AudioBatch>,
    events: mpsc::UnboundedSender<BackendEvent>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<StageStats>,
    pending: VecDeque<PendingRequest>,
    epoch: u64,
}

impl<T: Transport> Supervisor<T> {
    async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.reconnect_min(), self.config.reconnect_max());

        loop {
            if self.shutdown_requested() {
                break;
            }

            self.reclaim_queued(DenoiseError::NotConnected);
            self.state.transition(ConnectionState::Connecting);
            StageStats::incr(&self.stats.connect_attempts);

            let attempt = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                result = connect(&self.transport, &self.config) => result,
            };

            let failure = match attempt {
                Ok((sink, stream)) => {
                    backoff.reset();
                    self.epoch += 1;
                    StageStats::incr(&self.stats.epochs);
                    self.state.transition(ConnectionState::Connected);
                    info!(epoch = self.epoch, "Connected to denoise backend");

                    match self.run_epoch(sink, stream).await {
                        EpochEnd::Shutdown => break,
                        EpochEnd::Failed(err) => err,
                    }
                }
                Err(err) => err,
            };

            StageStats::incr(&self.stats.connection_failures);
            if matches!(failure, DenoiseError::Auth(_)) {
                StageStats::incr(&self.stats.auth_failures);
            }

            // Pending audio goes back before anyone can observe `Failed`
            self.reclaim_pending(&failure);
            self.reclaim_queued(failure.clone());

            if !failure.is_transient() {
                error!(
                    error = %failure,
                    kind = failure.kind(),
                    "Denoise backend cannot be reached with this configuration, passing audio through for good"
                );
                break;
            }

            self.state.transition(ConnectionState::Failed);

            let delay = backoff.next_delay();
            warn!(
                epoch = self.epoch,
                error = %failure,
                kind = failure.kind(),
                retry_in_ms = %delay.as_millis(),
                attempts = backoff.attempts(),
                "Denoise backend unavailable, passing audio through"
            );

            if !self.wait_backoff(delay).await {
                break;
            }
        }

        self.reclaim_pending(&DenoiseError::Closed);
        self.reclaim_queued(DenoiseError::Closed);
        self.state.terminate();
        info!("Denoise backend connection shut down");
    }

    /// Drive one epoch, then close the connection whatever the outcome.
    async fn run_epoch(&mut self, mut sink: T::Sink, mut stream: T::Stream) -> EpochEnd {
        let end = self.drive_epoch(&mut sink, &mut stream).await;
        let close_timeout = self.config.response_timeout();
        if tokio::time::timeout(close_timeout, sink.close()).await.is_err() {
            debug!(epoch = self.epoch, "Backend close timed out, dropping connection");
        }
        end
    }

    /// The send/receive loop of one epoch.
    async fn drive_epoch(&mut self, sink: &mut T::Sink, stream: &mut T::Stream) -> EpochEnd {
        let response_timeout = self.config.response_timeout();

        loop {
            let deadline = self.pending.front().map(|p| p.sent_at + response_timeout);

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => return EpochEnd::Shutdown,
                inbound = stream.next_audio() => match inbound {
                    Some(Ok(audio)) => {
                        if let Err(err) = self.on_response(audio) {
                            return EpochEnd::Failed(err);
                        }
                    }
                    Some(Err(err)) => return EpochEnd::Failed(err),
                    None => {
                        return EpochEnd::Failed(DenoiseError::Connect(
                            "backend closed the stream".to_string(),
                        ))
                    }
                },
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    return EpochEnd::Failed(DenoiseError::SendTimeout {
                        waited_ms: response_timeout.as_millis() as u64,
                    });
                }
                Some(batch) = self.outbound.recv() => {
                    let audio = batch.audio().to_vec();
                    self.pending.push_back(PendingRequest {
                        batch,
                        epoch: self.epoch,
                        sent_at: Instant::now(),
                    });
                    // The write may block on a backend that stopped reading;
                    // the oldest response deadline and shutdown still apply
                    let write_deadline = self
                        .pending
                        .front()
                        .map(|p| p.sent_at + response_timeout)
                        .unwrap_or_else(|| Instant::now() + response_timeout);

                    let written = tokio::select! {
                        biased;
                        _ = wait_for_shutdown(&mut self.shutdown) => return EpochEnd::Shutdown,
                        result = tokio::time::timeout_at(write_deadline, sink.send_audio(audio)) => result,
                    };

                    match written {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => return EpochEnd::Failed(err),
                        Err(_) => {
                            debug!(epoch = self.epoch, pending = self.pending.len(), "Backend write stalled");
                            return EpochEnd::Failed(DenoiseError::SendTimeout {
                                waited_ms: response_timeout.as_millis() as u64,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Match a response to the oldest pending request.
    fn on_response(&mut self, audio: Vec<u8>) -> DenoiseResult<()> {
        validate_audio_payload(&audio)?;

        let Some(request) = self.pending.pop_front() else {
            StageStats::incr(&self.stats.stale_responses);
            debug!(epoch = self.epoch, bytes = audio.len(), "Dropping response with no pending request");
            return Ok(());
        };

        debug!(
            epoch = request.epoch,
            batch = request.batch.sequence(),
            rtt_ms = %request.sent_at.elapsed().as_millis(),
            "Denoised batch received"
        );
        StageStats::incr(&self.stats.batches_denoised);
        let _ = self.events.send(BackendEvent::Denoised {
            batch: request.batch,
            audio,
        });
        Ok(())
    }

    /// End every correlation of the current epoch.
    fn reclaim_pending(&mut self, reason: &DenoiseError) {
        while let Some(request) = self.pending.pop_front() {
            self.reclaim(request.batch, reason.clone());
        }
    }

    /// Give back batches that were queued but never written.
    fn reclaim_queued(&mut self, reason: DenoiseError) {
        while let Ok(batch) = self.outbound.try_recv() {
            self.reclaim(batch, reason.clone());
        }
    }

    fn reclaim(&self, batch: AudioBatch, reason: DenoiseError) {
        StageStats::incr(&self.stats.batches_reclaimed);
        debug!(batch = batch.sequence(), reason = reason.kind(), "Reclaiming batch for passthrough");
        let _ = self.events.send(BackendEvent::Reclaimed { batch, reason });
    }

    /// Sleep out the backoff. Batches that slip into the queue meanwhile are
    /// reclaimed right away. Returns false on shutdown.
    async fn wait_backoff(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => return false,
                _ = &mut sleep => return true,
                Some(batch) = self.outbound.recv() => self.reclaim(batch, DenoiseError::NotConnected),
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Establish and authenticate one connection within the connect timeout.
async fn connect<T: Transport>(
    transport: &T,
    config: &ServiceConfig,
) -> DenoiseResult<(T::Sink, T::Stream)> {
    let timeout = config.connect_timeout();
    match tokio::time::timeout(timeout, transport.connect(config)).await {
        Ok(result) => result,
        Err(_) => Err(DenoiseError::Connect(format!(
            "connect timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Resolves once shutdown is requested or the manager handle is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::accumulator::FrameAccumulator;
    use crate::audio::frame::AudioFrame;
    use crate::backend::mock::{MockTransport, Plan};
    use std::time::Duration;
    use uuid::Uuid;

    fn test_config() -> Arc<ServiceConfig> {
        Arc::new(
            ServiceConfig::new("test-key")
                .with_backend_url("ws://mock")
                .with_accumulation_window_ms(20)
                .with_response_timeout_ms(200)
                .with_connect_timeout_ms(200)
                .with_reconnect_backoff_ms(10, 40),
        )
    }

    fn batches(count: usize) -> Vec<AudioBatch> {
        let mut acc = FrameAccumulator::new(Duration::from_millis(20), 16000);
        (0..count as u64)
            .filter_map(|seq| acc.push(AudioFrame::new(vec![seq as u8; 640], 16000, seq)))
            .collect()
    }

    fn start_manager(
        transport: MockTransport,
    ) -> (ConnectionManager, mpsc::UnboundedReceiver<BackendEvent>, Arc<StageStats>) {
        let stats = Arc::new(StageStats::new(Uuid::new_v4()));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut manager = ConnectionManager::new(test_config(), stats.clone(), tx);
        manager.start(transport).unwrap();
        (manager, rx, stats)
    }

    async fn wait_state(manager: &ConnectionManager, wanted: ConnectionState) {
        let mut rx = manager.subscribe();
        tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| *s == wanted))
            .await
            .expect("state not reached in time")
            .expect("state channel closed");
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<BackendEvent>) -> BackendEvent {
        tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("no event in time")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_send_rejected_before_connected() {
        let stats = Arc::new(StageStats::new(Uuid::new_v4()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(test_config(), stats, tx);

        let batch = batches(1).remove(0);
        let rejected = manager.send(batch.clone()).unwrap_err();
        assert_eq!(rejected.error, DenoiseError::NotConnected);
        assert_eq!(rejected.batch, batch);
    }

    #[tokio::test]
    async fn test_echo_responses_in_fifo_order() {
        let (mut manager, mut events, _stats) = start_manager(MockTransport::new(Plan::Echo));
        wait_state(&manager, ConnectionState::Connected).await;

        for batch in batches(3) {
            manager.send(batch).unwrap();
        }

        for expected in 0..3 {
            match next_event(&mut events).await {
                BackendEvent::Denoised { batch, audio } => {
                    assert_eq!(batch.sequence(), expected);
                    assert_eq!(audio, batch.audio());
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_auth_failure_retries_with_backoff() {
        let transport = MockTransport::new(Plan::Fail(DenoiseError::Auth("bad key".into())));
        let (mut manager, _events, stats) = start_manager(transport.clone());

        tokio::time::timeout(Duration::from_secs(3), async {
            while transport.connect_count() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("manager stopped retrying");

        assert_ne!(manager.state(), ConnectionState::Connected);
        assert!(stats.auth_failures.load(std::sync::atomic::Ordering::Relaxed) >= 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_response_timeout_reclaims_and_reconnects() {
        let transport = MockTransport::new(Plan::Silent);
        let (mut manager, mut events, _stats) = start_manager(transport.clone());
        wait_state(&manager, ConnectionState::Connected).await;

        let batch = batches(1).remove(0);
        manager.send(batch).unwrap();

        match next_event(&mut events).await {
            BackendEvent::Reclaimed { batch, reason } => {
                assert_eq!(batch.sequence(), 0);
                assert_eq!(reason.kind(), "send_timeout");
            }
            other => panic!("unexpected event {:?}", other),
        }

        // A new epoch follows without anyone asking
        tokio::time::timeout(Duration::from_secs(3), async {
            while transport.connect_count() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no reconnect");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_drop_reclaims_in_flight_and_recovers() {
        let transport = MockTransport::new(Plan::Echo);
        transport.push_plan(Plan::Silent);
        let (mut manager, mut events, stats) = start_manager(transport.clone());
        wait_state(&manager, ConnectionState::Connected).await;

        let mut all = batches(2);
        let second = all.pop().unwrap();
        manager.send(all.pop().unwrap()).unwrap();
        // Let the supervisor write it before the connection drops
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.drop_connections();

        match next_event(&mut events).await {
            BackendEvent::Reclaimed { batch, .. } => assert_eq!(batch.sequence(), 0),
            other => panic!("unexpected event {:?}", other),
        }

        // Second epoch echoes
        tokio::time::timeout(Duration::from_secs(3), async {
            while transport.connect_count() < 2 || manager.state() != ConnectionState::Connected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("did not reconnect");

        manager.send(second).unwrap();
        match next_event(&mut events).await {
            BackendEvent::Denoised { batch, .. } => assert_eq!(batch.sequence(), 1),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(stats.epochs.load(std::sync::atomic::Ordering::Relaxed) >= 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_response_fails_epoch() {
        let transport = MockTransport::new(Plan::Garbage);
        let (mut manager, mut events, _stats) = start_manager(transport);
        wait_state(&manager, ConnectionState::Connected).await;

        manager.send(batches(1).remove(0)).unwrap();
        match next_event(&mut events).await {
            BackendEvent::Reclaimed { reason, .. } => assert_eq!(reason.kind(), "decode_error"),
            other => panic!("unexpected event {:?}", other),
        }
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal() {
        let transport = MockTransport::new(Plan::Echo);
        let (mut manager, _events, _stats) = start_manager(transport.clone());
        wait_state(&manager, ConnectionState::Connected).await;

        let mut state = manager.subscribe();
        manager.shutdown().await;
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
        assert_eq!(transport.closed_count(), 1);
    }

    #[tokio::test]
    async fn test_stalled_write_times_out_and_reclaims() {
        let transport = MockTransport::new(Plan::Stalled);
        let (mut manager, mut events, stats) = start_manager(transport.clone());
        wait_state(&manager, ConnectionState::Connected).await;

        manager.send(batches(1).remove(0)).unwrap();
        match next_event(&mut events).await {
            BackendEvent::Reclaimed { batch, reason } => {
                assert_eq!(batch.sequence(), 0);
                assert_eq!(reason.kind(), "send_timeout");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(stats.connection_failures.load(std::sync::atomic::Ordering::Relaxed) >= 1);

        // Close never completes on this backend either; shutdown is still bounded
        tokio::time::timeout(Duration::from_secs(2), manager.shutdown())
            .await
            .expect("shutdown stalled on a backend that stopped reading");
    }

    #[tokio::test]
    async fn test_connect_error_on_every_attempt_keeps_retrying() {
        let transport = MockTransport::new(Plan::Fail(DenoiseError::Connect("connection refused".into())));
        let (mut manager, _events, stats) = start_manager(transport.clone());

        tokio::time::timeout(Duration::from_secs(3), async {
            while transport.connect_count() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("manager stopped retrying");

        assert_ne!(manager.state(), ConnectionState::Connected);
        let rejected = manager.send(batches(1).remove(0)).unwrap_err();
        assert_eq!(rejected.error, DenoiseError::NotConnected);
        assert!(stats.connection_failures.load(std::sync::atomic::Ordering::Relaxed) >= 2);
        assert_eq!(stats.auth_failures.load(std::sync::atomic::Ordering::Relaxed), 0);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_permanent_error_stops_reconnecting() {
        let transport = MockTransport::new(Plan::Fail(DenoiseError::Config("bad header".into())));
        let (mut manager, _events, _stats) = start_manager(transport.clone());

        // Several backoff periods pass without a second attempt
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::timeout(Duration::from_secs(1), manager.shutdown())
            .await
            .expect("supervisor should already be gone");
    }
}
