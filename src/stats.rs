//! # Stage Statistics
//!
//! Counters shared between the denoise stage (host thread) and its connection
//! manager task.
//!
//! ## Thread Safety:
//! Every counter is an `AtomicU64` behind one `Arc<StageStats>`. Both sides
//! bump counters without locking; readers take a [`StatsSnapshot`], a plain
//! copy that can be logged or serialized to JSON.
//!
//! `Relaxed` ordering is enough: counters are independent and only ever read
//! for reporting.

use crate::backend::state::ConnectionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use uuid::Uuid;

/// Live counters for one stage.
#[derive(Debug)]
pub struct StageStats {
    stage_id: Uuid,
    created_at: DateTime<Utc>,
    started: Instant,

    /// Frames handed to `process()`
    pub frames_in: AtomicU64,
    /// Frames returned to the host (passthrough and denoised)
    pub frames_out: AtomicU64,
    /// Input frames returned unmodified
    pub frames_passed_through: AtomicU64,

    /// Batches accepted by the connection manager
    pub batches_sent: AtomicU64,
    /// Batches refused by `send` (not connected or queue full)
    pub batches_rejected: AtomicU64,
    /// Batches answered with denoised audio
    pub batches_denoised: AtomicU64,
    /// Batches given back unanswered after a connection loss or shutdown
    pub batches_reclaimed: AtomicU64,
    /// Responses with no matching request, dropped
    pub stale_responses: AtomicU64,

    pub connect_attempts: AtomicU64,
    /// Successful handshakes
    pub epochs: AtomicU64,
    pub connection_failures: AtomicU64,
    pub auth_failures: AtomicU64,
}

impl StageStats {
    pub fn new(stage_id: Uuid) -> Self {
        Self {
            stage_id,
            created_at: Utc::now(),
            started: Instant::now(),
            frames_in: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
            frames_passed_through: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            batches_rejected: AtomicU64::new(0),
            batches_denoised: AtomicU64::new(0),
            batches_reclaimed: AtomicU64::new(0),
            stale_responses: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            epochs: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
        }
    }

    pub fn stage_id(&self) -> Uuid {
        self.stage_id
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Copy every counter plus the current connection state.
    pub fn snapshot(&self, state: ConnectionState) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            stage_id: self.stage_id,
            created_at: self.created_at,
            uptime_seconds: self.started.elapsed().as_secs(),
            connection_state: state,
            frames_in: load(&self.frames_in),
            frames_out: load(&self.frames_out),
            frames_passed_through: load(&self.frames_passed_through),
            batches_sent: load(&self.batches_sent),
            batches_rejected: load(&self.batches_rejected),
            batches_denoised: load(&self.batches_denoised),
            batches_reclaimed: load(&self.batches_reclaimed),
            stale_responses: load(&self.stale_responses),
            connect_attempts: load(&self.connect_attempts),
            epochs: load(&self.epochs),
            connection_failures: load(&self.connection_failures),
            auth_failures: load(&self.auth_failures),
        }
    }
}

/// Point-in-time copy of [`StageStats`].
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub stage_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub connection_state: ConnectionState,
    pub frames_in: u64,
    pub frames_out: u64,
    pub frames_passed_through: u64,
    pub batches_sent: u64,
    pub batches_rejected: u64,
    pub batches_denoised: u64,
    pub batches_reclaimed: u64,
    pub stale_responses: u64,
    pub connect_attempts: u64,
    pub epochs: u64,
    pub connection_failures: u64,
    pub auth_failures: u64,
}

impl StatsSnapshot {
    /// Share of answered batches that came back denoised (0.0 to 1.0).
    pub fn denoise_ratio(&self) -> f64 {
        let resolved = self.batches_denoised + self.batches_reclaimed;
        if resolved > 0 {
            self.batches_denoised as f64 / resolved as f64
        } else {
            0.0
        }
    }
}
