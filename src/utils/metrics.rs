//! Observability and Metrics
//!
//! Counters for codec, transfer and moderation activity. A [`Metrics`] instance is
//! owned by whoever owns the session context and shared through an `Arc`; there is
//! no process-wide instance.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for protocol operations
#[derive(Debug)]
pub struct Metrics {
    /// Messages encoded for the wire
    pub messages_encoded: AtomicU64,
    /// Messages decoded off the wire
    pub messages_decoded: AtomicU64,
    /// Bytes encoded
    pub bytes_encoded: AtomicU64,
    /// Bytes decoded
    pub bytes_decoded: AtomicU64,
    /// Frames dropped as malformed
    pub malformed_frames: AtomicU64,
    /// Tickets created
    pub transfers_started: AtomicU64,
    /// Tickets that reached DONE
    pub transfers_completed: AtomicU64,
    /// Tickets that reached ERROR
    pub transfers_failed: AtomicU64,
    /// Local cancellations that took effect
    pub transfers_cancelled: AtomicU64,
    /// Send attempts refused by admission control
    pub transfers_rejected: AtomicU64,
    /// Data segments produced locally
    pub segments_sent: AtomicU64,
    /// Data segments accepted from the remote party
    pub segments_received: AtomicU64,
    /// Inbound transfer messages discarded for the ticket's stage
    pub state_violations: AtomicU64,
    /// Punishments committed
    pub punishments_committed: AtomicU64,
    /// Punishment requests answered with failure
    pub punishments_rejected: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            messages_encoded: AtomicU64::new(0),
            messages_decoded: AtomicU64::new(0),
            bytes_encoded: AtomicU64::new(0),
            bytes_decoded: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            transfers_started: AtomicU64::new(0),
            transfers_completed: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            transfers_cancelled: AtomicU64::new(0),
            transfers_rejected: AtomicU64::new(0),
            segments_sent: AtomicU64::new(0),
            segments_received: AtomicU64::new(0),
            state_violations: AtomicU64::new(0),
            punishments_committed: AtomicU64::new(0),
            punishments_rejected: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a message encoded
    pub fn message_encoded(&self, byte_count: u64) {
        self.messages_encoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_encoded.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a message decoded
    pub fn message_decoded(&self, byte_count: u64) {
        self.messages_decoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_decoded.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_started(&self) {
        self.transfers_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_completed(&self) {
        self.transfers_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_cancelled(&self) {
        self.transfers_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_rejected(&self) {
        self.transfers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn segment_sent(&self) {
        self.segments_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn segment_received(&self) {
        self.segments_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn state_violation(&self) {
        self.state_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn punishment_committed(&self) {
        self.punishments_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn punishment_rejected(&self) {
        self.punishments_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_encoded: self.messages_encoded.load(Ordering::Relaxed),
            messages_decoded: self.messages_decoded.load(Ordering::Relaxed),
            bytes_encoded: self.bytes_encoded.load(Ordering::Relaxed),
            bytes_decoded: self.bytes_decoded.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            transfers_started: self.transfers_started.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            transfers_cancelled: self.transfers_cancelled.load(Ordering::Relaxed),
            transfers_rejected: self.transfers_rejected.load(Ordering::Relaxed),
            segments_sent: self.segments_sent.load(Ordering::Relaxed),
            segments_received: self.segments_received.load(Ordering::Relaxed),
            state_violations: self.state_violations.load(Ordering::Relaxed),
            punishments_committed: self.punishments_committed.load(Ordering::Relaxed),
            punishments_rejected: self.punishments_rejected.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            messages_encoded = snapshot.messages_encoded,
            messages_decoded = snapshot.messages_decoded,
            bytes_encoded = snapshot.bytes_encoded,
            bytes_decoded = snapshot.bytes_decoded,
            malformed_frames = snapshot.malformed_frames,
            transfers_started = snapshot.transfers_started,
            transfers_completed = snapshot.transfers_completed,
            transfers_failed = snapshot.transfers_failed,
            transfers_cancelled = snapshot.transfers_cancelled,
            transfers_rejected = snapshot.transfers_rejected,
            segments_sent = snapshot.segments_sent,
            segments_received = snapshot.segments_received,
            state_violations = snapshot.state_violations,
            punishments_committed = snapshot.punishments_committed,
            punishments_rejected = snapshot.punishments_rejected,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub messages_encoded: u64,
    pub messages_decoded: u64,
    pub bytes_encoded: u64,
    pub bytes_decoded: u64,
    pub malformed_frames: u64,
    pub transfers_started: u64,
    pub transfers_completed: u64,
    pub transfers_failed: u64,
    pub transfers_cancelled: u64,
    pub transfers_rejected: u64,
    pub segments_sent: u64,
    pub segments_received: u64,
    pub state_violations: u64,
    pub punishments_committed: u64,
    pub punishments_rejected: u64,
    pub uptime_seconds: u64,
}
