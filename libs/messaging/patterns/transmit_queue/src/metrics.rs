//! Transmit queue counters and diagnostics snapshots

use crate::intent::{IntentId, SendStatus, TxFailure};
use crate::message::{ActorAddress, Message};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// How a drain episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainExit {
    /// Queue depth fell to the unblock threshold
    Drained,
    /// The drain deadline elapsed first
    DeadlineExpired,
    /// The transport reported no work it could process
    NoProgress,
}

/// Transmit queue counters
#[derive(Debug, Default)]
pub struct TransmitMetrics {
    /// Intents accepted into the queue
    pub enqueued: AtomicU64,
    /// Intents handed to the transport
    pub dispatched: AtomicU64,
    /// Transport completions reporting success
    pub transport_sent: AtomicU64,
    /// Transport completions reporting failure
    pub transport_failed: AtomicU64,
    /// Intents completed as Sent because the target was dead
    pub dead_target_shortcuts: AtomicU64,
    /// Intents completed as Sent because there was nothing to send
    pub empty_payloads: AtomicU64,
    /// Intents rejected at the drop level
    pub overload_drops: AtomicU64,
    /// Queued intents whose deadline elapsed
    pub timeouts: AtomicU64,
    /// Queued intents rewritten after their target died
    pub dead_target_rewrites: AtomicU64,
    /// Interrupts sent to the driving thread
    pub interrupts: AtomicU64,
    pub drain_entries: AtomicU64,
    pub drain_exits_drained: AtomicU64,
    pub drain_exits_deadline: AtomicU64,
    pub drain_exits_no_progress: AtomicU64,
    /// Deepest queue observed
    pub peak_queue_depth: AtomicU64,
}

impl TransmitMetrics {
    pub fn record_enqueued(&self, depth: usize) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.peak_queue_depth
            .fetch_max(depth as u64, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completion reported by the transport
    pub fn record_completion(&self, status: &SendStatus) {
        match status {
            SendStatus::Sent => self.transport_sent.fetch_add(1, Ordering::Relaxed),
            SendStatus::Failed(_) => self.transport_failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_dead_target(&self) {
        self.dead_target_shortcuts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_payload(&self) {
        self.empty_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overload_drop(&self) {
        self.overload_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeouts(&self, count: usize) {
        self.timeouts.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_rewrites(&self, count: usize) {
        self.dead_target_rewrites
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drain_entry(&self) {
        self.drain_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drain_exit(&self, exit: DrainExit) {
        let counter = match exit {
            DrainExit::Drained => &self.drain_exits_drained,
            DrainExit::DeadlineExpired => &self.drain_exits_deadline,
            DrainExit::NoProgress => &self.drain_exits_no_progress,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            transport_sent: self.transport_sent.load(Ordering::Relaxed),
            transport_failed: self.transport_failed.load(Ordering::Relaxed),
            dead_target_shortcuts: self.dead_target_shortcuts.load(Ordering::Relaxed),
            empty_payloads: self.empty_payloads.load(Ordering::Relaxed),
            overload_drops: self.overload_drops.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            dead_target_rewrites: self.dead_target_rewrites.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            drain_entries: self.drain_entries.load(Ordering::Relaxed),
            drain_exits_drained: self.drain_exits_drained.load(Ordering::Relaxed),
            drain_exits_deadline: self.drain_exits_deadline.load(Ordering::Relaxed),
            drain_exits_no_progress: self.drain_exits_no_progress.load(Ordering::Relaxed),
            peak_queue_depth: self.peak_queue_depth.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TransmitMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub dispatched: u64,
    pub transport_sent: u64,
    pub transport_failed: u64,
    pub dead_target_shortcuts: u64,
    pub empty_payloads: u64,
    pub overload_drops: u64,
    pub timeouts: u64,
    pub dead_target_rewrites: u64,
    pub interrupts: u64,
    pub drain_entries: u64,
    pub drain_exits_drained: u64,
    pub drain_exits_deadline: u64,
    pub drain_exits_no_progress: u64,
    pub peak_queue_depth: u64,
}

impl MetricsSnapshot {
    /// Drain episodes that have finished, however they ended
    pub fn drain_exits(&self) -> u64 {
        self.drain_exits_drained + self.drain_exits_deadline + self.drain_exits_no_progress
    }
}

/// A queued transmit as reported by [`TransmitQueue::pending_messages`](crate::TransmitQueue::pending_messages)
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub id: IntentId,
    pub target: ActorAddress,
    pub message: Message,
}

/// Serializable summary of one queued transmit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEntry {
    pub id: u64,
    pub target: ActorAddress,
    pub kind: String,
    pub expires_in_ms: Option<u64>,
    pub dead_letter: bool,
}

/// Diagnostics view of a transmit queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub transport: String,
    pub outstanding: usize,
    pub queued: usize,
    pub max_pending_transmits: usize,
    pub drop_transmits_level: usize,
    pub sending: bool,
    pub exclusive_held: bool,
    pub drain_enabled: bool,
    pub interrupt_pending: bool,
    pub pending: Vec<PendingEntry>,
    pub metrics: MetricsSnapshot,
}

impl QueueStatus {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Failure reason label used in logs
pub(crate) fn failure_label(failure: &TxFailure) -> &'static str {
    match failure {
        TxFailure::Overloaded => "overloaded",
        TxFailure::TimedOut => "timed_out",
        TxFailure::Transport(_) => "transport",
        TxFailure::Abandoned => "abandoned",
    }
}
