//! Transmit Queue Core
//!
//! Flow control between many producers and one asynchronous transport:
//! - At most `max_pending_transmits` intents are outstanding at the transport
//! - Only one context submits to the transport at any moment (`sending`)
//! - Excess intents wait in a FIFO bounded by `drop_transmits_level`
//! - A deep queue switches the submitting context into transmit-only mode
//!   until the depth falls back to `queue_transmit_unblock_threshold`
//! - Producers on other threads interrupt the I/O driving thread so queued
//!   work is not left waiting for an unrelated wakeup
//!
//! # Locking
//!
//! One `parking_lot::Mutex` guards `outstanding`, `pending`,
//! `exclusive_holder` and `sending`. It is held only for bookkeeping and is
//! never held while calling the transport, the address manager, or any
//! completion hook.
//!
//! # Refill
//!
//! Every intent handed to the transport carries a hook that releases its
//! capacity slot and then refills the transport from the queue in a loop.
//! A hook that fires while another context is submitting finds `sending`
//! set and returns at once; that context re-checks the queue before it
//! leaves, so nothing is stranded and the stack never nests more than one
//! level deep.

use crate::address::{AddressManager, Resolution};
use crate::config::TransmitConfig;
use crate::deadline::Deadline;
use crate::error::{Rejected, TransmitError};
use crate::intent::{IntentId, SendStatus, TransmitIntent, TxFailure};
use crate::message::{ActorAddress, Message};
use crate::metrics::{
    failure_label, DrainExit, PendingEntry, PendingMessage, QueueStatus, TransmitMetrics,
};
use crate::transport::Transport;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// Result of an expiry sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Intents still queued after the sweep
    pub live: usize,
    /// Intents removed and failed by this sweep
    pub removed: usize,
}

/// Send-side flow control for one transport endpoint
#[derive(Clone)]
pub struct TransmitQueue {
    shared: Arc<Shared>,
}

struct Shared {
    config: TransmitConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<QueueState>,
    rx_pause_enabled: AtomicBool,
    interrupt_pending: AtomicBool,
    driver: Mutex<ThreadId>,
    metrics: TransmitMetrics,
}

#[derive(Default)]
struct QueueState {
    outstanding: usize,
    pending: VecDeque<TransmitIntent>,
    exclusive_holder: bool,
    sending: bool,
}

/// What to do with the intent taken from the head of the queue
enum Dispatch {
    Physical(TransmitIntent),
    DeadLetter(TransmitIntent),
    Expired(TransmitIntent),
}

enum Rewrite {
    Reroute {
        target: ActorAddress,
        message: Message,
        serialized: Bytes,
    },
    DeadLetter,
}

/// Clears `sending` when the submitting context is done, including on unwind
struct SendingGuard<'a> {
    shared: &'a Shared,
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.state.lock().sending = false;
    }
}

impl TransmitQueue {
    /// Create a queue in front of `transport`.
    ///
    /// The calling thread becomes the designated I/O driving thread.
    pub fn new(config: TransmitConfig, transport: Arc<dyn Transport>) -> Result<Self, TransmitError> {
        config.validate()?;
        debug!(
            "Transmit queue for {} (pending {}, queued {}, unblock {}, drop {})",
            transport.name(),
            config.max_pending_transmits,
            config.max_queued_transmits,
            config.queue_transmit_unblock_threshold,
            config.drop_transmits_level
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport,
                state: Mutex::new(QueueState::default()),
                rx_pause_enabled: AtomicBool::new(true),
                interrupt_pending: AtomicBool::new(false),
                driver: Mutex::new(thread::current().id()),
                metrics: TransmitMetrics::default(),
            }),
        })
    }

    /// Create a queue using the process-wide configuration
    pub fn with_global_config(transport: Arc<dyn Transport>) -> Result<Self, TransmitError> {
        Self::new(TransmitConfig::global().clone(), transport)
    }

    /// Request a transmit.
    ///
    /// With an address manager the target is resolved and the message
    /// rewritten first; without one the target is used as given. An intent
    /// that cannot be resolved or serialized yet is handed back in
    /// [`Rejected`] for the caller to retry. Every other outcome is reported
    /// through the intent's completion.
    pub fn submit(
        &self,
        address_manager: Option<&dyn AddressManager>,
        intent: TransmitIntent,
    ) -> Result<(), Rejected> {
        self.shared.schedule(address_manager, intent, false)
    }

    /// Drive queued work toward the transport.
    ///
    /// Returns `false` without waiting when nothing could be submitted: the
    /// queue is empty, capacity is exhausted, or another context holds
    /// submission rights.
    pub fn drive(&self) -> bool {
        self.shared.run_queued(false)
    }

    /// Fail every queued intent whose deadline has elapsed
    pub fn sweep_expired(&self) -> SweepOutcome {
        self.shared.sweep_expired()
    }

    /// Reroute queued intents addressed to `dead`.
    ///
    /// Each affected intent is re-resolved and rewritten in place; its queue
    /// position is unchanged. Returns the number of intents rewritten.
    pub fn notify_dead_target(
        &self,
        address_manager: &dyn AddressManager,
        dead: &ActorAddress,
    ) -> usize {
        self.shared.notify_dead_target(address_manager, dead)
    }

    /// Allow or forbid transmit-only drain mode under overload
    pub fn enable_drain_on_overload(&self, enable: bool) {
        self.shared.rx_pause_enabled.store(enable, Ordering::Release);
    }

    /// Take exclusive submission rights without waiting
    pub fn try_exclusive(&self) -> Option<ExclusiveGuard<'_>> {
        let mut state = self.shared.state.lock();
        if state.exclusive_holder {
            return None;
        }
        state.exclusive_holder = true;
        Some(ExclusiveGuard { queue: self })
    }

    /// Queued intents in submission order
    pub fn pending_messages(&self) -> Vec<PendingMessage> {
        self.shared
            .state
            .lock()
            .pending
            .iter()
            .map(|intent| PendingMessage {
                id: intent.id(),
                target: intent.target().clone(),
                message: intent.message().clone(),
            })
            .collect()
    }

    pub fn status(&self) -> QueueStatus {
        let shared = &self.shared;
        let transport = shared.transport.name().to_string();
        let state = shared.state.lock();
        QueueStatus {
            transport,
            outstanding: state.outstanding,
            queued: state.pending.len(),
            max_pending_transmits: shared.config.max_pending_transmits,
            drop_transmits_level: shared.config.drop_transmits_level,
            sending: state.sending,
            exclusive_held: state.exclusive_holder,
            drain_enabled: shared.rx_pause_enabled.load(Ordering::Acquire),
            interrupt_pending: shared.interrupt_pending.load(Ordering::Acquire),
            pending: state
                .pending
                .iter()
                .map(|intent| PendingEntry {
                    id: intent.id().get(),
                    target: intent.target().clone(),
                    kind: intent.message().kind().to_string(),
                    expires_in_ms: intent
                        .deadline()
                        .remaining()
                        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                    dead_letter: intent.is_dead_letter(),
                })
                .collect(),
            metrics: shared.metrics.snapshot(),
        }
    }

    pub fn metrics(&self) -> &TransmitMetrics {
        &self.shared.metrics
    }

    pub fn config(&self) -> &TransmitConfig {
        &self.shared.config
    }

    /// Intents currently at the transport
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    /// Intents waiting in the queue
    pub fn queued_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_drain_enabled(&self) -> bool {
        self.shared.rx_pause_enabled.load(Ordering::Acquire)
    }

    pub fn is_interrupt_pending(&self) -> bool {
        self.shared.interrupt_pending.load(Ordering::Acquire)
    }

    /// Designate `thread` as the I/O driving thread
    pub fn set_driver_thread(&self, thread: ThreadId) {
        *self.shared.driver.lock() = thread;
    }

    /// Designate the calling thread as the I/O driving thread
    pub fn claim_driver(&self) {
        self.set_driver_thread(thread::current().id());
    }

    pub fn is_driver_thread(&self) -> bool {
        self.shared.is_driver_thread()
    }
}

impl fmt::Debug for TransmitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = self.shared.transport.name();
        let state = self.shared.state.lock();
        f.debug_struct("TransmitQueue")
            .field("transport", &transport)
            .field("outstanding", &state.outstanding)
            .field("queued", &state.pending.len())
            .field("sending", &state.sending)
            .field("exclusive_holder", &state.exclusive_holder)
            .finish()
    }
}

/// Exclusive submission rights on a [`TransmitQueue`].
///
/// While held, only this guard can move queued work to the transport;
/// completions arriving elsewhere leave the queue alone. Releasing the guard
/// refills the transport from the queue.
pub struct ExclusiveGuard<'a> {
    queue: &'a TransmitQueue,
}

impl ExclusiveGuard<'_> {
    /// Submit as the holder of exclusive rights
    pub fn submit(
        &self,
        address_manager: Option<&dyn AddressManager>,
        intent: TransmitIntent,
    ) -> Result<(), Rejected> {
        self.queue.shared.schedule(address_manager, intent, true)
    }

    /// Drive queued work as the holder of exclusive rights
    pub fn drive(&self) -> bool {
        self.queue.shared.run_queued(true)
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.queue.shared.state.lock().exclusive_holder = false;
        self.queue.shared.refill();
    }
}

impl Shared {
    fn schedule(
        self: &Arc<Self>,
        address_manager: Option<&dyn AddressManager>,
        mut intent: TransmitIntent,
        exclusive: bool,
    ) -> Result<(), Rejected> {
        if let Some(address_manager) = address_manager {
            match address_manager.prepare_send(intent.target(), intent.message()) {
                Ok(Resolution::DeadTarget) => {
                    warn!("Faking dead target transmit result Sent for {}", intent);
                    self.metrics.record_dead_target();
                    intent.complete(SendStatus::Sent);
                    return Ok(());
                }
                Ok(Resolution::Deliver { target, message }) => intent.retarget(target, message),
                Err(error) => return Err(Rejected::new(intent, error)),
            }
        }

        let serialized = match intent.message().serialize() {
            Ok(serialized) => serialized,
            Err(error) => return Err(Rejected::new(intent, error)),
        };
        intent.set_serialized(serialized);

        self.schedule_prepared(intent, exclusive);
        Ok(())
    }

    fn schedule_prepared(self: &Arc<Self>, intent: TransmitIntent, exclusive: bool) {
        let drain_deadline = intent.deadline();

        if intent.message().is_update_work() {
            // Never transmitted; the driving thread is awake to see it
            intent.complete(SendStatus::Sent);
            self.interrupt_pending.store(false, Ordering::Release);
        } else if intent.serialized().map_or(true, Bytes::is_empty) {
            self.metrics.record_empty_payload();
            intent.complete(SendStatus::Sent);
            return;
        } else if !self.enqueue(intent) {
            return;
        }

        if !self.can_send_now() {
            if self.try_begin_drain(exclusive) {
                let _sending = SendingGuard { shared: self };
                self.drain_if_needed(drain_deadline);
            } else if !self.config.producer_backoff.is_zero() {
                // Slow down producers that cannot help draining
                thread::sleep(self.config.producer_backoff);
            }
        }

        while self.can_send_now() {
            if !self.run_queued(exclusive) {
                self.interrupt_driver_if_needed();
                break;
            }
        }
    }

    /// Append to the queue unless it is at the drop level
    fn enqueue(&self, intent: TransmitIntent) -> bool {
        let rejected = {
            let mut state = self.state.lock();
            if state.pending.len() < self.config.drop_transmits_level {
                state.pending.push_back(intent);
                self.metrics.record_enqueued(state.pending.len());
                None
            } else {
                Some(intent)
            }
        };

        match rejected {
            None => true,
            Some(intent) => {
                warn!("Dropping TX: overloaded ({})", intent);
                self.metrics.record_overload_drop();
                intent.complete(SendStatus::Failed(TxFailure::Overloaded));
                false
            }
        }
    }

    fn can_send_now(&self) -> bool {
        self.state.lock().outstanding < self.config.max_pending_transmits
    }

    fn is_driver_thread(&self) -> bool {
        *self.driver.lock() == thread::current().id()
    }

    fn interrupt_driver_if_needed(&self) {
        if self.is_driver_thread() {
            return;
        }
        if !self.interrupt_pending.swap(true, Ordering::AcqRel) {
            debug!("Interrupting driver wait on {}", self.transport.name());
            self.metrics.record_interrupt();
            self.transport.interrupt_blocking_wait();
        }
    }

    /// Claim `sending` for a drain attempt
    fn try_begin_drain(&self, exclusive: bool) -> bool {
        let mut state = self.state.lock();
        if (!exclusive && state.exclusive_holder) || state.sending {
            return false;
        }
        state.sending = true;
        true
    }

    fn run_queued(self: &Arc<Self>, exclusive: bool) -> bool {
        self.sweep_until_stable();

        let next = {
            let mut state = self.state.lock();
            if (!exclusive && state.exclusive_holder) || state.sending {
                return false;
            }
            match self.take_next(&mut state) {
                Some(next) => {
                    state.sending = true;
                    next
                }
                None => return false,
            }
        };

        let _sending = SendingGuard { shared: self };
        self.dispatch(next);
        true
    }

    /// Pop the head of the queue if capacity allows; caller holds the lock
    fn take_next(&self, state: &mut QueueState) -> Option<Dispatch> {
        if state.outstanding >= self.config.max_pending_transmits {
            return None;
        }
        let intent = state.pending.pop_front()?;
        if intent.expired() {
            return Some(Dispatch::Expired(intent));
        }
        if intent.is_dead_letter() {
            return Some(Dispatch::DeadLetter(intent));
        }
        state.outstanding += 1;
        Some(Dispatch::Physical(intent))
    }

    fn dispatch(self: &Arc<Self>, next: Dispatch) {
        match next {
            Dispatch::Expired(intent) => {
                warn!("TX intent {} timed out", intent);
                self.metrics.record_timeouts(1);
                intent.complete(SendStatus::Failed(TxFailure::TimedOut));
            }
            Dispatch::DeadLetter(intent) => {
                warn!("Faking dead target transmit result Sent for {}", intent);
                self.metrics.record_dead_target();
                intent.complete(SendStatus::Sent);
            }
            Dispatch::Physical(mut intent) => {
                let shared: Weak<Shared> = Arc::downgrade(self);
                intent.add_hook(Box::new(move |status: &SendStatus| {
                    if let Some(shared) = shared.upgrade() {
                        shared.transmit_done(status);
                    }
                }));
                self.metrics.record_dispatched();
                debug!("actualTransmit of {} via {}", intent, self.transport.name());
                self.transport.submit_physical(intent);
            }
        }
    }

    /// Completion hook for intents handed to the transport
    fn transmit_done(self: &Arc<Self>, status: &SendStatus) {
        {
            let mut state = self.state.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
        }
        self.metrics.record_completion(status);
        if let Some(failure) = status.failure() {
            debug!("Transport reported {} failure: {}", failure_label(failure), failure);
        }
        self.refill();
    }

    /// Move queued work to the transport while capacity remains
    fn refill(self: &Arc<Self>) {
        while self.can_send_now() {
            if !self.run_queued(false) {
                break;
            }
        }
    }

    /// Feed the transport on behalf of a context that already holds `sending`
    fn feed_transport(self: &Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                self.take_next(&mut state)
            };
            match next {
                Some(next) => self.dispatch(next),
                None => break,
            }
        }
    }

    fn sweep_expired(&self) -> SweepOutcome {
        let (expired, live) = {
            let mut state = self.state.lock();
            if !state.pending.iter().any(TransmitIntent::expired) {
                return SweepOutcome {
                    live: state.pending.len(),
                    removed: 0,
                };
            }
            let (expired, valid): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(TransmitIntent::expired);
            state.pending = valid;
            (expired, state.pending.len())
        };

        let removed = expired.len();
        self.metrics.record_timeouts(removed);
        for intent in expired {
            warn!("TX intent {} timed out", intent);
            intent.complete(SendStatus::Failed(TxFailure::TimedOut));
        }
        SweepOutcome { live, removed }
    }

    /// Sweep until a pass removes nothing; returns the live depth
    fn sweep_until_stable(&self) -> usize {
        loop {
            let outcome = self.sweep_expired();
            if outcome.removed == 0 {
                return outcome.live;
            }
        }
    }

    /// Transmit-only mode; caller holds `sending`
    fn drain_if_needed(self: &Arc<Self>, intent_deadline: Deadline) {
        let mut live = self.sweep_until_stable();
        if live < self.config.max_queued_transmits || !self.rx_pause_enabled.load(Ordering::Acquire)
        {
            return;
        }

        // Bounded even when the intent waits forever
        let finish = intent_deadline.capped(self.config.max_drain_duration);
        warn!(
            "Entering tx-only mode to drain excessive queue ({} >= {}, drain-to {} in {})",
            live,
            self.config.max_queued_transmits,
            self.config.queue_transmit_unblock_threshold,
            finish
        );
        self.metrics.record_drain_entry();

        let mut exit = DrainExit::Drained;
        while live > self.config.queue_transmit_unblock_threshold {
            if finish.expired() {
                exit = DrainExit::DeadlineExpired;
                break;
            }
            self.feed_transport();
            if self.transport.run_transmit_only(finish.remaining()) == 0 {
                info!("Exiting tx-only mode because no transport work available");
                exit = DrainExit::NoProgress;
                break;
            }
            live = self.sweep_until_stable();
        }

        warn!(
            "Exited tx-only mode after draining excessive queue ({}, {:?})",
            self.state.lock().pending.len(),
            exit
        );
        self.metrics.record_drain_exit(exit);
    }

    fn notify_dead_target(&self, address_manager: &dyn AddressManager, dead: &ActorAddress) -> usize {
        let affected: Vec<(IntentId, Message)> = self
            .state
            .lock()
            .pending
            .iter()
            .filter(|intent| intent.target() == dead)
            .map(|intent| (intent.id(), intent.message().clone()))
            .collect();
        if affected.is_empty() {
            return 0;
        }

        let mut rewrites = HashMap::with_capacity(affected.len());
        for (id, message) in affected {
            match address_manager.prepare_send(dead, &message) {
                Ok(Resolution::DeadTarget) => {
                    rewrites.insert(id, Rewrite::DeadLetter);
                }
                Ok(Resolution::Deliver { target, message }) => match message.serialize() {
                    Ok(serialized) => {
                        rewrites.insert(
                            id,
                            Rewrite::Reroute {
                                target,
                                message,
                                serialized,
                            },
                        );
                    }
                    Err(e) => warn!("Cannot reroute {} away from dead {}: {}", id, dead, e),
                },
                Err(e) => warn!("Cannot reroute {} away from dead {}: {}", id, dead, e),
            }
        }

        let mut applied = 0;
        {
            let mut state = self.state.lock();
            for intent in state.pending.iter_mut() {
                // Only snapshot intents still queued are rewritten
                let Some(rewrite) = rewrites.remove(&intent.id()) else {
                    continue;
                };
                match rewrite {
                    Rewrite::DeadLetter => intent.mark_dead_letter(),
                    Rewrite::Reroute {
                        target,
                        message,
                        serialized,
                    } => {
                        let nothing_to_send = serialized.is_empty();
                        intent.retarget(target, message);
                        intent.set_serialized(serialized);
                        if nothing_to_send {
                            intent.mark_dead_letter();
                        }
                    }
                }
                applied += 1;
            }
        }

        self.metrics.record_rewrites(applied);
        info!("Rerouted {} queued transmits away from dead {}", applied, dead);
        applied
    }
}
