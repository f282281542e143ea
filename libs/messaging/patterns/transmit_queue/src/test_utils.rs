//! Transports and address managers for exercising a [`TransmitQueue`](crate::TransmitQueue)

use crate::address::{AddressManager, Resolution};
use crate::error::TransmitError;
use crate::intent::{IntentId, SendStatus, TransmitIntent, TxFailure};
use crate::message::{ActorAddress, Message, Payload};
use crate::transport::Transport;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A transport that holds every intent until the test completes it
#[derive(Debug)]
pub struct HoldingTransport {
    held: Mutex<VecDeque<TransmitIntent>>,
    log: Mutex<Vec<(IntentId, ActorAddress)>>,
    /// Complete everything held when asked to run transmit-only
    draining: AtomicBool,
    submitted: AtomicUsize,
    max_in_flight: AtomicUsize,
    interrupts: AtomicUsize,
    transmit_only_calls: AtomicUsize,
    name: String,
}

impl HoldingTransport {
    pub fn new() -> Self {
        Self::with_name("holding-transport")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            held: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
            draining: AtomicBool::new(false),
            submitted: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            transmit_only_calls: AtomicUsize::new(0),
            name: name.into(),
        }
    }

    /// A transport whose transmit-only pass completes all held intents
    pub fn draining() -> Self {
        let transport = Self::new();
        transport.set_draining(true);
        transport
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::Relaxed);
    }

    /// Complete the oldest held intent
    pub fn complete_next(&self, status: SendStatus) -> bool {
        // Pop first: completion re-enters submit_physical
        let next = self.held.lock().pop_front();
        match next {
            Some(intent) => {
                intent.complete(status);
                true
            }
            None => false,
        }
    }

    /// Complete every intent held right now
    pub fn complete_all(&self, status: SendStatus) -> usize {
        let batch: Vec<_> = self.held.lock().drain(..).collect();
        let count = batch.len();
        for intent in batch {
            intent.complete(status.clone());
        }
        count
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    pub fn held_targets(&self) -> Vec<ActorAddress> {
        self.held
            .lock()
            .iter()
            .map(|intent| intent.target().clone())
            .collect()
    }

    /// Ids in the order they reached the transport
    pub fn submitted_ids(&self) -> Vec<IntentId> {
        self.log.lock().iter().map(|(id, _)| *id).collect()
    }

    /// Targets in the order they reached the transport
    pub fn submitted_targets(&self) -> Vec<ActorAddress> {
        self.log
            .lock()
            .iter()
            .map(|(_, target)| target.clone())
            .collect()
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Most intents ever held at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn transmit_only_calls(&self) -> usize {
        self.transmit_only_calls.load(Ordering::SeqCst)
    }
}

impl Default for HoldingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HoldingTransport {
    fn submit_physical(&self, intent: TransmitIntent) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .push((intent.id(), intent.target().clone()));
        let mut held = self.held.lock();
        held.push_back(intent);
        self.max_in_flight.fetch_max(held.len(), Ordering::SeqCst);
    }

    fn run_transmit_only(&self, _max_wait: Option<Duration>) -> usize {
        self.transmit_only_calls.fetch_add(1, Ordering::SeqCst);
        if self.draining.load(Ordering::Relaxed) {
            self.complete_all(SendStatus::Sent)
        } else {
            0
        }
    }

    fn interrupt_blocking_wait(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A transport that finishes every transmit before returning
#[derive(Debug, Default)]
pub struct ImmediateTransport {
    fail_sends: AtomicBool,
    submitted: AtomicUsize,
    interrupts: AtomicUsize,
}

impl ImmediateTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that reports every transmit as a transport failure
    pub fn failing() -> Self {
        let transport = Self::new();
        transport.fail_sends.store(true, Ordering::Relaxed);
        transport
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }
}

impl Transport for ImmediateTransport {
    fn submit_physical(&self, intent: TransmitIntent) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends.load(Ordering::Relaxed) {
            intent.complete(SendStatus::Failed(TxFailure::Transport(
                "simulated failure".to_string(),
            )));
        } else {
            intent.complete(SendStatus::Sent);
        }
    }

    fn run_transmit_only(&self, _max_wait: Option<Duration>) -> usize {
        0
    }

    fn interrupt_blocking_wait(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "immediate-transport"
    }
}

/// Wrapper carrying a message rerouted away from a dead actor
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub original: ActorAddress,
    pub message: Message,
}

impl Payload for DeadLetter {
    fn serialize(&self) -> Result<Bytes, TransmitError> {
        let inner = self.message.serialize()?;
        let mut buf = BytesMut::with_capacity(self.original.as_str().len() + 1 + inner.len());
        buf.put_slice(self.original.as_str().as_bytes());
        buf.put_u8(b'|');
        buf.put_slice(&inner);
        Ok(buf.freeze())
    }

    fn kind(&self) -> &str {
        "dead_letter"
    }
}

/// A payload whose encoding always fails
#[derive(Debug, Clone, Copy)]
pub struct Unserializable;

impl Payload for Unserializable {
    fn serialize(&self) -> Result<Bytes, TransmitError> {
        Err(TransmitError::serialization("payload refuses to encode"))
    }

    fn kind(&self) -> &str {
        "unserializable"
    }
}

/// Address manager backed by fixed tables the test edits
#[derive(Debug, Default)]
pub struct StaticAddressManager {
    dead: Mutex<HashSet<ActorAddress>>,
    unresolved: Mutex<HashSet<ActorAddress>>,
    aliases: Mutex<HashMap<ActorAddress, ActorAddress>>,
    /// Where messages for dead actors go; `None` reports them as dead targets
    dead_letter: Option<ActorAddress>,
    calls: AtomicUsize,
}

impl StaticAddressManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dead_letter(address: impl Into<ActorAddress>) -> Self {
        Self {
            dead_letter: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn mark_dead(&self, address: impl Into<ActorAddress>) {
        self.dead.lock().insert(address.into());
    }

    pub fn mark_unresolved(&self, address: impl Into<ActorAddress>) {
        self.unresolved.lock().insert(address.into());
    }

    pub fn mark_resolved(&self, address: impl Into<ActorAddress>) {
        self.unresolved.lock().remove(&address.into());
    }

    /// Route `from` to `to`
    pub fn alias(&self, from: impl Into<ActorAddress>, to: impl Into<ActorAddress>) {
        self.aliases.lock().insert(from.into(), to.into());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AddressManager for StaticAddressManager {
    fn prepare_send(
        &self,
        target: &ActorAddress,
        message: &Message,
    ) -> Result<Resolution, TransmitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.unresolved.lock().contains(target) {
            return Err(TransmitError::unresolved(target.clone()));
        }

        if self.dead.lock().contains(target) {
            return Ok(match &self.dead_letter {
                Some(dead_letter) => Resolution::Deliver {
                    target: dead_letter.clone(),
                    message: Message::payload(DeadLetter {
                        original: target.clone(),
                        message: message.clone(),
                    }),
                },
                None => Resolution::DeadTarget,
            });
        }

        let target = self
            .aliases
            .lock()
            .get(target)
            .cloned()
            .unwrap_or_else(|| target.clone());
        Ok(Resolution::Deliver {
            target,
            message: message.clone(),
        })
    }
}
