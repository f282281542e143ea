//! Transmit intents and their single-shot completion
//!
//! A [`TransmitIntent`] is consumed by [`TransmitIntent::complete`], so the
//! type system rules out a second completion. An intent dropped without
//! being completed reports [`TxFailure::Abandoned`] from its `Drop`.

use crate::deadline::Deadline;
use crate::message::{ActorAddress, Message};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;

static NEXT_INTENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a transmit intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntentId(u64);

impl IntentId {
    fn next() -> Self {
        Self(NEXT_INTENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Why a transmit ended in failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxFailure {
    #[error("transmit queue overloaded")]
    Overloaded,
    #[error("deadline elapsed before submission")]
    TimedOut,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("intent dropped without completion")]
    Abandoned,
}

/// Terminal outcome of a transmit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    Failed(TxFailure),
}

impl SendStatus {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendStatus::Sent)
    }

    pub fn is_failed(&self) -> bool {
        !self.is_sent()
    }

    pub fn failure(&self) -> Option<&TxFailure> {
        match self {
            SendStatus::Sent => None,
            SendStatus::Failed(reason) => Some(reason),
        }
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendStatus::Sent => write!(f, "Sent"),
            SendStatus::Failed(reason) => write!(f, "Failed ({})", reason),
        }
    }
}

/// Callback run once with the terminal status
pub type CompletionHook = Box<dyn FnOnce(&SendStatus) + Send>;

/// A single requested outbound transmission
pub struct TransmitIntent {
    id: IntentId,
    target: ActorAddress,
    message: Message,
    serialized: Option<Bytes>,
    deadline: Deadline,
    dead_letter: bool,
    notify: Option<oneshot::Sender<SendStatus>>,
    hooks: Vec<CompletionHook>,
    completed: bool,
}

impl TransmitIntent {
    /// Create an intent whose outcome is observed through hooks only
    pub fn new(target: impl Into<ActorAddress>, message: impl Into<Message>) -> Self {
        Self {
            id: IntentId::next(),
            target: target.into(),
            message: message.into(),
            serialized: None,
            deadline: Deadline::never(),
            dead_letter: false,
            notify: None,
            hooks: Vec::new(),
            completed: false,
        }
    }

    /// Create an intent together with a receipt for its outcome
    pub fn with_receipt(
        target: impl Into<ActorAddress>,
        message: impl Into<Message>,
    ) -> (Self, TransmitReceipt) {
        let mut intent = Self::new(target, message);
        let (tx, rx) = oneshot::channel();
        intent.notify = Some(tx);
        let receipt = TransmitReceipt {
            id: intent.id,
            rx,
            status: None,
        };
        (intent, receipt)
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Deadline::after(timeout))
    }

    /// Register a callback for the terminal status
    pub fn on_complete(mut self, hook: impl FnOnce(&SendStatus) + Send + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn id(&self) -> IntentId {
        self.id
    }

    pub fn target(&self) -> &ActorAddress {
        &self.target
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Wire form, present once the intent has been prepared for sending
    pub fn serialized(&self) -> Option<&Bytes> {
        self.serialized.as_ref()
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn expired(&self) -> bool {
        self.deadline.expired()
    }

    pub fn is_dead_letter(&self) -> bool {
        self.dead_letter
    }

    /// Finish the intent, notifying the receipt then every hook
    pub fn complete(mut self, status: SendStatus) {
        self.fire(status);
    }

    pub(crate) fn retarget(&mut self, target: ActorAddress, message: Message) {
        self.target = target;
        self.message = message;
    }

    pub(crate) fn set_serialized(&mut self, serialized: Bytes) {
        self.serialized = Some(serialized);
    }

    pub(crate) fn mark_dead_letter(&mut self) {
        self.dead_letter = true;
    }

    pub(crate) fn add_hook(&mut self, hook: CompletionHook) {
        self.hooks.push(hook);
    }

    fn fire(&mut self, status: SendStatus) {
        if self.completed {
            return;
        }
        self.completed = true;

        if let Some(tx) = self.notify.take() {
            // Receiver may be gone; the caller stopped caring
            let _ = tx.send(status.clone());
        }
        for hook in self.hooks.drain(..) {
            hook(&status);
        }
    }
}

impl Drop for TransmitIntent {
    fn drop(&mut self) {
        if !self.completed {
            warn!("Transmit {} dropped without completion", self);
            self.fire(SendStatus::Failed(TxFailure::Abandoned));
        }
    }
}

impl fmt::Debug for TransmitIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmitIntent")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("kind", &self.message.kind())
            .field("serialized_len", &self.serialized.as_ref().map(Bytes::len))
            .field("deadline", &self.deadline)
            .field("dead_letter", &self.dead_letter)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl fmt::Display for TransmitIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} ({})",
            self.id,
            self.message.kind(),
            self.target,
            self.deadline
        )
    }
}

/// Caller-side view of an intent's outcome
#[derive(Debug)]
pub struct TransmitReceipt {
    id: IntentId,
    rx: oneshot::Receiver<SendStatus>,
    status: Option<SendStatus>,
}

impl TransmitReceipt {
    pub fn id(&self) -> IntentId {
        self.id
    }

    /// Poll without blocking; `None` while the transmit is still pending
    pub fn try_status(&mut self) -> Option<SendStatus> {
        if self.status.is_none() {
            match self.rx.try_recv() {
                Ok(status) => self.status = Some(status),
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.status = Some(SendStatus::Failed(TxFailure::Abandoned))
                }
            }
        }
        self.status.clone()
    }

    pub fn is_complete(&mut self) -> bool {
        self.try_status().is_some()
    }

    /// Wait for the outcome
    pub async fn wait(self) -> SendStatus {
        if let Some(status) = self.status {
            return status;
        }
        self.rx
            .await
            .unwrap_or(SendStatus::Failed(TxFailure::Abandoned))
    }

    /// Block the current thread until the outcome is known.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_wait(self) -> SendStatus {
        if let Some(status) = self.status {
            return status;
        }
        self.rx
            .blocking_recv()
            .unwrap_or(SendStatus::Failed(TxFailure::Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_unique() {
        let a = TransmitIntent::new("a", b"1".to_vec());
        let b = TransmitIntent::new("a", b"1".to_vec());
        assert_ne!(a.id(), b.id());
        a.complete(SendStatus::Sent);
        b.complete(SendStatus::Sent);
    }

    #[test]
    fn test_receipt_sees_completion() {
        let (intent, mut receipt) = TransmitIntent::with_receipt("actor", b"x".to_vec());
        assert_eq!(receipt.id(), intent.id());
        assert_eq!(receipt.try_status(), None);

        intent.complete(SendStatus::Sent);
        assert_eq!(receipt.try_status(), Some(SendStatus::Sent));
        // Cached after first observation
        assert_eq!(receipt.try_status(), Some(SendStatus::Sent));
    }

    #[test]
    fn test_hooks_run_once_in_order() {
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let first = Arc::clone(&calls);
        let second = Arc::clone(&calls);

        let intent = TransmitIntent::new("actor", b"x".to_vec())
            .on_complete(move |status| first.lock().push(("first", status.clone())))
            .on_complete(move |status| second.lock().push(("second", status.clone())));

        intent.complete(SendStatus::Failed(TxFailure::TimedOut));

        let calls = calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ("first", SendStatus::Failed(TxFailure::TimedOut)));
        assert_eq!(calls[1].0, "second");
    }

    #[test]
    fn test_drop_reports_abandoned() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let (intent, mut receipt) = TransmitIntent::with_receipt("actor", b"x".to_vec());
        let intent = intent.on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(intent);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(
            receipt.try_status(),
            Some(SendStatus::Failed(TxFailure::Abandoned))
        );
    }

    #[test]
    fn test_completed_intent_does_not_fire_on_drop() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let intent = TransmitIntent::new("actor", b"x".to_vec()).on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        intent.complete(SendStatus::Sent);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout_builder_sets_deadline() {
        let intent = TransmitIntent::new("actor", b"x".to_vec()).with_timeout(Duration::ZERO);
        assert!(intent.expired());
        assert!(!intent.deadline().is_forever());
        intent.complete(SendStatus::Failed(TxFailure::TimedOut));
    }

    #[tokio::test]
    async fn test_receipt_can_be_awaited() {
        let (intent, receipt) = TransmitIntent::with_receipt("actor", b"x".to_vec());
        let handle = tokio::spawn(async move { receipt.wait().await });
        intent.complete(SendStatus::Failed(TxFailure::Transport("reset".into())));

        let status = handle.await.unwrap();
        assert_eq!(
            status.failure(),
            Some(&TxFailure::Transport("reset".to_string()))
        );
        assert!(status.is_failed());
    }
}
