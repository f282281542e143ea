//! # Transmit Queue
//!
//! Send-side flow control for an actor runtime's transport layer. Producers
//! hand [`TransmitIntent`]s to a [`TransmitQueue`], which bounds the number
//! of transmits in flight, queues the excess in FIFO order, drops new work
//! when the queue is hopelessly full, and temporarily switches into a
//! transmit-only mode to drain a deep queue.
//!
//! ```text
//!  producers ──submit──► [ resolve + serialize ]
//!                                 │
//!                                 ▼
//!                     ┌───────────────────────┐   drop level reached
//!                     │  pending (FIFO queue) │ ─────────────────────► Failed(Overloaded)
//!                     └───────────┬───────────┘
//!                                 │ outstanding < max_pending
//!                                 ▼
//!                     ┌───────────────────────┐
//!                     │  Transport            │ ──complete──► refill from queue
//!                     └───────────────────────┘
//! ```
//!
//! Every intent completes exactly once: `Sent`, or `Failed` with a
//! [`TxFailure`] reason. Intents that cannot be prepared yet are handed back
//! inside [`Rejected`] so the caller can retry them.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use transmit_queue::test_utils::ImmediateTransport;
//! use transmit_queue::{SendStatus, TransmitConfig, TransmitIntent, TransmitQueue};
//!
//! let transport = Arc::new(ImmediateTransport::new());
//! let queue = TransmitQueue::new(TransmitConfig::default(), transport).unwrap();
//!
//! let (intent, mut receipt) = TransmitIntent::with_receipt("actor-1", b"ping".to_vec());
//! queue.submit(None, intent).unwrap();
//! assert_eq!(receipt.try_status(), Some(SendStatus::Sent));
//! ```

pub mod address;
pub mod config;
pub mod deadline;
pub mod error;
pub mod intent;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod test_utils;
pub mod transport;

pub use address::{AddressManager, Resolution};
pub use config::{TransmitConfig, TransmitConfigToml};
pub use deadline::Deadline;
pub use error::{Rejected, TransmitError};
pub use intent::{
    CompletionHook, IntentId, SendStatus, TransmitIntent, TransmitReceipt, TxFailure,
};
pub use message::{ActorAddress, Message, Payload};
pub use metrics::{
    DrainExit, MetricsSnapshot, PendingEntry, PendingMessage, QueueStatus, TransmitMetrics,
};
pub use queue::{ExclusiveGuard, SweepOutcome, TransmitQueue};
pub use transport::Transport;
