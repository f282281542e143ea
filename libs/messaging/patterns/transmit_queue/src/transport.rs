//! Physical transport collaborator

use crate::intent::TransmitIntent;
use std::time::Duration;

/// Performs the actual asynchronous write of prepared intents.
///
/// Implementations must be safe for concurrent invocation; the queue never
/// calls into a transport while holding its own lock.
pub trait Transport: Send + Sync {
    /// Start transmitting `intent`.
    ///
    /// Ownership of the outcome passes to the transport, which reports it
    /// with [`TransmitIntent::complete`], either before returning or later
    /// from another context.
    fn submit_physical(&self, intent: TransmitIntent);

    /// Process only outbound work for at most `max_wait` (`None` = no bound
    /// beyond the transport's own). Returns the number of transmits
    /// processed; `0` means no further progress is currently possible.
    fn run_transmit_only(&self, max_wait: Option<Duration>) -> usize;

    /// Wake the I/O driving thread from a blocking wait
    fn interrupt_blocking_wait(&self);

    /// Name used in logs
    fn name(&self) -> &str {
        "transport"
    }
}
