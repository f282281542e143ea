//! Address resolution collaborator
//!
//! The queue consults an [`AddressManager`] immediately before admission and
//! again when a destination is confirmed dead. Implementations live with the
//! actor runtime; only the interface is defined here.

use crate::error::TransmitError;
use crate::message::{ActorAddress, Message};

/// Outcome of preparing a message for a target
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Send `message` to `target`; both may have been rewritten
    Deliver {
        target: ActorAddress,
        message: Message,
    },
    /// The target is permanently gone for this message class; report
    /// `Sent` without transmitting so notifications do not bounce forever
    DeadTarget,
}

/// Resolves logical actor addresses into transport-usable ones
pub trait AddressManager: Send + Sync {
    /// Resolve `target` and rewrite `message` for transmission.
    ///
    /// Returns [`TransmitError::Unresolved`] for an address that is not
    /// transmissible yet; the caller retries once it becomes resolvable.
    fn prepare_send(
        &self,
        target: &ActorAddress,
        message: &Message,
    ) -> Result<Resolution, TransmitError>;
}
