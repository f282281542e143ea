//! Targets and messages carried by transmit intents
//!
//! Messages stay in their application form until the queue serializes them
//! just before admission. The internal [`Message::UpdateWork`] marker is the
//! wake channel for the I/O driving thread and never reaches a transport.

use crate::error::TransmitError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Opaque identity of a destination actor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorAddress(String);

impl ActorAddress {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorAddress {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ActorAddress {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Application payload that knows how to encode itself for the wire
pub trait Payload: Debug + Send + Sync {
    /// Encode for transmission. An empty buffer means there is nothing to send.
    fn serialize(&self) -> Result<Bytes, TransmitError>;

    /// Short type label for diagnostics
    fn kind(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl Payload for Bytes {
    fn serialize(&self) -> Result<Bytes, TransmitError> {
        Ok(self.clone())
    }

    fn kind(&self) -> &str {
        "bytes"
    }
}

impl Payload for Vec<u8> {
    fn serialize(&self) -> Result<Bytes, TransmitError> {
        Ok(Bytes::copy_from_slice(self))
    }

    fn kind(&self) -> &str {
        "bytes"
    }
}

impl Payload for String {
    fn serialize(&self) -> Result<Bytes, TransmitError> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }

    fn kind(&self) -> &str {
        "string"
    }
}

/// Message before serialization
#[derive(Debug, Clone)]
pub enum Message {
    /// Application payload handed over by an actor
    Payload(Arc<dyn Payload>),
    /// Wake-up marker for the I/O driving thread
    UpdateWork,
}

impl Message {
    pub fn payload(payload: impl Payload + 'static) -> Self {
        Message::Payload(Arc::new(payload))
    }

    pub fn is_update_work(&self) -> bool {
        matches!(self, Message::UpdateWork)
    }

    /// Encode for the transport; `UpdateWork` encodes to nothing
    pub fn serialize(&self) -> Result<Bytes, TransmitError> {
        match self {
            Message::Payload(payload) => payload.serialize(),
            Message::UpdateWork => Ok(Bytes::new()),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Message::Payload(payload) => payload.kind(),
            Message::UpdateWork => "update_work",
        }
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Message::payload(bytes)
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Message::payload(bytes)
    }
}
