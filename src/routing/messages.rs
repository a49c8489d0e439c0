//! Envelope carried on the shared outbound stream

use blake2::{Blake2b512, Digest};

use crate::engine::{Routing, WireMessage};
use crate::party::PartyId;

/// Unique message identifier
pub type MessageId = [u8; 32];

/// An engine's outbound message tagged with its sender.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub id: MessageId,
    pub from: PartyId,
    pub payload: Vec<u8>,
    pub routing: Routing,
    pub type_tag: String,
}

impl MessageEnvelope {
    /// Wraps a wire message emitted by `from`.
    pub fn new(from: PartyId, message: WireMessage) -> Self {
        let id = message_id(&from, &message.payload);
        Self {
            id,
            from,
            payload: message.payload,
            routing: message.routing,
            type_tag: message.type_tag,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.routing.is_broadcast()
    }

    /// Short hex form of the id for logs.
    pub fn short_id(&self) -> String {
        hex::encode(&self.id[..6])
    }
}

fn message_id(from: &PartyId, payload: &[u8]) -> MessageId {
    let mut hasher = Blake2b512::new();
    hasher.update(from.id().as_bytes());
    hasher.update([0u8]);
    hasher.update(payload);
    let digest = hasher.finalize();
    let mut id = [0u8; 32];
    id.copy_from_slice(&digest[..32]);
    id
}
