//! Wire protocol between replica connections.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::clock::{ActorId, Clock};
use crate::document::Changes;

/// Message exchanged between two connections about one document.
///
/// A message without changes is a clock announcement: it tells the peer
/// what the sender has, which doubles as a request for anything missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub doc_id: SmolStr,
    pub sender: ActorId,
    /// Sender's clock for `doc_id`, including `changes` when present.
    pub clock: Clock,
    pub changes: Option<Changes>,
}

impl Message {
    pub fn announce(doc_id: impl Into<SmolStr>, sender: ActorId, clock: Clock) -> Self {
        Self {
            doc_id: doc_id.into(),
            sender,
            clock,
            changes: None,
        }
    }

    pub fn is_announcement(&self) -> bool {
        self.changes.is_none()
    }

    /// Serialize message to postcard bytes for wire transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_stdvec(self)
    }

    /// Deserialize message from postcard bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// Who an outbound message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every connected peer.
    Broadcast,
    Peer(ActorId),
}

/// Outbound message with its routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub recipient: Recipient,
    pub message: Message,
}

impl Envelope {
    pub fn broadcast(message: Message) -> Self {
        Self {
            recipient: Recipient::Broadcast,
            message,
        }
    }

    pub fn to_peer(peer: ActorId, message: Message) -> Self {
        Self {
            recipient: Recipient::Peer(peer),
            message,
        }
    }

    /// True if `actor` should receive this envelope.
    pub fn is_for(&self, actor: ActorId) -> bool {
        match self.recipient {
            Recipient::Broadcast => actor != self.message.sender,
            Recipient::Peer(peer) => peer == actor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_message_with_changes() {
        let mut clock = Clock::new();
        clock.set(ActorId(1), 10);
        clock.set(ActorId(2), 5);
        let msg = Message {
            doc_id: "doc".into(),
            sender: ActorId(1),
            clock: clock.clone(),
            changes: Some(Changes::new(vec![1, 2, 3, 4])),
        };
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert!(!decoded.is_announcement());
    }

    #[test]
    fn test_envelope_routing() {
        let msg = Message::announce("doc", ActorId(1), Clock::new());
        let all = Envelope::broadcast(msg.clone());
        assert!(!all.is_for(ActorId(1)));
        assert!(all.is_for(ActorId(2)));
        let one = Envelope::to_peer(ActorId(3), msg);
        assert!(one.is_for(ActorId(3)));
        assert!(!one.is_for(ActorId(2)));
    }
}
