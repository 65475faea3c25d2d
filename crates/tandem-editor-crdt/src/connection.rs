//! Per-replica connection: owns the replica's documents and keeps peers in
//! sync by exchanging clocks and missing changes.

use std::collections::BTreeMap;

use smol_str::SmolStr;
use tokio::sync::mpsc::UnboundedSender;

use crate::clock::{ActorId, Clock};
use crate::diff::Diff;
use crate::document::CrdtDocument;
use crate::protocol::{Envelope, Message};
use crate::CrdtError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

/// Result of handing a message to [`Connection::receive`].
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub doc_id: SmolStr,
    /// Projection diff from before to after the merge; empty when the
    /// message carried nothing new.
    pub diff: Diff,
    dropped: bool,
}

impl Received {
    fn merged(doc_id: SmolStr, diff: Diff) -> Self {
        Self {
            doc_id,
            diff,
            dropped: false,
        }
    }

    fn drop_closed(doc_id: SmolStr) -> Self {
        Self {
            doc_id,
            diff: Diff::default(),
            dropped: true,
        }
    }

    /// True when the message arrived while the connection was closed and
    /// was discarded.
    pub fn dropped(&self) -> bool {
        self.dropped
    }
}

/// A replica's view of its peers.
///
/// Documents are owned here exclusively; peers only ever see immutable
/// [`Message`]s. Every peer is assumed reachable directly, so nothing is
/// relayed on behalf of others.
pub struct Connection {
    actor: ActorId,
    state: ConnectionState,
    docs: BTreeMap<SmolStr, CrdtDocument>,
    /// Last known clock per document, per peer.
    peers: BTreeMap<SmolStr, BTreeMap<ActorId, Clock>>,
    outbound: UnboundedSender<Envelope>,
}

impl Connection {
    /// A closed connection sending through `outbound`.
    pub fn new(actor: ActorId, outbound: UnboundedSender<Envelope>) -> Self {
        Self {
            actor,
            state: ConnectionState::Closed,
            docs: BTreeMap::new(),
            peers: BTreeMap::new(),
            outbound,
        }
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn doc(&self, doc_id: &str) -> Option<&CrdtDocument> {
        self.docs.get(doc_id)
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &SmolStr> {
        self.docs.keys()
    }

    /// Last clock recorded for `peer` on `doc_id`.
    pub fn peer_clock(&self, doc_id: &str, peer: ActorId) -> Option<&Clock> {
        self.peers.get(doc_id).and_then(|peers| peers.get(&peer))
    }

    /// Open the connection and announce every document's clock.
    pub fn open(&mut self) -> Result<(), CrdtError> {
        if self.is_open() {
            return Ok(());
        }
        self.state = ConnectionState::Open;
        tracing::debug!(actor = %self.actor, docs = self.docs.len(), "connection opened");
        let ids: Vec<SmolStr> = self.docs.keys().cloned().collect();
        for doc_id in ids {
            let message = self.announce_clock(&doc_id)?;
            self.send(Envelope::broadcast(message));
        }
        Ok(())
    }

    /// Close the connection. Local updates are kept but nothing is sent,
    /// and inbound messages are dropped until reopened.
    pub fn close(&mut self) {
        if self.is_open() {
            tracing::debug!(actor = %self.actor, "connection closed");
        }
        self.state = ConnectionState::Closed;
    }

    /// Clock announcement for `doc_id`.
    pub fn announce_clock(&self, doc_id: &str) -> Result<Message, CrdtError> {
        let doc = self.require(doc_id)?;
        Ok(Message::announce(doc_id, self.actor, doc.clock()))
    }

    /// Message carrying exactly the changes a peer at `clock` lacks.
    pub fn changes_since(&self, doc_id: &str, clock: &Clock) -> Result<Option<Message>, CrdtError> {
        let doc = self.require(doc_id)?;
        Ok(doc.changes_since(clock)?.map(|changes| Message {
            doc_id: doc_id.into(),
            sender: self.actor,
            clock: doc.clock(),
            changes: Some(changes),
        }))
    }

    /// Store a local update and, when open, send each known peer what it
    /// is missing.
    pub fn set_doc(&mut self, doc_id: &str, doc: CrdtDocument) -> Result<(), CrdtError> {
        let ours = doc.clock();
        self.docs.insert(doc_id.into(), doc);
        if !self.is_open() {
            return Ok(());
        }
        let known: Vec<(ActorId, Clock)> = self
            .peers
            .get(doc_id)
            .map(|peers| peers.iter().map(|(a, c)| (*a, c.clone())).collect())
            .unwrap_or_default();
        for (peer, clock) in known {
            if let Some(message) = self.changes_since(doc_id, &clock)? {
                self.send(Envelope::to_peer(peer, message));
                // assume delivery; a later announcement corrects this
                self.record_peer(doc_id, peer, clock.union(&ours));
            }
        }
        Ok(())
    }

    /// Store a document without notifying peers.
    pub fn replace_doc(&mut self, doc_id: &str, doc: CrdtDocument) {
        self.docs.insert(doc_id.into(), doc);
    }

    /// Merge an inbound message and reply to its sender.
    ///
    /// Unknown document ids get an empty document first. The reply is the
    /// changes the sender lacks, else our clock if the sender has changes
    /// we lack, else our clock once for a peer never heard from before.
    pub fn receive(&mut self, message: &Message) -> Result<Received, CrdtError> {
        let doc_id = message.doc_id.clone();
        if !self.is_open() {
            tracing::debug!(actor = %self.actor, %doc_id, sender = %message.sender, "dropping message on closed connection");
            return Ok(Received::drop_closed(doc_id));
        }
        if !self.docs.contains_key(&doc_id) {
            tracing::debug!(actor = %self.actor, %doc_id, "creating document for unknown id");
            self.docs.insert(doc_id.clone(), CrdtDocument::empty(self.actor)?);
        }

        let diff = match &message.changes {
            Some(changes) => {
                let current = self.require(&doc_id)?;
                let next = current.apply_changes(changes)?;
                let diff = current.diff(&next)?;
                self.docs.insert(doc_id.clone(), next);
                diff
            }
            None => Diff::default(),
        };

        let is_new = self.peer_clock(&doc_id, message.sender).is_none();
        let peer_clock = match (&message.changes, self.peer_clock(&doc_id, message.sender)) {
            (Some(_), Some(known)) => known.union(&message.clock),
            _ => message.clock.clone(),
        };
        self.record_peer(&doc_id, message.sender, peer_clock.clone());

        let ours = self.require(&doc_id)?.clock();
        if let Some(reply) = self.changes_since(&doc_id, &peer_clock)? {
            self.send(Envelope::to_peer(message.sender, reply));
            self.record_peer(&doc_id, message.sender, peer_clock.union(&ours));
        } else if !ours.covers(&message.clock) || is_new {
            let reply = self.announce_clock(&doc_id)?;
            self.send(Envelope::to_peer(message.sender, reply));
        }

        if !diff.is_empty() {
            tracing::debug!(actor = %self.actor, %doc_id, sender = %message.sender, entries = diff.len(), "merged remote changes");
        }
        Ok(Received::merged(doc_id, diff))
    }

    fn require(&self, doc_id: &str) -> Result<&CrdtDocument, CrdtError> {
        self.docs
            .get(doc_id)
            .ok_or_else(|| CrdtError::UnknownDocument(doc_id.into()))
    }

    fn record_peer(&mut self, doc_id: &str, peer: ActorId, clock: Clock) {
        self.peers
            .entry(doc_id.into())
            .or_default()
            .insert(peer, clock);
    }

    fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope).is_err() {
            tracing::debug!(actor = %self.actor, "outbound channel closed, message discarded");
        }
    }
}
