//! Several client sessions over one shared document, wired together by an
//! in-process message router.

use tandem_editor_core::{Operation, Value};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::clock::ActorId;
use crate::config::SyncConfig;
use crate::document::CrdtDocument;
use crate::protocol::{Envelope, Message};
use crate::session::{ClientSession, NullView, SyncOutcome, View};
use crate::CrdtError;

/// Actor that writes the seed document every session starts from.
pub const SEED_ACTOR: ActorId = ActorId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Online,
    Offline,
}

/// Routes messages between sessions and drives offline reconciliation.
///
/// Session `i` (zero-based) edits as actor `i + 1`.
pub struct Coordinator<V: View + Default = NullView> {
    config: SyncConfig,
    sessions: Vec<ClientSession<V>>,
    queue: UnboundedSender<Envelope>,
    outbound: UnboundedReceiver<Envelope>,
    state: CoordinatorState,
}

impl<V: View + Default> Coordinator<V> {
    /// Start `count` online sessions from the same saved document.
    pub fn from_snapshot(config: SyncConfig, bytes: &[u8], count: usize) -> Result<Self, CrdtError> {
        let (tx, rx) = unbounded_channel();
        let mut sessions = Vec::with_capacity(count);
        for i in 1..=count {
            let doc = config.snapshot_encoding.decode(bytes, ActorId(i as u64))?;
            sessions.push(ClientSession::new(
                config.document_id.clone(),
                doc,
                tx.clone(),
                V::default(),
            )?);
        }
        let mut coordinator = Self {
            config,
            sessions,
            queue: tx,
            outbound: rx,
            state: CoordinatorState::Offline,
        };
        coordinator.set_online(true)?;
        Ok(coordinator)
    }

    /// Seed a document from `value` and start `count` sessions on it.
    pub fn from_value(config: SyncConfig, value: &Value, count: usize) -> Result<Self, CrdtError> {
        let seed = CrdtDocument::from_value(SEED_ACTOR, value)?;
        let bytes = config.snapshot_encoding.encode(&seed)?;
        Self::from_snapshot(config, &bytes, count)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session(&self, index: usize) -> Option<&ClientSession<V>> {
        self.sessions.get(index)
    }

    pub fn sessions(&self) -> &[ClientSession<V>] {
        &self.sessions
    }

    fn session_mut(&mut self, index: usize) -> Result<&mut ClientSession<V>, CrdtError> {
        self.sessions
            .get_mut(index)
            .ok_or(CrdtError::UnknownSession(index))
    }

    /// Apply a local batch in one session. Call [`pump`](Self::pump) to
    /// deliver what it sent.
    pub fn local_edit(&mut self, index: usize, ops: &[Operation]) -> Result<SyncOutcome, CrdtError> {
        self.session_mut(index)?.on_local_edit(ops)
    }

    /// Queue an envelope for the next [`pump`](Self::pump), as if a
    /// session had sent it.
    pub fn enqueue(&self, envelope: Envelope) {
        if self.queue.send(envelope).is_err() {
            tracing::debug!("message queue closed, envelope discarded");
        }
    }

    /// Hand `message` to every session except the sender. Returns how many
    /// sessions took it; nothing is delivered while offline.
    ///
    /// A session that fails to take the message is logged and skipped, so
    /// the others still receive it.
    pub fn broadcast(&mut self, sender: usize, message: &Message) -> Result<usize, CrdtError> {
        if self.state == CoordinatorState::Offline {
            return Ok(0);
        }
        let mut delivered = 0;
        for (i, session) in self.sessions.iter_mut().enumerate() {
            if i != sender && deliver(session, message) {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Route queued messages until nothing is left or the per-pump limit is
    /// hit. Messages queued while offline are discarded.
    pub fn pump(&mut self) -> Result<usize, CrdtError> {
        let mut delivered = 0;
        loop {
            if delivered >= self.config.max_deliveries_per_pump {
                tracing::warn!(delivered, "delivery limit reached, leaving messages queued");
                break;
            }
            let Ok(envelope) = self.outbound.try_recv() else {
                break;
            };
            if self.state == CoordinatorState::Offline {
                tracing::debug!(sender = %envelope.message.sender, "offline, dropping message");
                continue;
            }
            for session in &mut self.sessions {
                if envelope.is_for(session.actor()) && deliver(session, &envelope.message) {
                    delivered += 1;
                }
            }
        }
        if delivered > 0 {
            tracing::debug!(delivered, "pumped messages");
        }
        Ok(delivered)
    }

    /// Take every session online or offline. Going online runs the clock
    /// exchange to completion.
    pub fn set_online(&mut self, online: bool) -> Result<(), CrdtError> {
        self.state = if online {
            CoordinatorState::Online
        } else {
            CoordinatorState::Offline
        };
        tracing::info!(online, sessions = self.sessions.len(), "switching connectivity");
        for session in &mut self.sessions {
            session.toggle_online(online)?;
        }
        if online {
            self.pump()?;
        }
        Ok(())
    }

    /// Reconcile every session without the network: merge all documents and
    /// hand the result to each session.
    pub fn offline_sync(&mut self) -> Result<(), CrdtError> {
        if self.sessions.is_empty() {
            return Ok(());
        }
        let mut merged = CrdtDocument::empty(SEED_ACTOR)?;
        for session in &self.sessions {
            merged = merged.merge(session.document()?)?;
        }
        for session in &mut self.sessions {
            session.adopt_merged(&merged)?;
        }
        tracing::info!(clock = %merged.clock(), "offline sync complete");
        Ok(())
    }

    /// True when every session shows the same document.
    pub fn is_converged(&self) -> bool {
        self.sessions
            .windows(2)
            .all(|pair| pair[0].value().document == pair[1].value().document)
    }
}

/// Hand one message to one session, logging a failure instead of
/// returning it.
fn deliver<V: View>(session: &mut ClientSession<V>, message: &Message) -> bool {
    match session.on_remote_message(message) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(
                actor = %session.actor(),
                sender = %message.sender,
                error = %e,
                "session rejected message"
            );
            false
        }
    }
}
