//! One client: an editor value kept in step with its shared document.

use smol_str::SmolStr;
use tandem_editor_core::{KeyGenerator, Operation, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::clock::{ActorId, Clock};
use crate::connection::Connection;
use crate::document::CrdtDocument;
use crate::protocol::{Envelope, Message};
use crate::translate::{apply_editor_ops, diff_to_editor_ops, resync_from_document};
use crate::CrdtError;

/// Receives the editor value whenever a session changes it.
pub trait View {
    fn render(&mut self, value: &Value);
}

/// A view that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl View for NullView {
    fn render(&mut self, _value: &Value) {}
}

/// How a session absorbed an edit or message.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The shared document did not change.
    Unchanged,
    /// Applied incrementally with these editor operations.
    Patched { operations: Vec<Operation> },
    /// The editor value was rebuilt from the document.
    Resynced,
}

/// A client editing one shared document.
///
/// Local edits go to the editor value first and are then translated into a
/// document change. Remote changes come back as a diff translated into
/// editor operations. When either translation fails the editor value is
/// rebuilt from the document, so the two never stay apart.
pub struct ClientSession<V: View = NullView> {
    doc_id: SmolStr,
    value: Value,
    connection: Connection,
    keys: KeyGenerator,
    view: V,
}

impl<V: View> ClientSession<V> {
    /// Start a closed session over `doc`.
    pub fn new(
        doc_id: impl Into<SmolStr>,
        doc: CrdtDocument,
        outbound: UnboundedSender<Envelope>,
        mut view: V,
    ) -> Result<Self, CrdtError> {
        let doc_id = doc_id.into();
        let actor = doc.actor();
        let value = resync_from_document(&doc)?;
        let mut keys = KeyGenerator::new(actor.to_string());
        for key in doc.node_keys() {
            keys.observe(&key);
        }
        let mut connection = Connection::new(actor, outbound);
        connection.replace_doc(&doc_id, doc);
        view.render(&value);
        tracing::debug!(%actor, %doc_id, "session started");
        Ok(Self {
            doc_id,
            value,
            connection,
            keys,
            view,
        })
    }

    /// Start a closed session from a saved snapshot.
    pub fn load(
        doc_id: impl Into<SmolStr>,
        bytes: &[u8],
        actor: ActorId,
        outbound: UnboundedSender<Envelope>,
        view: V,
    ) -> Result<Self, CrdtError> {
        Self::new(doc_id, CrdtDocument::load(bytes, actor)?, outbound, view)
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn actor(&self) -> ActorId {
        self.connection.actor()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Key source for nodes this client creates (splits, inserts).
    pub fn keys(&mut self) -> &mut KeyGenerator {
        &mut self.keys
    }

    pub fn document(&self) -> Result<&CrdtDocument, CrdtError> {
        self.connection
            .doc(&self.doc_id)
            .ok_or_else(|| CrdtError::UnknownDocument(self.doc_id.clone()))
    }

    /// The document's clock, one counter per actor seen.
    pub fn clock(&self) -> Result<Clock, CrdtError> {
        Ok(self.document()?.clock())
    }

    pub fn is_online(&self) -> bool {
        self.connection.is_open()
    }

    pub fn save(&self) -> Result<Vec<u8>, CrdtError> {
        self.document()?.save()
    }

    /// Apply a local batch.
    ///
    /// A batch the editor itself rejects fails with nothing changed.
    pub fn on_local_edit(&mut self, ops: &[Operation]) -> Result<SyncOutcome, CrdtError> {
        let mut next = self.value.clone();
        next.apply_batch(ops)?;
        let translated = apply_editor_ops(self.document()?, ops);
        match translated {
            Ok(Some(changed)) => {
                self.connection.set_doc(&self.doc_id, changed)?;
                self.set_value(next);
                Ok(SyncOutcome::Patched {
                    operations: ops.to_vec(),
                })
            }
            Ok(None) => {
                self.set_value(next);
                Ok(SyncOutcome::Unchanged)
            }
            Err(CrdtError::Translation(e)) => {
                tracing::warn!(actor = %self.actor(), error = %e, "local edit did not translate, resyncing");
                self.resync()
            }
            Err(e) => Err(e),
        }
    }

    /// Merge a message from a peer and bring the editor value up to date.
    pub fn on_remote_message(&mut self, message: &Message) -> Result<SyncOutcome, CrdtError> {
        let received = self.connection.receive(message)?;
        if received.dropped() || received.doc_id != self.doc_id || received.diff.is_empty() {
            return Ok(SyncOutcome::Unchanged);
        }
        let operations = match diff_to_editor_ops(&received.diff) {
            Ok(ops) => ops,
            Err(e) => {
                tracing::warn!(actor = %self.actor(), error = %e, "remote diff did not translate, resyncing");
                return self.resync();
            }
        };
        let mut next = self.value.clone();
        if let Err(e) = next.apply_batch(&operations) {
            tracing::warn!(actor = %self.actor(), error = %e, "remote operations did not apply, resyncing");
            return self.resync();
        }
        self.set_value(next);
        Ok(SyncOutcome::Patched { operations })
    }

    /// Go online or offline. Local edits keep working while offline and
    /// reach peers after reconnecting.
    pub fn toggle_online(&mut self, online: bool) -> Result<(), CrdtError> {
        if online {
            self.connection.open()
        } else {
            self.connection.close();
            Ok(())
        }
    }

    /// Absorb a document reconciled elsewhere and rebuild the editor value.
    pub fn adopt_merged(&mut self, merged: &CrdtDocument) -> Result<SyncOutcome, CrdtError> {
        let doc = self.document()?.merge(merged)?;
        for key in doc.node_keys() {
            self.keys.observe(&key);
        }
        self.connection.replace_doc(&self.doc_id, doc);
        self.resync()
    }

    /// Rebuild the editor value from the document, dropping the selection.
    pub fn resync(&mut self) -> Result<SyncOutcome, CrdtError> {
        let value = resync_from_document(self.document()?)?;
        self.set_value(value);
        Ok(SyncOutcome::Resynced)
    }

    fn set_value(&mut self, value: Value) {
        self.value = value;
        self.view.render(&self.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_editor_core::{Document, Element, Node, Text};
    use tokio::sync::mpsc::unbounded_channel;

    #[derive(Default)]
    struct CountingView {
        renders: usize,
        last: Option<String>,
    }

    impl View for CountingView {
        fn render(&mut self, value: &Value) {
            self.renders += 1;
            self.last = Some(value.document.plain_text());
        }
    }

    fn seed() -> Vec<u8> {
        let value = Value::new(Document::new(vec![Node::Block(Element::new(
            "p",
            "paragraph",
            vec![Node::Text(Text::plain("t", "Hello"))],
        ))]));
        CrdtDocument::from_value(ActorId(100), &value)
            .unwrap()
            .save()
            .unwrap()
    }

    #[test]
    fn test_local_edit_patches_and_renders() {
        let (tx, _rx) = unbounded_channel();
        let mut session =
            ClientSession::load("doc", &seed(), ActorId(1), tx, CountingView::default()).unwrap();
        let outcome = session
            .on_local_edit(&[Operation::insert_text(vec![0, 0], 5, "!")])
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Patched { .. }));
        assert_eq!(session.view().renders, 2);
        assert_eq!(session.view().last.as_deref(), Some("Hello!"));
        assert_eq!(
            session.document().unwrap().value().unwrap(),
            session.value().document
        );
    }

    #[test]
    fn test_rejected_batch_changes_nothing() {
        let (tx, _rx) = unbounded_channel();
        let mut session = ClientSession::load("doc", &seed(), ActorId(1), tx, NullView).unwrap();
        let clock = session.clock().unwrap();
        let err = session
            .on_local_edit(&[Operation::remove_text(vec![0, 0], 0, "Jello")])
            .unwrap_err();
        assert!(matches!(err, CrdtError::Editor(_)));
        assert_eq!(session.clock().unwrap(), clock);
        assert_eq!(session.value().document.plain_text(), "Hello");
    }

    #[test]
    fn test_remote_message_patches_editor() {
        let bytes = seed();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, _rx_b) = unbounded_channel();
        let mut a = ClientSession::load("doc", &bytes, ActorId(1), tx_a, NullView).unwrap();
        let mut b = ClientSession::load("doc", &bytes, ActorId(2), tx_b, NullView).unwrap();
        b.toggle_online(true).unwrap();

        a.on_local_edit(&[Operation::insert_text(vec![0, 0], 0, ">> ")])
            .unwrap();
        assert!(rx_a.try_recv().is_err());
        let message = Message {
            doc_id: "doc".into(),
            sender: a.actor(),
            clock: a.clock().unwrap(),
            changes: a.document().unwrap().changes_since(&b.clock().unwrap()).unwrap(),
        };
        let outcome = b.on_remote_message(&message).unwrap();
        assert!(matches!(outcome, SyncOutcome::Patched { .. }));
        assert_eq!(b.value().document, a.value().document);
    }

    #[test]
    fn test_resumed_session_mints_fresh_keys() {
        let (tx, _rx) = unbounded_channel();
        let mut session = ClientSession::load("doc", &seed(), ActorId(1), tx.clone(), NullView).unwrap();
        let first = session.keys().next_key();
        session
            .on_local_edit(&[Operation::SplitNode {
                path: vec![0, 0],
                position: 1,
                new_key: first.clone(),
                properties: Default::default(),
            }])
            .unwrap();
        let saved = session.save().unwrap();

        let mut resumed = ClientSession::load("doc", &saved, ActorId(1), tx, NullView).unwrap();
        let second = resumed.keys().next_key();
        assert_ne!(second, first);
        let outcome = resumed
            .on_local_edit(&[Operation::SplitNode {
                path: vec![0, 1],
                position: 1,
                new_key: second,
                properties: Default::default(),
            }])
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Patched { .. }));
        assert_eq!(resumed.value().document.plain_text(), "Hello");
        assert_eq!(
            resumed.document().unwrap().value().unwrap(),
            resumed.value().document
        );
    }

    #[test]
    fn test_offline_session_ignores_messages() {
        let bytes = seed();
        let (tx, _rx) = unbounded_channel();
        let mut b = ClientSession::load("doc", &bytes, ActorId(2), tx, NullView).unwrap();
        let message = Message::announce("doc", ActorId(1), Clock::new());
        assert_eq!(b.on_remote_message(&message).unwrap(), SyncOutcome::Unchanged);
        assert!(!b.is_online());
    }
}
