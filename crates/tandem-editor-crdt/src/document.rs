//! Loro-backed shared document.

use std::borrow::Cow;
use std::fmt;

use loro::{ExpandType, ExportMode, LoroDoc, StyleConfig};
use serde::{Deserialize, Serialize};
use tandem_editor_core::{DOCUMENT_KEY, Document, NodeKey, Value};

use crate::clock::{ActorId, Clock};
use crate::diff::{Diff, diff};
use crate::layout::{Tree, read_document};
use crate::mutator::Mutator;
use crate::CrdtError;

/// Encoded Loro updates carried between replicas.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Changes(Vec<u8>);

impl Changes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Changes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Changes({} bytes)", self.0.len())
    }
}

/// A replica's copy of the shared rich-text document.
///
/// Values are immutable: [`change`](Self::change),
/// [`apply_changes`](Self::apply_changes) and [`merge`](Self::merge) return
/// a new document and leave `self` valid for diffing. Only the newest value
/// of a replica should be mutated further, since every value shares the
/// replica's actor id.
pub struct CrdtDocument {
    doc: LoroDoc,
    actor: ActorId,
}

impl fmt::Debug for CrdtDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrdtDocument")
            .field("actor", &self.actor)
            .field("clock", &self.clock())
            .finish()
    }
}

/// Marks are free-form names, so every style key gets the same config:
/// no expansion. Text inserted next to a marked run, locally or by a peer,
/// carries only the marks its own operation gives it.
fn new_loro_doc() -> LoroDoc {
    let doc = LoroDoc::new();
    doc.config_default_text_style(Some(StyleConfig {
        expand: ExpandType::None,
    }));
    doc
}

impl CrdtDocument {
    /// A document with no root yet.
    ///
    /// Used when a remote replica announces a document this one has never
    /// seen; its first import brings the root along.
    pub fn empty(actor: ActorId) -> Result<Self, CrdtError> {
        let doc = new_loro_doc();
        doc.set_peer_id(actor.as_u64())?;
        Ok(Self { doc, actor })
    }

    /// A document holding an empty root.
    pub fn new(actor: ActorId) -> Result<Self, CrdtError> {
        Self::from_document(actor, &Document::empty(DOCUMENT_KEY))
    }

    /// Seed a document from an editor value in one change.
    pub fn from_value(actor: ActorId, value: &Value) -> Result<Self, CrdtError> {
        Self::from_document(actor, &value.document)
    }

    fn from_document(actor: ActorId, document: &Document) -> Result<Self, CrdtError> {
        Self::empty(actor)?.change("Initialize document", |m| m.init_root(document))
    }

    /// Load a saved document, failing fast on anything malformed.
    pub fn load(bytes: &[u8], actor: ActorId) -> Result<Self, CrdtError> {
        let doc = new_loro_doc();
        doc.import(bytes)
            .map_err(|e| CrdtError::CorruptDocument(e.to_string()))?;
        doc.set_peer_id(actor.as_u64())?;
        let loaded = Self { doc, actor };
        loaded
            .value()
            .map_err(|e| CrdtError::CorruptDocument(e.to_string()))?;
        Ok(loaded)
    }

    /// Export a full snapshot.
    pub fn save(&self) -> Result<Vec<u8>, CrdtError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| CrdtError::Export(e.to_string()))
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// Get the underlying Loro document.
    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn clock(&self) -> Clock {
        Clock::from_version_vector(&self.doc.oplog_vv())
    }

    /// Copy of this document that will attribute new ops to the same actor.
    fn fork(&self) -> Result<LoroDoc, CrdtError> {
        let doc = new_loro_doc();
        doc.import(&self.save()?)
            .map_err(|e| CrdtError::Import(e.to_string()))?;
        doc.set_peer_id(self.actor.as_u64())?;
        Ok(doc)
    }

    /// Run `f` as one change transaction and return the resulting document.
    ///
    /// When `f` fails nothing is committed and `self` is unaffected.
    pub fn change<F, E>(&self, description: &str, f: F) -> Result<CrdtDocument, E>
    where
        F: FnOnce(&mut Mutator<'_>) -> Result<(), E>,
        E: From<CrdtError>,
    {
        let doc = self.fork()?;
        {
            let mut mutator = Mutator::new(&doc)?;
            f(&mut mutator)?;
        }
        doc.set_next_commit_message(description);
        doc.commit();
        tracing::debug!(actor = %self.actor, description, "committed change");
        Ok(CrdtDocument {
            doc,
            actor: self.actor,
        })
    }

    /// Updates this document has that a replica at `clock` lacks.
    pub fn changes_since(&self, clock: &Clock) -> Result<Option<Changes>, CrdtError> {
        if clock.covers(&self.clock()) {
            return Ok(None);
        }
        let updates = self
            .doc
            .export(ExportMode::Updates {
                from: Cow::Owned(clock.to_version_vector()),
            })
            .map_err(|e| CrdtError::Export(e.to_string()))?;
        if updates.is_empty() {
            return Ok(None);
        }
        Ok(Some(Changes(updates)))
    }

    /// Integrate remote changes. Already-seen changes are ignored.
    pub fn apply_changes(&self, changes: &Changes) -> Result<CrdtDocument, CrdtError> {
        let doc = self.fork()?;
        doc.import(changes.as_bytes())
            .map_err(|e| CrdtError::Import(e.to_string()))?;
        Ok(CrdtDocument {
            doc,
            actor: self.actor,
        })
    }

    /// Merge `other` into a copy of this document.
    ///
    /// Content is commutative, associative and idempotent; the result keeps
    /// this document's actor.
    pub fn merge(&self, other: &CrdtDocument) -> Result<CrdtDocument, CrdtError> {
        let doc = self.fork()?;
        doc.import(&other.save()?)
            .map_err(|e| CrdtError::Import(e.to_string()))?;
        Ok(CrdtDocument {
            doc,
            actor: self.actor,
        })
    }

    /// Keys of every node record, reachable or not.
    pub fn node_keys(&self) -> Vec<NodeKey> {
        Tree::new(&self.doc).node_keys()
    }

    /// Project into the editor's document tree.
    pub fn value(&self) -> Result<Document, CrdtError> {
        read_document(&self.doc)
    }

    /// Structural diff from this document to `newer`.
    pub fn diff(&self, newer: &CrdtDocument) -> Result<Diff, CrdtError> {
        Ok(diff(&self.value()?, &newer.value()?))
    }
}
