//! Error types for CRDT operations.

use smol_str::SmolStr;
use thiserror::Error;
use tandem_editor_core::{EditorError, Path};

/// Errors that can occur during CRDT operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CrdtError {
    /// Persisted or received bytes do not describe a well-formed document.
    #[error("corrupt document: {0}")]
    CorruptDocument(String),

    /// Failed to import CRDT data.
    #[error("failed to import CRDT data: {0}")]
    Import(String),

    /// Failed to export CRDT data.
    #[error("failed to export CRDT data: {0}")]
    Export(String),

    /// No node is reachable at the given path.
    #[error("no node at path {0:?}")]
    PathNotFound(Path),

    /// A node key is referenced but has no node record.
    #[error("unknown node {0}")]
    NodeNotFound(SmolStr),

    /// A text offset or range falls outside a text node.
    #[error("range {offset}..{end} out of bounds for text of length {len} in node {key}")]
    OffsetOutOfRange {
        key: SmolStr,
        offset: usize,
        end: usize,
        len: usize,
    },

    /// A new node would reuse a key that already names a node or part.
    #[error("node key {0} is already in use")]
    DuplicateKey(SmolStr),

    /// The node exists but has the wrong shape for the mutation.
    #[error("node {key} is not {expected}")]
    UnexpectedShape { key: SmolStr, expected: &'static str },

    /// An edit does not fit the document it is applied to.
    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    /// The connection holds no document with this id.
    #[error("unknown document {0}")]
    UnknownDocument(SmolStr),

    /// No session at this index.
    #[error("unknown session {0}")]
    UnknownSession(usize),

    /// The editor rejected an operation batch.
    #[error(transparent)]
    Editor(#[from] EditorError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An operation batch or diff could not be translated.
    #[error(transparent)]
    Translation(#[from] TranslationError),

    /// Loro CRDT error.
    #[error("loro error: {0}")]
    Loro(String),
}

impl From<loro::LoroError> for CrdtError {
    fn from(e: loro::LoroError) -> Self {
        CrdtError::Loro(e.to_string())
    }
}

impl From<postcard::Error> for CrdtError {
    fn from(e: postcard::Error) -> Self {
        CrdtError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CrdtError {
    fn from(e: serde_json::Error) -> Self {
        CrdtError::Serialization(e.to_string())
    }
}

/// A translation step failed for one operation or diff entry.
///
/// Always recoverable: the session falls back to a full resync.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot translate {operation} at index {index}: {reason}")]
pub struct TranslationError {
    /// Position of the failing item in its batch.
    pub index: usize,
    /// Kind of the failing operation or diff entry.
    pub operation: &'static str,
    pub reason: String,
}

impl TranslationError {
    pub fn new(index: usize, operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            index,
            operation,
            reason: reason.into(),
        }
    }
}
