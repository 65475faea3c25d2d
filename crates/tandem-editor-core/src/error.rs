//! Error types for editor tree operations.

use smol_str::SmolStr;
use thiserror::Error;

use crate::types::Path;

/// Errors raised while applying operations to an editor tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EditorError {
    /// No node exists at the given path.
    #[error("no node at path {0:?}")]
    PathNotFound(Path),

    /// The node at the path has the wrong shape for the operation.
    #[error("node at path {path:?} is not {expected}")]
    UnexpectedNode {
        path: Path,
        expected: &'static str,
    },

    /// A text offset or range falls outside the text node.
    #[error("range {offset}..{end} out of bounds for text of length {len} at {path:?}")]
    OffsetOutOfRange {
        path: Path,
        offset: usize,
        end: usize,
        len: usize,
    },

    /// The text an operation expects to remove is not what the node holds.
    #[error("text mismatch at {path:?}: expected {expected:?}, found {found:?}")]
    TextMismatch {
        path: Path,
        expected: String,
        found: String,
    },

    /// The operation is structurally invalid for the current tree.
    #[error("invalid {operation} operation: {reason}")]
    InvalidOperation {
        operation: &'static str,
        reason: SmolStr,
    },

    /// Plain-object JSON could not be parsed into an editor value.
    #[error("invalid editor JSON: {0}")]
    InvalidJson(String),
}

impl From<serde_json::Error> for EditorError {
    fn from(e: serde_json::Error) -> Self {
        EditorError::InvalidJson(e.to_string())
    }
}
