//! Editor operations.
//!
//! Operations arrive in ordered batches. Each operation's path is valid
//! against the tree produced by the operations before it in the batch.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::node::Node;
use crate::types::{Mark, MarkSet, NodeKey, Path, Props, Selection};

/// Properties an operation may set on an element.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeProperties {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Props>,
}

impl NodeProperties {
    pub fn is_empty(&self) -> bool {
        self.node_type.is_none() && self.data.is_none()
    }
}

/// A single edit to the editor tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Insert `text` carrying exactly `marks` at a character offset.
    InsertText {
        path: Path,
        offset: usize,
        text: String,
        #[serde(default, skip_serializing_if = "MarkSet::is_empty")]
        marks: MarkSet,
    },
    /// Remove `text` found at a character offset.
    RemoveText {
        path: Path,
        offset: usize,
        text: String,
    },
    AddMark {
        path: Path,
        offset: usize,
        length: usize,
        mark: Mark,
    },
    RemoveMark {
        path: Path,
        offset: usize,
        length: usize,
        mark: Mark,
    },
    InsertNode {
        path: Path,
        node: Node,
    },
    RemoveNode {
        path: Path,
    },
    /// Merge the node at `path` into its previous sibling.
    ///
    /// `position` is the previous sibling's length (characters for text,
    /// children for elements) before the merge.
    MergeNode {
        path: Path,
        position: usize,
    },
    /// Split the node at `path` at `position`; the tail becomes a new next
    /// sibling keyed `new_key`.
    SplitNode {
        path: Path,
        position: usize,
        new_key: NodeKey,
        #[serde(default, skip_serializing_if = "NodeProperties::is_empty")]
        properties: NodeProperties,
    },
    SetNode {
        path: Path,
        properties: NodeProperties,
    },
    /// Move the node at `path`; `new_path` is read after the node is removed.
    MoveNode {
        path: Path,
        new_path: Path,
    },
    /// Editor-only state, not part of the shared document.
    SetSelection {
        selection: Option<Selection>,
    },
}

impl Operation {
    pub fn insert_text(path: Path, offset: usize, text: impl Into<String>) -> Self {
        Operation::InsertText {
            path,
            offset,
            text: text.into(),
            marks: MarkSet::new(),
        }
    }

    pub fn remove_text(path: Path, offset: usize, text: impl Into<String>) -> Self {
        Operation::RemoveText {
            path,
            offset,
            text: text.into(),
        }
    }

    pub fn add_mark(path: Path, offset: usize, length: usize, mark: impl Into<SmolStr>) -> Self {
        Operation::AddMark {
            path,
            offset,
            length,
            mark: Mark::new(mark),
        }
    }

    /// Operation name as used in the serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::InsertText { .. } => "insert_text",
            Operation::RemoveText { .. } => "remove_text",
            Operation::AddMark { .. } => "add_mark",
            Operation::RemoveMark { .. } => "remove_mark",
            Operation::InsertNode { .. } => "insert_node",
            Operation::RemoveNode { .. } => "remove_node",
            Operation::MergeNode { .. } => "merge_node",
            Operation::SplitNode { .. } => "split_node",
            Operation::SetNode { .. } => "set_node",
            Operation::MoveNode { .. } => "move_node",
            Operation::SetSelection { .. } => "set_selection",
        }
    }

    /// Target path, `None` for selection changes.
    pub fn path(&self) -> Option<&[usize]> {
        match self {
            Operation::InsertText { path, .. }
            | Operation::RemoveText { path, .. }
            | Operation::AddMark { path, .. }
            | Operation::RemoveMark { path, .. }
            | Operation::InsertNode { path, .. }
            | Operation::RemoveNode { path }
            | Operation::MergeNode { path, .. }
            | Operation::SplitNode { path, .. }
            | Operation::SetNode { path, .. }
            | Operation::MoveNode { path, .. } => Some(path),
            Operation::SetSelection { .. } => None,
        }
    }

    /// True for operations that change the shared document.
    pub fn is_document_change(&self) -> bool {
        !matches!(self, Operation::SetSelection { .. })
    }
}
