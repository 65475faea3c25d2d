//! Rich-text editor model shared by every tandem replica.
//!
//! This crate provides:
//! - `Value`/`Document`/`Node`: the editor tree and its plain-object JSON form
//! - `Operation`: the editor's edit operations
//! - `apply_operation`/`apply_operations`: the editor's own application routine
//! - `KeyGenerator`: replica-unique node key minting

mod apply;
mod error;
mod node;
mod operation;
mod types;

pub use apply::{apply_operation, apply_operations};
pub use error::EditorError;
pub use node::{DOCUMENT_KEY, Document, Element, Node, Text, Value, leaves_from_chars};
pub use operation::{NodeProperties, Operation};
pub use types::{
    KeyGenerator, Leaf, Mark, MarkSet, NodeKey, Path, Point, Props, Selection, normalize_leaves,
};
