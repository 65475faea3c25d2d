//! Document diff → editor operations.

use tandem_editor_core::{NodeProperties, Operation};

use crate::TranslationError;
use crate::diff::{Diff, DiffEntry};

/// Translate a structural diff into an editor batch.
///
/// Entry paths already account for the entries before them, so the batch
/// applies in order against the editor's pre-diff value. A text splice
/// becomes one removal followed by one insertion per leaf, so inserted
/// runs keep their exact marks.
pub fn diff_to_editor_ops(diff: &Diff) -> Result<Vec<Operation>, TranslationError> {
    let mut ops = Vec::with_capacity(diff.len());
    for (index, entry) in diff.iter().enumerate() {
        match entry {
            DiffEntry::NodeRemoved { path, .. } => {
                ops.push(Operation::RemoveNode { path: path.clone() });
            }
            DiffEntry::NodeMoved { from, to, .. } => ops.push(Operation::MoveNode {
                path: from.clone(),
                new_path: to.clone(),
            }),
            DiffEntry::NodeInserted { path, node } => ops.push(Operation::InsertNode {
                path: path.clone(),
                node: node.clone(),
            }),
            DiffEntry::KindChanged { key, .. } => {
                return Err(TranslationError::new(
                    index,
                    entry.kind(),
                    format!("node {key} changed kind"),
                ));
            }
            DiffEntry::PropertiesChanged {
                path,
                node_type,
                data,
                ..
            } => ops.push(Operation::SetNode {
                path: path.clone(),
                properties: NodeProperties {
                    node_type: node_type.clone(),
                    data: data.clone(),
                },
            }),
            DiffEntry::TextSpliced {
                path,
                offset,
                removed,
                inserted,
                ..
            } => {
                if !removed.is_empty() {
                    ops.push(Operation::remove_text(path.clone(), *offset, removed.clone()));
                }
                let mut at = *offset;
                for leaf in inserted.iter().filter(|l| !l.is_empty()) {
                    ops.push(Operation::InsertText {
                        path: path.clone(),
                        offset: at,
                        text: leaf.text.clone(),
                        marks: leaf.marks.clone(),
                    });
                    at += leaf.len();
                }
            }
            DiffEntry::MarkAdded {
                path,
                offset,
                length,
                mark,
                ..
            } => ops.push(Operation::AddMark {
                path: path.clone(),
                offset: *offset,
                length: *length,
                mark: mark.clone(),
            }),
            DiffEntry::MarkRemoved {
                path,
                offset,
                length,
                mark,
                ..
            } => ops.push(Operation::RemoveMark {
                path: path.clone(),
                offset: *offset,
                length: *length,
                mark: mark.clone(),
            }),
        }
    }
    Ok(ops)
}
