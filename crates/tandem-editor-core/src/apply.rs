//! Operation application for editor values.
//!
//! This is the editor's own routine for applying operations; incoming
//! remote batches and local edits both go through it.

use smol_str::SmolStr;

use crate::error::EditorError;
use crate::node::{Element, Node, Text, Value};
use crate::operation::{NodeProperties, Operation};
use crate::types::{Mark, MarkSet, NodeKey, Path};

/// Apply a single operation to a value.
///
/// This is the central dispatch point for all editor operations.
pub fn apply_operation(value: &mut Value, op: &Operation) -> Result<(), EditorError> {
    match op {
        Operation::InsertText {
            path,
            offset,
            text,
            marks,
        } => apply_insert_text(value, path, *offset, text, marks),
        Operation::RemoveText { path, offset, text } => apply_remove_text(value, path, *offset, text),
        Operation::AddMark {
            path,
            offset,
            length,
            mark,
        } => apply_mark(value, path, *offset, *length, mark, true),
        Operation::RemoveMark {
            path,
            offset,
            length,
            mark,
        } => apply_mark(value, path, *offset, *length, mark, false),
        Operation::InsertNode { path, node } => apply_insert_node(value, path, node.clone()),
        Operation::RemoveNode { path } => apply_remove_node(value, path).map(|_| ()),
        Operation::MergeNode { path, position } => apply_merge_node(value, path, *position),
        Operation::SplitNode {
            path,
            position,
            new_key,
            properties,
        } => apply_split_node(value, path, *position, new_key, properties),
        Operation::SetNode { path, properties } => apply_set_node(value, path, properties),
        Operation::MoveNode { path, new_path } => apply_move_node(value, path, new_path),
        Operation::SetSelection { selection } => {
            value.selection = selection.clone();
            Ok(())
        }
    }
}

/// Apply a batch in order.
///
/// The batch is all-or-nothing: on error `value` is left untouched.
pub fn apply_operations(value: &mut Value, ops: &[Operation]) -> Result<(), EditorError> {
    let mut next = value.clone();
    for op in ops {
        apply_operation(&mut next, op)?;
    }
    next.validate_selection();
    *value = next;
    Ok(())
}

impl Value {
    /// Apply one operation. See [`apply_operation`].
    pub fn apply(&mut self, op: &Operation) -> Result<(), EditorError> {
        apply_operation(self, op)
    }

    /// Apply a batch atomically. See [`apply_operations`].
    pub fn apply_batch(&mut self, ops: &[Operation]) -> Result<(), EditorError> {
        apply_operations(self, ops)
    }
}

fn text_at<'a>(value: &'a mut Value, path: &[usize]) -> Result<&'a mut Text, EditorError> {
    value
        .document
        .node_mut(path)
        .ok_or_else(|| EditorError::PathNotFound(path.to_vec()))?
        .as_text_mut()
        .ok_or_else(|| EditorError::UnexpectedNode {
            path: path.to_vec(),
            expected: "a text node",
        })
}

fn out_of_range(path: &[usize], offset: usize, end: usize, len: usize) -> EditorError {
    EditorError::OffsetOutOfRange {
        path: path.to_vec(),
        offset,
        end,
        len,
    }
}

fn invalid(operation: &'static str, reason: impl Into<SmolStr>) -> EditorError {
    EditorError::InvalidOperation {
        operation,
        reason: reason.into(),
    }
}

/// Split a node path into parent path and index.
fn split_path(path: &[usize]) -> Result<(&[usize], usize), EditorError> {
    match path.split_last() {
        Some((index, parent)) => Ok((parent, *index)),
        None => Err(EditorError::PathNotFound(path.to_vec())),
    }
}

fn apply_insert_text(
    value: &mut Value,
    path: &[usize],
    offset: usize,
    text: &str,
    marks: &MarkSet,
) -> Result<(), EditorError> {
    let node = text_at(value, path)?;
    let len = node.len();
    node.insert(offset, text, marks)
        .ok_or_else(|| out_of_range(path, offset, offset, len))
}

fn apply_remove_text(
    value: &mut Value,
    path: &[usize],
    offset: usize,
    expected: &str,
) -> Result<(), EditorError> {
    let node = text_at(value, path)?;
    let len = node.len();
    let count = expected.chars().count();
    let end = offset.saturating_add(count);
    if end > len {
        return Err(out_of_range(path, offset, end, len));
    }
    let found: String = node.text().chars().skip(offset).take(count).collect();
    if found != expected {
        return Err(EditorError::TextMismatch {
            path: path.to_vec(),
            expected: expected.to_string(),
            found,
        });
    }
    node.remove(offset, count)
        .map(|_| ())
        .ok_or_else(|| out_of_range(path, offset, end, len))
}

fn apply_mark(
    value: &mut Value,
    path: &[usize],
    offset: usize,
    length: usize,
    mark: &Mark,
    on: bool,
) -> Result<(), EditorError> {
    let node = text_at(value, path)?;
    let len = node.len();
    node.set_mark(offset, length, mark, on)
        .ok_or_else(|| out_of_range(path, offset, offset.saturating_add(length), len))
}

fn apply_insert_node(value: &mut Value, path: &[usize], node: Node) -> Result<(), EditorError> {
    let (parent, index) = split_path(path)?;
    let children = value
        .document
        .children_mut(parent)
        .ok_or_else(|| EditorError::PathNotFound(parent.to_vec()))?;
    if index > children.len() {
        return Err(EditorError::PathNotFound(path.to_vec()));
    }
    children.insert(index, node);
    Ok(())
}

fn apply_remove_node(value: &mut Value, path: &[usize]) -> Result<Node, EditorError> {
    let (parent, index) = split_path(path)?;
    let children = value
        .document
        .children_mut(parent)
        .ok_or_else(|| EditorError::PathNotFound(parent.to_vec()))?;
    if index >= children.len() {
        return Err(EditorError::PathNotFound(path.to_vec()));
    }
    Ok(children.remove(index))
}

fn apply_merge_node(value: &mut Value, path: &[usize], position: usize) -> Result<(), EditorError> {
    let (parent, index) = split_path(path)?;
    if index == 0 {
        return Err(invalid("merge_node", "node has no previous sibling"));
    }
    let children = value
        .document
        .children_mut(parent)
        .ok_or_else(|| EditorError::PathNotFound(parent.to_vec()))?;
    if index >= children.len() {
        return Err(EditorError::PathNotFound(path.to_vec()));
    }
    let node = children.remove(index);
    let prev = &mut children[index - 1];
    match (prev, node) {
        (Node::Text(prev), Node::Text(node)) => {
            if prev.len() != position {
                return Err(invalid(
                    "merge_node",
                    format!("position {position} does not match text length {}", prev.len()),
                ));
            }
            prev.append(node.leaves);
        }
        (Node::Block(prev), Node::Block(node)) | (Node::Inline(prev), Node::Inline(node)) => {
            if prev.nodes.len() != position {
                return Err(invalid(
                    "merge_node",
                    format!("position {position} does not match child count {}", prev.nodes.len()),
                ));
            }
            prev.nodes.extend(node.nodes);
        }
        _ => return Err(invalid("merge_node", "siblings have different kinds")),
    }
    Ok(())
}

fn apply_split_node(
    value: &mut Value,
    path: &[usize],
    position: usize,
    new_key: &NodeKey,
    properties: &NodeProperties,
) -> Result<(), EditorError> {
    let (parent, index) = split_path(path)?;
    let children = value
        .document
        .children_mut(parent)
        .ok_or_else(|| EditorError::PathNotFound(parent.to_vec()))?;
    let node = children
        .get_mut(index)
        .ok_or_else(|| EditorError::PathNotFound(path.to_vec()))?;
    let is_block = matches!(node, Node::Block(_));
    let tail = match node {
        Node::Text(text) => {
            let len = text.len();
            let leaves = text
                .split_off(position)
                .ok_or_else(|| out_of_range(path, position, position, len))?;
            Node::Text(Text::new(new_key.clone(), leaves))
        }
        Node::Block(element) | Node::Inline(element) => {
            if position > element.nodes.len() {
                return Err(invalid(
                    "split_node",
                    format!("position {position} past {} children", element.nodes.len()),
                ));
            }
            let nodes = element.nodes.split_off(position);
            let split = Element {
                key: new_key.clone(),
                node_type: properties
                    .node_type
                    .clone()
                    .unwrap_or_else(|| element.node_type.clone()),
                data: properties.data.clone().unwrap_or_else(|| element.data.clone()),
                nodes,
            };
            if is_block {
                Node::Block(split)
            } else {
                Node::Inline(split)
            }
        }
    };
    children.insert(index + 1, tail);
    Ok(())
}

fn apply_set_node(
    value: &mut Value,
    path: &[usize],
    properties: &NodeProperties,
) -> Result<(), EditorError> {
    if path.is_empty() {
        if properties.node_type.is_some() {
            return Err(invalid("set_node", "the document has no type"));
        }
        if let Some(data) = &properties.data {
            value.document.data = data.clone();
        }
        return Ok(());
    }
    let node = value
        .document
        .node_mut(path)
        .ok_or_else(|| EditorError::PathNotFound(path.to_vec()))?;
    let element = node.as_element_mut().ok_or_else(|| EditorError::UnexpectedNode {
        path: path.to_vec(),
        expected: "an element",
    })?;
    if let Some(node_type) = &properties.node_type {
        element.node_type = node_type.clone();
    }
    if let Some(data) = &properties.data {
        element.data = data.clone();
    }
    Ok(())
}

fn apply_move_node(value: &mut Value, path: &[usize], new_path: &Path) -> Result<(), EditorError> {
    if new_path.len() > path.len() && new_path.starts_with(path) {
        return Err(invalid("move_node", "cannot move a node into itself"));
    }
    let node = apply_remove_node(value, path)?;
    apply_insert_node(value, new_path, node)
}
