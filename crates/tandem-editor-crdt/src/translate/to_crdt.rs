//! Editor operations → document mutations.

use tandem_editor_core::{Element, Node, NodeKey, NodeProperties, Operation, Text};

use crate::layout::NodeObject;
use crate::mutator::Mutator;
use crate::{CrdtDocument, CrdtError, TranslationError};

/// Apply an editor batch to `doc` as a single change.
///
/// Each operation is resolved against the document as modified by the
/// operations before it. Returns `Ok(None)` when the batch holds nothing
/// but selection changes. On failure the error names the operation and its
/// index, and `doc` is unchanged.
pub fn apply_editor_ops(
    doc: &CrdtDocument,
    ops: &[Operation],
) -> Result<Option<CrdtDocument>, CrdtError> {
    if !ops.iter().any(Operation::is_document_change) {
        return Ok(None);
    }
    let changed = doc.change::<_, CrdtError>("local edit", |m| {
        for (index, op) in ops.iter().enumerate() {
            apply_op(m, op).map_err(|e| {
                tracing::debug!(index, kind = op.kind(), error = %e, "editor op did not translate");
                CrdtError::from(TranslationError::new(index, op.kind(), e.to_string()))
            })?;
        }
        Ok(())
    })?;
    Ok(Some(changed))
}

fn apply_op(m: &mut Mutator<'_>, op: &Operation) -> Result<(), CrdtError> {
    match op {
        Operation::InsertText {
            path,
            offset,
            text,
            marks,
        } => {
            let key = m.resolve(path)?;
            m.insert_text(&key, *offset, text, marks)
        }
        Operation::RemoveText { path, offset, text } => {
            let key = m.resolve(path)?;
            let len = text.chars().count();
            let found: String = Text::new(key.clone(), m.leaves(&key)?)
                .text()
                .chars()
                .skip(*offset)
                .take(len)
                .collect();
            if found != *text {
                return Err(CrdtError::InvalidEdit(format!(
                    "expected {text:?} at offset {offset}, found {found:?}"
                )));
            }
            m.remove_text(&key, *offset, len).map(|_| ())
        }
        Operation::AddMark {
            path,
            offset,
            length,
            mark,
        } => {
            let key = m.resolve(path)?;
            m.set_mark(&key, *offset, *length, mark, true)
        }
        Operation::RemoveMark {
            path,
            offset,
            length,
            mark,
        } => {
            let key = m.resolve(path)?;
            m.set_mark(&key, *offset, *length, mark, false)
        }
        Operation::InsertNode { path, node } => {
            let (parent, index) = m.resolve_parent(path)?;
            check_child_index(m, &parent, index, path, true)?;
            m.create_node(node)?;
            m.insert_child(&parent, index, node.key())
        }
        Operation::RemoveNode { path } => {
            let (parent, index) = m.resolve_parent(path)?;
            check_child_index(m, &parent, index, path, false)?;
            m.remove_child(&parent, index).map(|_| ())
        }
        Operation::MergeNode { path, position } => merge_node(m, path, *position),
        Operation::SplitNode {
            path,
            position,
            new_key,
            properties,
        } => split_node(m, path, *position, new_key, properties),
        Operation::SetNode { path, properties } => {
            let key = m.resolve(path)?;
            if let Some(node_type) = &properties.node_type {
                m.set_type(&key, node_type)?;
            }
            if let Some(data) = &properties.data {
                m.set_data(&key, data)?;
            }
            Ok(())
        }
        Operation::MoveNode { path, new_path } => {
            if new_path.len() > path.len() && new_path.starts_with(path) {
                return Err(CrdtError::InvalidEdit("cannot move a node into itself".into()));
            }
            let (parent, index) = m.resolve_parent(path)?;
            check_child_index(m, &parent, index, path, false)?;
            let key = m.remove_child(&parent, index)?;
            // new_path is read with the node already detached
            let (target, target_index) = m.resolve_parent(new_path)?;
            check_child_index(m, &target, target_index, new_path, true)?;
            m.insert_child(&target, target_index, &key)
        }
        Operation::SetSelection { .. } => Ok(()),
    }
}

fn check_child_index(
    m: &Mutator<'_>,
    parent: &NodeKey,
    index: usize,
    path: &[usize],
    inserting: bool,
) -> Result<(), CrdtError> {
    let len = m.children(parent)?.len();
    let ok = if inserting { index <= len } else { index < len };
    if ok {
        Ok(())
    } else {
        Err(CrdtError::PathNotFound(path.to_vec()))
    }
}

/// Merge the node at `path` into its previous sibling.
///
/// The previous sibling keeps its identity and takes over the merged node's
/// parts, so an insert that follows in the same batch lands in the
/// surviving node, and a concurrent edit inside the merged node still shows.
fn merge_node(m: &mut Mutator<'_>, path: &[usize], position: usize) -> Result<(), CrdtError> {
    let (parent, index) = m.resolve_parent(path)?;
    if index == 0 {
        return Err(CrdtError::InvalidEdit("node has no previous sibling".into()));
    }
    let siblings = m.children(&parent)?;
    let (Some(prev), Some(node)) = (siblings.get(index - 1).cloned(), siblings.get(index).cloned())
    else {
        return Err(CrdtError::PathNotFound(path.to_vec()));
    };

    let len = match (m.object(&prev)?, m.object(&node)?) {
        (NodeObject::Text, NodeObject::Text) => m.text_len(&prev)?,
        (a, b) if a == b && a.is_container() => m.children(&prev)?.len(),
        _ => {
            return Err(CrdtError::UnexpectedShape {
                key: node.as_str().into(),
                expected: "a sibling of the same kind",
            });
        }
    };
    if len != position {
        return Err(position_mismatch(position, len));
    }
    m.adopt_parts(&prev, &node)?;
    m.remove_child(&parent, index)?;
    Ok(())
}

fn split_node(
    m: &mut Mutator<'_>,
    path: &[usize],
    position: usize,
    new_key: &NodeKey,
    properties: &NodeProperties,
) -> Result<(), CrdtError> {
    let (parent, index) = m.resolve_parent(path)?;
    let key = m.resolve(path)?;
    let fresh = match m.object(&key)? {
        NodeObject::Text => {
            let len = m.text_len(&key)?;
            if position > len {
                return Err(CrdtError::OffsetOutOfRange {
                    key: key.as_str().into(),
                    offset: position,
                    end: position,
                    len,
                });
            }
            Node::Text(Text::new(new_key.clone(), Vec::new()))
        }
        object @ (NodeObject::Block | NodeObject::Inline) => {
            let len = m.children(&key)?.len();
            if position > len {
                return Err(position_mismatch(position, len));
            }
            let node_type = match &properties.node_type {
                Some(t) => t.clone(),
                None => m.node_type(&key)?.unwrap_or_default(),
            };
            let data = match &properties.data {
                Some(d) => d.clone(),
                None => m.data(&key)?,
            };
            let element = Element {
                key: new_key.clone(),
                node_type,
                data,
                nodes: Vec::new(),
            };
            if object == NodeObject::Block {
                Node::Block(element)
            } else {
                Node::Inline(element)
            }
        }
        NodeObject::Document => {
            return Err(CrdtError::UnexpectedShape {
                key: key.as_str().into(),
                expected: "a splittable node",
            });
        }
    };
    m.create_node(&fresh)?;
    m.move_tail(&key, position, new_key)?;
    m.insert_child(&parent, index + 1, new_key)
}

fn position_mismatch(position: usize, len: usize) -> CrdtError {
    CrdtError::InvalidEdit(format!("position {position} does not match length {len}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActorId;
    use crate::translate::resync_from_document;
    use tandem_editor_core::{Document, Leaf, Mark, MarkSet, Value};

    fn two_paragraphs() -> Value {
        Value::new(Document::new(vec![
            Node::Block(Element::new("p1", "paragraph", vec![Node::Text(Text::plain("t1", "Hello"))])),
            Node::Block(Element::new("p2", "paragraph", vec![Node::Text(Text::plain("t2", "World"))])),
        ]))
    }

    /// Applying a batch to the document and resyncing must equal applying
    /// it to the editor tree directly.
    fn assert_fidelity(value: &Value, ops: &[Operation]) -> CrdtDocument {
        let doc = CrdtDocument::from_value(ActorId(1), value).unwrap();
        let changed = apply_editor_ops(&doc, ops).unwrap().unwrap();
        let mut expected = value.clone();
        expected.apply_batch(ops).unwrap();
        assert_eq!(resync_from_document(&changed).unwrap().document, expected.document);
        changed
    }

    #[test]
    fn test_insert_and_remove_text() {
        assert_fidelity(
            &two_paragraphs(),
            &[
                Operation::insert_text(vec![0, 0], 5, " there"),
                Operation::remove_text(vec![1, 0], 0, "Wor"),
            ],
        );
    }

    #[test]
    fn test_merge_then_insert_lands_after_merge_point() {
        let doc = assert_fidelity(
            &two_paragraphs(),
            &[
                Operation::MergeNode {
                    path: vec![1],
                    position: 1,
                },
                Operation::MergeNode {
                    path: vec![0, 1],
                    position: 5,
                },
                Operation::insert_text(vec![0, 0], 5, "X"),
            ],
        );
        assert_eq!(doc.value().unwrap().plain_text(), "HelloXWorld");
    }

    #[test]
    fn test_split_paragraph() {
        assert_fidelity(
            &two_paragraphs(),
            &[
                Operation::SplitNode {
                    path: vec![0, 0],
                    position: 2,
                    new_key: NodeKey::from("a:0"),
                    properties: NodeProperties::default(),
                },
                Operation::SplitNode {
                    path: vec![0],
                    position: 1,
                    new_key: NodeKey::from("a:1"),
                    properties: NodeProperties::default(),
                },
                Operation::insert_text(vec![1, 0], 0, ">"),
            ],
        );
    }

    #[test]
    fn test_insert_node_and_move() {
        assert_fidelity(
            &two_paragraphs(),
            &[
                Operation::InsertNode {
                    path: vec![2],
                    node: Node::Block(Element::new(
                        "h",
                        "heading",
                        vec![Node::Text(Text::new(
                            "ht",
                            vec![Leaf::with_marks("Title", [Mark::new("bold")])],
                        ))],
                    )),
                },
                Operation::MoveNode {
                    path: vec![2],
                    new_path: vec![0],
                },
                Operation::RemoveNode { path: vec![2] },
            ],
        );
    }

    #[test]
    fn test_marks_and_set_node() {
        assert_fidelity(
            &two_paragraphs(),
            &[
                Operation::add_mark(vec![0, 0], 0, 5, "bold"),
                Operation::InsertText {
                    path: vec![0, 0],
                    offset: 5,
                    text: "!".into(),
                    marks: MarkSet::new(),
                },
                Operation::RemoveMark {
                    path: vec![0, 0],
                    offset: 1,
                    length: 2,
                    mark: Mark::new("bold"),
                },
                Operation::SetNode {
                    path: vec![1],
                    properties: NodeProperties {
                        node_type: Some("heading".into()),
                        data: None,
                    },
                },
            ],
        );
    }

    #[test]
    fn test_bad_path_names_the_operation() {
        let doc = CrdtDocument::from_value(ActorId(1), &two_paragraphs()).unwrap();
        let err = apply_editor_ops(
            &doc,
            &[
                Operation::insert_text(vec![0, 0], 0, "ok"),
                Operation::RemoveNode { path: vec![5] },
            ],
        )
        .unwrap_err();
        match err {
            CrdtError::Translation(e) => {
                assert_eq!(e.index, 1);
                assert_eq!(e.operation, "remove_node");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(doc.value().unwrap(), two_paragraphs().document);
    }

    #[test]
    fn test_split_at_merge_point_hands_back_the_part() {
        let doc = assert_fidelity(
            &two_paragraphs(),
            &[
                Operation::MergeNode {
                    path: vec![1],
                    position: 1,
                },
                Operation::MergeNode {
                    path: vec![0, 1],
                    position: 5,
                },
                Operation::SplitNode {
                    path: vec![0, 0],
                    position: 5,
                    new_key: NodeKey::from("a:0"),
                    properties: NodeProperties::default(),
                },
            ],
        );
        let tree = crate::layout::Tree::new(doc.doc());
        let parts = |key: &str| {
            let record = tree.record(key).unwrap();
            crate::layout::list_entries(&tree.parts(&record).unwrap())
        };
        assert_eq!(parts("t1"), vec![Some("t1".to_string())]);
        assert_eq!(parts("a:0"), vec![Some("a:0".to_string()), Some("t2".to_string())]);
        assert_eq!(tree.text("a:0").unwrap().len_unicode(), 0);
    }

    #[test]
    fn test_insert_node_with_taken_key_is_rejected() {
        let doc = CrdtDocument::from_value(ActorId(1), &two_paragraphs()).unwrap();
        let err = apply_editor_ops(
            &doc,
            &[Operation::InsertNode {
                path: vec![0, 1],
                node: Node::Text(Text::plain("t2", "again")),
            }],
        )
        .unwrap_err();
        match err {
            CrdtError::Translation(e) => {
                assert_eq!(e.index, 0);
                assert_eq!(e.operation, "insert_node");
                assert!(e.reason.contains("t2"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(doc.value().unwrap(), two_paragraphs().document);
    }

    #[test]
    fn test_huge_offset_fails_translation() {
        let doc = CrdtDocument::from_value(ActorId(1), &two_paragraphs()).unwrap();
        let err = apply_editor_ops(&doc, &[Operation::add_mark(vec![0, 0], usize::MAX, 2, "bold")])
            .unwrap_err();
        assert!(matches!(err, CrdtError::Translation(e) if e.operation == "add_mark"));
    }

    #[test]
    fn test_selection_only_batch_changes_nothing() {
        let doc = CrdtDocument::from_value(ActorId(1), &two_paragraphs()).unwrap();
        let result = apply_editor_ops(&doc, &[Operation::SetSelection { selection: None }]).unwrap();
        assert!(result.is_none());
    }
}
