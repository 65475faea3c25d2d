//! How the editor tree is laid out inside a Loro document.
//!
//! ```text
//! meta:  { root: "<root key>" }
//! nodes: { "<key>": { object, type, data: { name: "<json>" }, parts: ["<part>", ..] } }
//! lists: { "<part>": ["<child key>", ..] }
//! texts: { "<part>": LoroText }
//! ```
//!
//! A node's children, or its characters, are the concatenation of its
//! parts. A part is named after the node that created it. Merging hands the
//! merged node's part ids to its sibling and splitting hands the trailing
//! ones to the new node, so edits made concurrently inside a part are never
//! stranded in an unreachable container. Removed nodes keep their record in
//! `nodes` and simply become unreachable.

use std::collections::HashSet;

use loro::{Container, LoroDoc, LoroList, LoroMap, LoroText, ToJson, ValueOrContainer};
use smol_str::SmolStr;
use tandem_editor_core::{
    DOCUMENT_KEY, Document, Element, Leaf, Mark, MarkSet, Node, NodeKey, Props, Text,
    normalize_leaves,
};

use crate::CrdtError;

pub(crate) const META: &str = "meta";
pub(crate) const NODES: &str = "nodes";
pub(crate) const LISTS: &str = "lists";
pub(crate) const TEXTS: &str = "texts";
pub(crate) const ROOT: &str = "root";
pub(crate) const OBJECT: &str = "object";
pub(crate) const TYPE: &str = "type";
pub(crate) const DATA: &str = "data";
pub(crate) const PARTS: &str = "parts";

/// The kind of a node record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeObject {
    Document,
    Block,
    Inline,
    Text,
}

impl NodeObject {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeObject::Document => "document",
            NodeObject::Block => "block",
            NodeObject::Inline => "inline",
            NodeObject::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(NodeObject::Document),
            "block" => Some(NodeObject::Block),
            "inline" => Some(NodeObject::Inline),
            "text" => Some(NodeObject::Text),
            _ => None,
        }
    }

    pub fn of(node: &Node) -> Self {
        match node {
            Node::Block(_) => NodeObject::Block,
            Node::Inline(_) => NodeObject::Inline,
            Node::Text(_) => NodeObject::Text,
        }
    }

    /// True for nodes that hold a child list.
    pub fn is_container(self) -> bool {
        !matches!(self, NodeObject::Text)
    }
}

pub(crate) fn read_string(value: Option<ValueOrContainer>) -> Option<String> {
    let value = value?;
    let loro_value = value.as_value()?;
    loro_value.as_string().map(|s| s.to_string())
}

fn map_entry(map: &LoroMap, key: &str) -> Option<LoroMap> {
    match map.get(key) {
        Some(ValueOrContainer::Container(Container::Map(map))) => Some(map),
        _ => None,
    }
}

fn list_entry(map: &LoroMap, key: &str) -> Option<LoroList> {
    match map.get(key) {
        Some(ValueOrContainer::Container(Container::List(list))) => Some(list),
        _ => None,
    }
}

fn text_entry(map: &LoroMap, key: &str) -> Option<LoroText> {
    match map.get(key) {
        Some(ValueOrContainer::Container(Container::Text(text))) => Some(text),
        _ => None,
    }
}

pub(crate) fn object_of(map: &LoroMap) -> Option<NodeObject> {
    read_string(map.get(OBJECT)).and_then(|s| NodeObject::parse(&s))
}

/// Strings stored in a list, in order. Entries that are not strings come
/// back as `None` so callers can keep raw indices aligned.
pub(crate) fn list_entries(list: &LoroList) -> Vec<Option<String>> {
    (0..list.len()).map(|i| read_string(list.get(i))).collect()
}

/// Handles on the four root containers.
#[derive(Clone)]
pub(crate) struct Tree {
    meta: LoroMap,
    nodes: LoroMap,
    lists: LoroMap,
    texts: LoroMap,
}

impl Tree {
    pub(crate) fn new(doc: &LoroDoc) -> Self {
        Self {
            meta: doc.get_map(META),
            nodes: doc.get_map(NODES),
            lists: doc.get_map(LISTS),
            texts: doc.get_map(TEXTS),
        }
    }

    pub(crate) fn root_key(&self) -> Option<String> {
        read_string(self.meta.get(ROOT))
    }

    pub(crate) fn record(&self, key: &str) -> Option<LoroMap> {
        map_entry(&self.nodes, key)
    }

    /// Child-key part of a container node.
    pub(crate) fn list(&self, part: &str) -> Option<LoroList> {
        list_entry(&self.lists, part)
    }

    /// Character part of a text node.
    pub(crate) fn text(&self, part: &str) -> Option<LoroText> {
        text_entry(&self.texts, part)
    }

    pub(crate) fn parts(&self, record: &LoroMap) -> Option<LoroList> {
        list_entry(record, PARTS)
    }

    pub(crate) fn data(&self, record: &LoroMap) -> Option<LoroMap> {
        map_entry(record, DATA)
    }

    /// True when `key` names a record or a part.
    pub(crate) fn is_taken(&self, key: &str) -> bool {
        self.nodes.get(key).is_some() || self.lists.get(key).is_some() || self.texts.get(key).is_some()
    }

    /// Every key that has a record, reachable or not.
    pub(crate) fn node_keys(&self) -> Vec<NodeKey> {
        let mut keys = Vec::with_capacity(self.nodes.len());
        self.nodes.for_each(|key, _| keys.push(NodeKey::from(key)));
        keys
    }

    /// Create a record with an empty data map and one empty part named
    /// after the node. A key already in use is rejected.
    pub(crate) fn create_record(&self, key: &str, object: NodeObject) -> Result<LoroMap, CrdtError> {
        if key.is_empty() {
            return Err(CrdtError::NodeNotFound("<empty key>".into()));
        }
        if self.is_taken(key) {
            return Err(CrdtError::DuplicateKey(SmolStr::new(key)));
        }
        let record = self.nodes.insert_container(key, LoroMap::new())?;
        record.insert(OBJECT, object.as_str())?;
        record.insert_container(DATA, LoroMap::new())?;
        let parts = record.insert_container(PARTS, LoroList::new())?;
        self.create_part(key, object)?;
        parts.push(key)?;
        Ok(record)
    }

    /// Create an empty part of the kind `object` stores its content in.
    pub(crate) fn create_part(&self, part: &str, object: NodeObject) -> Result<(), CrdtError> {
        if object.is_container() {
            self.lists.insert_container(part, LoroList::new())?;
        } else {
            self.texts.insert_container(part, LoroText::new())?;
        }
        Ok(())
    }

    pub(crate) fn set_root(&self, key: &str) -> Result<(), CrdtError> {
        self.meta.insert(ROOT, key)?;
        Ok(())
    }
}

/// Nodes and parts already claimed by a depth-first walk from the root.
///
/// The projection and the purge share it, so both skip the same entries: a
/// repeated node key (concurrent moves, or a cycle), a repeated part id
/// (concurrent merges), and entries whose record or part is missing.
pub(crate) struct Walk {
    nodes: HashSet<String>,
    parts: HashSet<String>,
}

/// The parts of one record, split into those the walk reads and the raw
/// indices of those it skips.
pub(crate) struct Claimed {
    pub live: Vec<String>,
    pub stale: Vec<usize>,
}

impl Walk {
    pub(crate) fn new(root: &str) -> Self {
        Self {
            nodes: HashSet::from([root.to_string()]),
            parts: HashSet::new(),
        }
    }

    pub(crate) fn claim_parts(&mut self, tree: &Tree, record: &LoroMap, object: NodeObject) -> Claimed {
        let mut claimed = Claimed {
            live: Vec::new(),
            stale: Vec::new(),
        };
        let Some(parts) = tree.parts(record) else {
            return claimed;
        };
        for (i, entry) in list_entries(&parts).into_iter().enumerate() {
            let live = entry.filter(|part| {
                !self.parts.contains(part)
                    && if object.is_container() {
                        tree.list(part).is_some()
                    } else {
                        tree.text(part).is_some()
                    }
            });
            match live {
                Some(part) => {
                    self.parts.insert(part.clone());
                    claimed.live.push(part);
                }
                None => claimed.stale.push(i),
            }
        }
        claimed
    }

    /// Claim a child entry, returning its record when the walk shows it.
    pub(crate) fn claim_child(&mut self, tree: &Tree, entry: Option<String>) -> Option<(String, LoroMap)> {
        let key = entry?;
        if self.nodes.contains(&key) {
            tracing::trace!(%key, "skipping repeated child");
            return None;
        }
        let Some(record) = tree.record(&key) else {
            tracing::trace!(%key, "skipping child without record");
            return None;
        };
        self.nodes.insert(key.clone());
        Some((key, record))
    }
}

pub(crate) fn read_data(tree: &Tree, record: &LoroMap) -> Props {
    let mut props = Props::new();
    let Some(data) = tree.data(record) else {
        return props;
    };
    if let serde_json::Value::Object(entries) = data.get_value().to_json_value() {
        for (name, raw) in entries {
            let value = match raw {
                serde_json::Value::String(encoded) => {
                    serde_json::from_str(&encoded).unwrap_or(serde_json::Value::String(encoded))
                }
                serde_json::Value::Null => continue,
                other => other,
            };
            props.insert(name.into(), value);
        }
    }
    props
}

/// Leaves of a text container, read from its rich-text delta.
pub(crate) fn read_leaves(text: &LoroText) -> Vec<Leaf> {
    let mut leaves = Vec::new();
    if let serde_json::Value::Array(spans) = text.get_richtext_value().to_json_value() {
        for span in spans {
            let Some(insert) = span.get("insert").and_then(|v| v.as_str()) else {
                continue;
            };
            let marks = span
                .get("attributes")
                .and_then(|a| a.as_object())
                .map(|attrs| {
                    attrs
                        .iter()
                        .filter(|(_, v)| !v.is_null() && v.as_bool() != Some(false))
                        .map(|(name, _)| Mark::new(name.as_str()))
                        .collect()
                })
                .unwrap_or_default();
            leaves.push(Leaf {
                text: insert.to_string(),
                marks,
            });
        }
    }
    normalize_leaves(leaves)
}

/// Project the Loro document into an editor document.
///
/// A document without a root projects to an empty document.
pub(crate) fn read_document(doc: &LoroDoc) -> Result<Document, CrdtError> {
    let tree = Tree::new(doc);
    let Some(root) = tree.root_key() else {
        return Ok(Document::empty(DOCUMENT_KEY));
    };
    let record = tree
        .record(&root)
        .ok_or_else(|| CrdtError::CorruptDocument(format!("root node {root} has no record")))?;
    if object_of(&record) != Some(NodeObject::Document) {
        return Err(CrdtError::CorruptDocument(format!(
            "root node {root} is not a document"
        )));
    }
    let mut walk = Walk::new(&root);
    let children = read_children(&tree, &record, &mut walk)?;
    Ok(Document {
        key: NodeKey::from(root),
        data: read_data(&tree, &record),
        nodes: children,
    })
}

fn read_children(tree: &Tree, record: &LoroMap, walk: &mut Walk) -> Result<Vec<Node>, CrdtError> {
    let mut out = Vec::new();
    for part in walk.claim_parts(tree, record, NodeObject::Block).live {
        let Some(list) = tree.list(&part) else {
            continue;
        };
        for entry in list_entries(&list) {
            if let Some((key, child)) = walk.claim_child(tree, entry) {
                out.push(read_node(tree, key, &child, walk)?);
            }
        }
    }
    Ok(out)
}

fn read_node(tree: &Tree, key: String, record: &LoroMap, walk: &mut Walk) -> Result<Node, CrdtError> {
    let object = object_of(record)
        .ok_or_else(|| CrdtError::CorruptDocument(format!("node {key} has no valid object")))?;
    match object {
        NodeObject::Text => {
            let leaves = walk
                .claim_parts(tree, record, object)
                .live
                .iter()
                .filter_map(|part| tree.text(part))
                .flat_map(|text| read_leaves(&text))
                .collect();
            Ok(Node::Text(Text {
                key: NodeKey::from(key),
                leaves: normalize_leaves(leaves),
            }))
        }
        NodeObject::Block | NodeObject::Inline => {
            let element = Element {
                node_type: read_string(record.get(TYPE)).unwrap_or_default().into(),
                data: read_data(tree, record),
                nodes: read_children(tree, record, walk)?,
                key: NodeKey::from(key),
            };
            Ok(if object == NodeObject::Block {
                Node::Block(element)
            } else {
                Node::Inline(element)
            })
        }
        NodeObject::Document => Err(CrdtError::CorruptDocument(format!(
            "node {key} is a nested document"
        ))),
    }
}

/// Write a node record (and its descendants).
///
/// The node is not attached to any parent.
pub(crate) fn write_node(tree: &Tree, node: &Node) -> Result<(), CrdtError> {
    let key = node.key().as_str();
    let object = NodeObject::of(node);
    let record = tree.create_record(key, object)?;
    match node {
        Node::Text(text) => {
            if let Some(part) = tree.text(key) {
                write_leaves(&part, 0, &text.leaves)?;
            }
        }
        Node::Block(element) | Node::Inline(element) => {
            record.insert(TYPE, element.node_type.as_str())?;
            write_data(tree, key, &record, &element.data)?;
            write_children(tree, key, &element.nodes)?;
        }
    }
    Ok(())
}

fn write_children(tree: &Tree, part: &str, children: &[Node]) -> Result<(), CrdtError> {
    let Some(list) = tree.list(part) else {
        return Err(CrdtError::NodeNotFound(SmolStr::new(part)));
    };
    for child in children {
        write_node(tree, child)?;
        list.push(child.key().as_str())?;
    }
    Ok(())
}

/// Write the document root record and point `meta.root` at it.
pub(crate) fn write_root(doc: &LoroDoc, document: &Document) -> Result<(), CrdtError> {
    let tree = Tree::new(doc);
    let key = if document.key.is_empty() {
        DOCUMENT_KEY
    } else {
        document.key.as_str()
    };
    let record = tree.create_record(key, NodeObject::Document)?;
    write_data(&tree, key, &record, &document.data)?;
    write_children(&tree, key, &document.nodes)?;
    tree.set_root(key)
}

pub(crate) fn write_data(tree: &Tree, key: &str, record: &LoroMap, data: &Props) -> Result<(), CrdtError> {
    let container = tree.data(record).ok_or_else(|| CrdtError::UnexpectedShape {
        key: SmolStr::new(key),
        expected: "a node with a data map",
    })?;
    let current = read_data(tree, record);
    for name in current.keys() {
        if !data.contains_key(name) {
            container.delete(name.as_str())?;
        }
    }
    for (name, value) in data {
        if current.get(name) != Some(value) {
            container.insert(name.as_str(), serde_json::to_string(value)?)?;
        }
    }
    Ok(())
}

/// Insert leaves at `offset`, giving each run exactly its own marks.
pub(crate) fn write_leaves(text: &LoroText, offset: usize, leaves: &[Leaf]) -> Result<(), CrdtError> {
    let joined: String = leaves.iter().map(|l| l.text.as_str()).collect();
    if joined.is_empty() {
        return Ok(());
    }
    text.insert(offset, &joined)?;
    let mut start = offset;
    for leaf in leaves {
        let end = start + leaf.len();
        set_run_marks(text, start..end, &leaf.marks)?;
        start = end;
    }
    Ok(())
}

/// Make `range` carry exactly `marks`.
///
/// Text inserted next to a marked run may come back carrying that run's
/// marks, so every written run is pinned explicitly.
pub(crate) fn set_run_marks(
    text: &LoroText,
    range: std::ops::Range<usize>,
    marks: &MarkSet,
) -> Result<(), CrdtError> {
    if range.is_empty() {
        return Ok(());
    }
    let current = marks_in_range(text, range.clone());
    for mark in current.difference(marks) {
        text.unmark(range.clone(), mark.as_str())?;
    }
    for mark in marks {
        text.mark(range.clone(), mark.as_str(), true)?;
    }
    Ok(())
}

/// Union of the marks carried by any character in `range`.
pub(crate) fn marks_in_range(text: &LoroText, range: std::ops::Range<usize>) -> MarkSet {
    let mut out = MarkSet::new();
    let mut pos = 0;
    for leaf in read_leaves(text) {
        let end = pos + leaf.len();
        if end > range.start && pos < range.end {
            out.extend(leaf.marks.iter().cloned());
        }
        pos = end;
    }
    out
}
