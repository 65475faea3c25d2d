//! The rich-text editor tree.
//!
//! The JSON form follows the Slate plain-object layout:
//!
//! ```json
//! { "document": { "nodes": [
//!     { "object": "block", "type": "paragraph", "nodes": [
//!         { "object": "text", "leaves": [{ "text": "Hello", "marks": [{ "type": "bold" }] }] }
//!     ] }
//! ] } }
//! ```

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::EditorError;
use crate::types::{KeyGenerator, Leaf, Mark, MarkSet, NodeKey, Path, Props, Selection, normalize_leaves};

/// Key of the document root in freshly created trees.
pub const DOCUMENT_KEY: &str = "document";

/// A node below the document root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "lowercase")]
pub enum Node {
    Block(Element),
    Inline(Element),
    Text(Text),
}

/// A block or inline element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(default)]
    pub key: NodeKey,
    #[serde(rename = "type")]
    pub node_type: SmolStr,
    #[serde(default, skip_serializing_if = "Props::is_empty")]
    pub data: Props,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// A text node: characters grouped into marked leaves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Text {
    #[serde(default)]
    pub key: NodeKey,
    #[serde(default)]
    pub leaves: Vec<Leaf>,
}

/// The document root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub key: NodeKey,
    #[serde(default, skip_serializing_if = "Props::is_empty")]
    pub data: Props,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// Editor state: the document tree plus the local selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub document: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

impl Element {
    pub fn new(key: impl Into<NodeKey>, node_type: impl Into<SmolStr>, nodes: Vec<Node>) -> Self {
        Self {
            key: key.into(),
            node_type: node_type.into(),
            data: Props::new(),
            nodes,
        }
    }

    pub fn with_data(mut self, data: Props) -> Self {
        self.data = data;
        self
    }
}

impl Text {
    pub fn new(key: impl Into<NodeKey>, leaves: Vec<Leaf>) -> Self {
        Self {
            key: key.into(),
            leaves: normalize_leaves(leaves),
        }
    }

    pub fn plain(key: impl Into<NodeKey>, text: impl Into<String>) -> Self {
        Self::new(key, vec![Leaf::new(text)])
    }

    /// Concatenated text of all leaves.
    pub fn text(&self) -> String {
        self.leaves.iter().map(|l| l.text.as_str()).collect()
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.leaves.iter().map(Leaf::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.iter().all(Leaf::is_empty)
    }

    /// Expand into one `(char, marks)` pair per character.
    pub fn chars_with_marks(&self) -> Vec<(char, MarkSet)> {
        self.leaves
            .iter()
            .flat_map(|leaf| leaf.text.chars().map(move |c| (c, leaf.marks.clone())))
            .collect()
    }

    /// Rebuild canonical leaves from per-character marks.
    pub fn set_chars(&mut self, chars: Vec<(char, MarkSet)>) {
        self.leaves = leaves_from_chars(chars);
    }

    /// Insert `text` at `offset` carrying exactly `marks`.
    ///
    /// Returns `None` when the offset is past the end.
    pub fn insert(&mut self, offset: usize, text: &str, marks: &MarkSet) -> Option<()> {
        let mut chars = self.chars_with_marks();
        if offset > chars.len() {
            return None;
        }
        let inserted = text.chars().map(|c| (c, marks.clone()));
        chars.splice(offset..offset, inserted);
        self.set_chars(chars);
        Some(())
    }

    /// Remove `len` characters at `offset`, returning the removed text.
    pub fn remove(&mut self, offset: usize, len: usize) -> Option<String> {
        let mut chars = self.chars_with_marks();
        let end = offset.checked_add(len)?;
        if end > chars.len() {
            return None;
        }
        let removed: String = chars.drain(offset..end).map(|(c, _)| c).collect();
        self.set_chars(chars);
        Some(removed)
    }

    /// Add or remove `mark` over `offset..offset + len`.
    pub fn set_mark(&mut self, offset: usize, len: usize, mark: &Mark, on: bool) -> Option<()> {
        let mut chars = self.chars_with_marks();
        let end = offset.checked_add(len)?;
        if end > chars.len() {
            return None;
        }
        for (_, marks) in &mut chars[offset..end] {
            if on {
                marks.insert(mark.clone());
            } else {
                marks.remove(mark);
            }
        }
        self.set_chars(chars);
        Some(())
    }

    /// Split at `offset`, keeping the head and returning the tail's leaves.
    pub fn split_off(&mut self, offset: usize) -> Option<Vec<Leaf>> {
        let mut chars = self.chars_with_marks();
        if offset > chars.len() {
            return None;
        }
        let tail = chars.split_off(offset);
        self.set_chars(chars);
        Some(leaves_from_chars(tail))
    }

    /// Append leaves at the end of this text.
    pub fn append(&mut self, leaves: Vec<Leaf>) {
        let mut all = std::mem::take(&mut self.leaves);
        all.extend(leaves);
        self.leaves = normalize_leaves(all);
    }
}

/// Collapse per-character marks into canonical leaves.
pub fn leaves_from_chars(chars: Vec<(char, MarkSet)>) -> Vec<Leaf> {
    let mut leaves: Vec<Leaf> = Vec::new();
    for (c, marks) in chars {
        match leaves.last_mut() {
            Some(last) if last.marks == marks => last.text.push(c),
            _ => leaves.push(Leaf {
                text: c.to_string(),
                marks,
            }),
        }
    }
    normalize_leaves(leaves)
}

impl Node {
    pub fn key(&self) -> &NodeKey {
        match self {
            Node::Block(e) | Node::Inline(e) => &e.key,
            Node::Text(t) => &t.key,
        }
    }

    /// Object name as it appears in the plain-object form.
    pub fn object(&self) -> &'static str {
        match self {
            Node::Block(_) => "block",
            Node::Inline(_) => "inline",
            Node::Text(_) => "text",
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Block(e) | Node::Inline(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Block(e) | Node::Inline(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&Text> {
        match self {
            Node::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut Text> {
        match self {
            Node::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Children of an element, `None` for text nodes.
    pub fn children(&self) -> Option<&[Node]> {
        self.as_element().map(|e| e.nodes.as_slice())
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        self.as_element_mut().map(|e| &mut e.nodes)
    }

    /// Plain text of this node and its descendants.
    pub fn plain_text(&self) -> String {
        match self {
            Node::Text(t) => t.text(),
            Node::Block(e) | Node::Inline(e) => e.nodes.iter().map(Node::plain_text).collect(),
        }
    }

    fn visit<'a>(&'a self, path: &mut Path, f: &mut impl FnMut(&Path, &'a Node)) {
        f(path, self);
        if let Some(children) = self.children() {
            for (i, child) in children.iter().enumerate() {
                path.push(i);
                child.visit(path, f);
                path.pop();
            }
        }
    }

    fn visit_mut(&mut self, f: &mut impl FnMut(&mut Node)) {
        f(self);
        if let Some(children) = self.children_mut() {
            for child in children {
                child.visit_mut(f);
            }
        }
    }
}

impl Document {
    /// An empty document with the given root key.
    pub fn empty(key: impl Into<NodeKey>) -> Self {
        Self {
            key: key.into(),
            data: Props::new(),
            nodes: Vec::new(),
        }
    }

    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            key: NodeKey::from(DOCUMENT_KEY),
            data: Props::new(),
            nodes,
        }
    }

    /// Node at a non-empty path.
    pub fn node(&self, path: &[usize]) -> Option<&Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.nodes.get(*first)?;
        for i in rest {
            node = node.children()?.get(*i)?;
        }
        Some(node)
    }

    pub fn node_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.nodes.get_mut(*first)?;
        for i in rest {
            node = node.children_mut()?.get_mut(*i)?;
        }
        Some(node)
    }

    /// Child list of the container at `path` (the empty path is the root).
    pub fn children_mut(&mut self, path: &[usize]) -> Option<&mut Vec<Node>> {
        if path.is_empty() {
            Some(&mut self.nodes)
        } else {
            self.node_mut(path)?.children_mut()
        }
    }

    pub fn children(&self, path: &[usize]) -> Option<&[Node]> {
        if path.is_empty() {
            Some(&self.nodes)
        } else {
            self.node(path)?.children()
        }
    }

    /// Walk every node in document order with its path.
    pub fn walk<'a>(&'a self, mut f: impl FnMut(&Path, &'a Node)) {
        let mut path = Path::new();
        for (i, node) in self.nodes.iter().enumerate() {
            path.push(i);
            node.visit(&mut path, &mut f);
            path.pop();
        }
    }

    /// Path of the node with `key`, if present.
    pub fn find_path(&self, key: &NodeKey) -> Option<Path> {
        let mut found = None;
        self.walk(|path, node| {
            if found.is_none() && node.key() == key {
                found = Some(path.clone());
            }
        });
        found
    }

    /// Block texts joined with newlines.
    pub fn plain_text(&self) -> String {
        self.nodes
            .iter()
            .map(Node::plain_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn for_each_node_mut(&mut self, mut f: impl FnMut(&mut Node)) {
        for node in &mut self.nodes {
            node.visit_mut(&mut f);
        }
    }
}

impl Value {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            selection: None,
        }
    }

    /// Parse the plain-object JSON form.
    ///
    /// Missing keys are filled from `keys`; leaves are normalized.
    pub fn from_json(json: &str, keys: &mut KeyGenerator) -> Result<Self, EditorError> {
        let mut value: Value = serde_json::from_str(json)?;
        value.assign_missing_keys(keys);
        value.normalize();
        Ok(value)
    }

    pub fn to_json(&self) -> Result<String, EditorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Give every key-less node a fresh key.
    pub fn assign_missing_keys(&mut self, keys: &mut KeyGenerator) {
        if self.document.key.is_empty() {
            self.document.key = NodeKey::from(DOCUMENT_KEY);
        }
        self.document.for_each_node_mut(|node| {
            let key = match node {
                Node::Block(e) | Node::Inline(e) => &mut e.key,
                Node::Text(t) => &mut t.key,
            };
            if key.is_empty() {
                *key = keys.next_key();
            }
        });
    }

    /// Canonicalize every text node's leaves.
    pub fn normalize(&mut self) {
        self.document.for_each_node_mut(|node| {
            if let Node::Text(t) = node {
                t.leaves = normalize_leaves(std::mem::take(&mut t.leaves));
            }
        });
    }

    /// Drop the selection if it no longer points into a text node.
    pub fn validate_selection(&mut self) {
        let valid = match &self.selection {
            None => true,
            Some(sel) => [&sel.anchor, &sel.focus].iter().all(|point| {
                self.document
                    .node(&point.path)
                    .and_then(Node::as_text)
                    .is_some_and(|t| point.offset <= t.len())
            }),
        };
        if !valid {
            tracing::debug!("dropping stale selection");
            self.selection = None;
        }
    }
}
