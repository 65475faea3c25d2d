//! Structural diff between two projections of a document.
//!
//! Entries are ordered so that applying them one after another to the
//! older tree is always valid: every path is computed against the tree as
//! it stands after the entries before it.
//!
//! Phases:
//! 1. remove subtrees with no surviving node,
//! 2. place children top-down (moves and inserts),
//! 3. remove what is left over,
//! 4. content: properties, text splices and mark runs.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tandem_editor_core::{
    Document, Leaf, Mark, MarkSet, Node, NodeKey, Path, Props, Text, leaves_from_chars,
};

/// One step of a structural diff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffEntry {
    NodeRemoved {
        path: Path,
        key: NodeKey,
    },
    /// `to` is read after the node is removed from `from`.
    NodeMoved {
        key: NodeKey,
        from: Path,
        to: Path,
    },
    NodeInserted {
        path: Path,
        node: Node,
    },
    /// A key changed kind (text/block/inline) or the root was replaced; no
    /// editor operation expresses either.
    KindChanged {
        path: Path,
        key: NodeKey,
    },
    PropertiesChanged {
        path: Path,
        key: NodeKey,
        node_type: Option<SmolStr>,
        data: Option<Props>,
    },
    TextSpliced {
        path: Path,
        key: NodeKey,
        offset: usize,
        removed: String,
        inserted: Vec<Leaf>,
    },
    MarkAdded {
        path: Path,
        key: NodeKey,
        offset: usize,
        length: usize,
        mark: Mark,
    },
    MarkRemoved {
        path: Path,
        key: NodeKey,
        offset: usize,
        length: usize,
        mark: Mark,
    },
}

impl DiffEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            DiffEntry::NodeRemoved { .. } => "node_removed",
            DiffEntry::NodeMoved { .. } => "node_moved",
            DiffEntry::NodeInserted { .. } => "node_inserted",
            DiffEntry::KindChanged { .. } => "kind_changed",
            DiffEntry::PropertiesChanged { .. } => "properties_changed",
            DiffEntry::TextSpliced { .. } => "text_spliced",
            DiffEntry::MarkAdded { .. } => "mark_added",
            DiffEntry::MarkRemoved { .. } => "mark_removed",
        }
    }
}

/// Ordered list of diff entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diff(Vec<DiffEntry>);

impl Diff {
    pub fn new(entries: Vec<DiffEntry>) -> Self {
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn entries(&self) -> &[DiffEntry] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiffEntry> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Diff {
    type Item = &'a DiffEntry;
    type IntoIter = std::slice::Iter<'a, DiffEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Slot {
    Root,
    Node(NodeKey),
}

/// Nodes of one projection by key.
struct Index<'a> {
    nodes: HashMap<NodeKey, &'a Node>,
}

impl<'a> Index<'a> {
    fn new(doc: &'a Document) -> Self {
        let mut nodes = HashMap::new();
        doc.walk(|_, node| {
            nodes.insert(node.key().clone(), node);
        });
        Self { nodes }
    }

    fn get(&self, key: &NodeKey) -> Option<&'a Node> {
        self.nodes.get(key).copied()
    }

    fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }
}

/// The tree as it stands while entries are being emitted.
struct Shadow {
    children: HashMap<Slot, Vec<NodeKey>>,
    parents: HashMap<NodeKey, Slot>,
}

impl Shadow {
    fn new(doc: &Document) -> Self {
        let mut shadow = Self {
            children: HashMap::new(),
            parents: HashMap::new(),
        };
        shadow.register(Slot::Root, &doc.nodes);
        shadow
    }

    fn register(&mut self, slot: Slot, nodes: &[Node]) {
        self.children
            .insert(slot.clone(), nodes.iter().map(|n| n.key().clone()).collect());
        for node in nodes {
            self.parents.insert(node.key().clone(), slot.clone());
            if let Some(children) = node.children() {
                self.register(Slot::Node(node.key().clone()), children);
            }
        }
    }

    fn contains(&self, key: &NodeKey) -> bool {
        self.parents.contains_key(key)
    }

    fn children(&self, slot: &Slot) -> &[NodeKey] {
        self.children.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    fn path_of(&self, key: &NodeKey) -> Option<Path> {
        let mut path = Vec::new();
        let mut current = key.clone();
        loop {
            let parent = self.parents.get(&current)?;
            let index = self.children(parent).iter().position(|k| *k == current)?;
            path.push(index);
            match parent {
                Slot::Root => break,
                Slot::Node(p) => current = p.clone(),
            }
        }
        path.reverse();
        Some(path)
    }

    fn detach(&mut self, key: &NodeKey) {
        if let Some(parent) = self.parents.remove(key) {
            if let Some(list) = self.children.get_mut(&parent) {
                list.retain(|k| k != key);
            }
        }
    }

    fn attach(&mut self, key: &NodeKey, slot: &Slot, index: usize) {
        let list = self.children.entry(slot.clone()).or_default();
        let index = index.min(list.len());
        list.insert(index, key.clone());
        self.parents.insert(key.clone(), slot.clone());
    }

    fn remove_subtree(&mut self, key: &NodeKey) {
        self.detach(key);
        let mut stack = vec![key.clone()];
        while let Some(k) = stack.pop() {
            if let Some(children) = self.children.remove(&Slot::Node(k)) {
                for child in children {
                    self.parents.remove(&child);
                    stack.push(child);
                }
            }
        }
    }

    fn insert_subtree(&mut self, node: &Node, slot: &Slot, index: usize) {
        self.attach(node.key(), slot, index);
        if let Some(children) = node.children() {
            self.register(Slot::Node(node.key().clone()), children);
        }
    }
}

/// Compute the entries that turn `before` into `after`.
pub fn diff(before: &Document, after: &Document) -> Diff {
    let old = Index::new(before);
    let new = Index::new(after);
    let mut shadow = Shadow::new(before);
    let mut out = Vec::new();

    // a replaced root has no editor operation either
    if !before.key.is_empty() && before.key != after.key {
        return Diff(vec![DiffEntry::KindChanged {
            path: Vec::new(),
            key: after.key.clone(),
        }]);
    }

    for (key, node) in &new.nodes {
        if let Some(previous) = old.get(key) {
            if previous.object() != node.object() {
                let path = shadow.path_of(key).unwrap_or_default();
                return Diff(vec![DiffEntry::KindChanged {
                    path,
                    key: key.clone(),
                }]);
            }
        }
    }

    // Subtrees nothing survives from.
    let mut dead = Vec::new();
    collect_dead(&before.nodes, &new, &mut dead);
    for key in dead.iter().rev() {
        if let Some(path) = shadow.path_of(key) {
            out.push(DiffEntry::NodeRemoved {
                path,
                key: key.clone(),
            });
            shadow.remove_subtree(key);
        }
    }

    // Place children top-down.
    let mut fresh: HashSet<NodeKey> = HashSet::new();
    let mut queue = VecDeque::from([Slot::Root]);
    while let Some(slot) = queue.pop_front() {
        let target: &[Node] = match &slot {
            Slot::Root => &after.nodes,
            Slot::Node(key) => new.get(key).and_then(Node::children).unwrap_or(&[]),
        };
        for (i, child) in target.iter().enumerate() {
            let key = child.key();
            if shadow.children(&slot).get(i) == Some(key) {
                continue;
            }
            if shadow.contains(key) {
                let Some(from) = shadow.path_of(key) else {
                    continue;
                };
                shadow.detach(key);
                shadow.attach(key, &slot, i);
                let to = shadow.path_of(key).unwrap_or_default();
                out.push(DiffEntry::NodeMoved {
                    key: key.clone(),
                    from,
                    to,
                });
            } else {
                let node = prune(child, &shadow, &mut fresh);
                shadow.insert_subtree(&node, &slot, i);
                let path = shadow.path_of(key).unwrap_or_default();
                out.push(DiffEntry::NodeInserted { path, node });
            }
        }
        for child in target {
            if child.children().is_some() && !fresh.contains(child.key()) {
                queue.push_back(Slot::Node(child.key().clone()));
            }
        }
    }

    // Whatever is still attached but gone from the new tree.
    let mut leftover = Vec::new();
    collect_leftover(&shadow, &Slot::Root, &new, &mut leftover);
    for key in leftover.iter().rev() {
        if let Some(path) = shadow.path_of(key) {
            out.push(DiffEntry::NodeRemoved {
                path,
                key: key.clone(),
            });
            shadow.remove_subtree(key);
        }
    }

    // Content of nodes that exist on both sides.
    if before.data != after.data {
        out.push(DiffEntry::PropertiesChanged {
            path: Vec::new(),
            key: after.key.clone(),
            node_type: None,
            data: Some(after.data.clone()),
        });
    }
    after.walk(|path, node| {
        let Some(previous) = old.get(node.key()) else {
            return;
        };
        match (previous, node) {
            (Node::Text(a), Node::Text(b)) => diff_text(path, a, b, &mut out),
            (Node::Block(a), Node::Block(b)) | (Node::Inline(a), Node::Inline(b)) => {
                let node_type = (a.node_type != b.node_type).then(|| b.node_type.clone());
                let data = (a.data != b.data).then(|| b.data.clone());
                if node_type.is_some() || data.is_some() {
                    out.push(DiffEntry::PropertiesChanged {
                        path: path.clone(),
                        key: b.key.clone(),
                        node_type,
                        data,
                    });
                }
            }
            _ => {}
        }
    });

    Diff(out)
}

/// Collect roots of subtrees in which no node survives into `new`.
///
/// Returns whether anything in `nodes` survives.
fn collect_dead(nodes: &[Node], new: &Index<'_>, out: &mut Vec<NodeKey>) -> bool {
    let mut any = false;
    for node in nodes {
        let mut inner = Vec::new();
        let child_survives = node
            .children()
            .is_some_and(|children| collect_dead(children, new, &mut inner));
        if new.contains(node.key()) || child_survives {
            any = true;
            out.extend(inner);
        } else {
            out.push(node.key().clone());
        }
    }
    any
}

fn collect_leftover(shadow: &Shadow, slot: &Slot, new: &Index<'_>, out: &mut Vec<NodeKey>) {
    for key in shadow.children(slot) {
        if new.contains(key) {
            collect_leftover(shadow, &Slot::Node(key.clone()), new, out);
        } else {
            out.push(key.clone());
        }
    }
}

/// Copy of `node` without descendants that already exist in the shadow
/// tree; those get moved in afterwards. Fully new subtrees are recorded in
/// `fresh`.
fn prune(node: &Node, shadow: &Shadow, fresh: &mut HashSet<NodeKey>) -> Node {
    let mut copy = node.clone();
    let mut complete = true;
    if let (Some(children), Some(copy_children)) = (node.children(), copy.children_mut()) {
        copy_children.clear();
        for child in children {
            if shadow.contains(child.key()) {
                complete = false;
                continue;
            }
            let pruned = prune(child, shadow, fresh);
            if !fresh.contains(child.key()) {
                complete = false;
            }
            copy_children.push(pruned);
        }
    }
    if complete {
        fresh.insert(node.key().clone());
    }
    copy
}

fn diff_text(path: &Path, before: &Text, after: &Text, out: &mut Vec<DiffEntry>) {
    let old = before.chars_with_marks();
    let new = after.chars_with_marks();

    let prefix = old
        .iter()
        .zip(&new)
        .take_while(|(a, b)| a.0 == b.0)
        .count();
    let room = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(room)
        .take_while(|(a, b)| a.0 == b.0)
        .count();

    let removed: String = old[prefix..old.len() - suffix].iter().map(|(c, _)| *c).collect();
    let inserted = new[prefix..new.len() - suffix].to_vec();
    if !removed.is_empty() || !inserted.is_empty() {
        let leaves = if inserted.is_empty() {
            Vec::new()
        } else {
            leaves_from_chars(inserted.clone())
        };
        out.push(DiffEntry::TextSpliced {
            path: path.clone(),
            key: after.key.clone(),
            offset: prefix,
            removed,
            inserted: leaves,
        });
    }

    // Marks as they stand after the splice.
    let current: Vec<&MarkSet> = old[..prefix]
        .iter()
        .chain(inserted.iter())
        .chain(old[old.len() - suffix..].iter())
        .map(|(_, marks)| marks)
        .collect();
    let target: Vec<&MarkSet> = new.iter().map(|(_, marks)| marks).collect();

    let all: BTreeSet<&Mark> = current
        .iter()
        .chain(target.iter())
        .flat_map(|marks| marks.iter())
        .collect();
    for mark in all {
        let has = |set: &[&MarkSet], i: usize| set[i].contains(mark);
        let (current, target) = (current.as_slice(), target.as_slice());
        for (offset, length) in runs(target.len(), |i| has(target, i) && !has(current, i)) {
            out.push(DiffEntry::MarkAdded {
                path: path.clone(),
                key: after.key.clone(),
                offset,
                length,
                mark: mark.clone(),
            });
        }
        for (offset, length) in runs(target.len(), |i| has(current, i) && !has(target, i)) {
            out.push(DiffEntry::MarkRemoved {
                path: path.clone(),
                key: after.key.clone(),
                offset,
                length,
                mark: mark.clone(),
            });
        }
    }
}

/// Maximal runs of indices in `0..len` where `pred` holds.
fn runs(len: usize, pred: impl Fn(usize) -> bool) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = None;
    for i in 0..=len {
        let on = i < len && pred(i);
        match (on, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push((s, i - s));
                start = None;
            }
            _ => {}
        }
    }
    out
}
