//! Core editor types: node keys, marks, leaves, selection and key minting.
//!
//! These types are shared by the editor tree and by anything that mirrors
//! it (the CRDT side keeps node keys and leaves in the same shape).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

/// Path to a node: child indices walked from the document root.
///
/// The empty path addresses the document itself.
pub type Path = Vec<usize>;

/// Element properties (Slate's `data`), keyed by property name.
pub type Props = BTreeMap<SmolStr, serde_json::Value>;

/// Set of marks applied to a run of text.
pub type MarkSet = BTreeSet<Mark>;

/// Stable identity of a node, shared between the editor tree and the CRDT.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(SmolStr);

impl NodeKey {
    pub fn new(key: impl Into<SmolStr>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Keys are empty only for nodes parsed from JSON that carried none.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(s: &str) -> Self {
        Self(SmolStr::new(s))
    }
}

impl From<String> for NodeKey {
    fn from(s: String) -> Self {
        Self(SmolStr::from(s))
    }
}

impl From<SmolStr> for NodeKey {
    fn from(s: SmolStr) -> Self {
        Self(s)
    }
}

impl AsRef<str> for NodeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A formatting mark such as `bold` or `italic`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub mark_type: SmolStr,
}

impl Mark {
    pub fn new(mark_type: impl Into<SmolStr>) -> Self {
        Self {
            mark_type: mark_type.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.mark_type
    }
}

/// A run of text sharing one set of marks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    pub text: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub marks: MarkSet,
}

impl Leaf {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marks: MarkSet::new(),
        }
    }

    pub fn with_marks(text: impl Into<String>, marks: impl IntoIterator<Item = Mark>) -> Self {
        Self {
            text: text.into(),
            marks: marks.into_iter().collect(),
        }
    }

    /// Length in characters (NOT bytes).
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Bring leaves into canonical form.
///
/// Empty leaves are dropped and neighbours with identical marks are joined.
/// Empty text is represented by exactly one empty, unmarked leaf, so two
/// texts with the same characters and marks always compare equal.
pub fn normalize_leaves(leaves: Vec<Leaf>) -> Vec<Leaf> {
    let mut out: Vec<Leaf> = Vec::with_capacity(leaves.len());
    for leaf in leaves {
        if leaf.text.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.marks == leaf.marks => last.text.push_str(&leaf.text),
            _ => out.push(leaf),
        }
    }
    if out.is_empty() {
        out.push(Leaf::default());
    }
    out
}

/// A position inside a text node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub path: Path,
    pub offset: usize,
}

impl Point {
    pub fn new(path: Path, offset: usize) -> Self {
        Self { path, offset }
    }
}

/// Text selection with anchor and focus points.
///
/// The anchor is where the selection started, the focus is where the cursor
/// is now. They may be in any document order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Point,
    pub focus: Point,
}

impl Selection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self { anchor, focus }
    }

    /// Create a collapsed selection (cursor position).
    pub fn collapsed(point: Point) -> Self {
        Self {
            anchor: point.clone(),
            focus: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}

/// Mints node keys that are unique across replicas.
///
/// Keys are `"<prefix>:<n>"`; each replica uses its own prefix (its actor
/// id), so keys created concurrently on different replicas never collide.
#[derive(Clone, Debug)]
pub struct KeyGenerator {
    prefix: SmolStr,
    next: u64,
}

impl KeyGenerator {
    pub fn new(prefix: impl Into<SmolStr>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn next_key(&mut self) -> NodeKey {
        let key = format_smolstr!("{}:{}", self.prefix, self.next);
        self.next += 1;
        NodeKey(key)
    }

    /// Skip past `key` if this generator could have minted it, so a
    /// replica resuming from a saved document never reuses one of its
    /// own keys.
    pub fn observe(&mut self, key: &NodeKey) {
        let Some((prefix, n)) = key.as_str().rsplit_once(':') else {
            return;
        };
        if prefix != self.prefix {
            return;
        }
        if let Ok(n) = n.parse::<u64>() {
            self.next = self.next.max(n.saturating_add(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_joins_equal_marks() {
        let bold = Mark::new("bold");
        let leaves = vec![
            Leaf::with_marks("He", [bold.clone()]),
            Leaf::with_marks("llo", [bold.clone()]),
            Leaf::new(""),
            Leaf::new(" world"),
        ];
        let normalized = normalize_leaves(leaves);
        assert_eq!(
            normalized,
            vec![Leaf::with_marks("Hello", [bold]), Leaf::new(" world")]
        );
    }

    #[test]
    fn test_normalize_empty_text_keeps_one_leaf() {
        assert_eq!(normalize_leaves(vec![]), vec![Leaf::default()]);
        assert_eq!(
            normalize_leaves(vec![Leaf::with_marks("", [Mark::new("bold")])]),
            vec![Leaf::default()]
        );
    }

    #[test]
    fn test_leaf_len_counts_chars() {
        assert_eq!(Leaf::new("héllo").len(), 5);
    }

    #[test]
    fn test_key_generator_sequence() {
        let mut keys = KeyGenerator::new("7");
        assert_eq!(keys.next_key().as_str(), "7:0");
        assert_eq!(keys.next_key().as_str(), "7:1");
    }

    #[test]
    fn test_key_generator_skips_observed_keys() {
        let mut keys = KeyGenerator::new("7");
        keys.observe(&NodeKey::from("7:4"));
        keys.observe(&NodeKey::from("7:2"));
        keys.observe(&NodeKey::from("17:9"));
        keys.observe(&NodeKey::from("7:x"));
        keys.observe(&NodeKey::from("paragraph"));
        assert_eq!(keys.next_key().as_str(), "7:5");
    }

    #[test]
    fn test_selection_collapsed() {
        let point = Point::new(vec![0, 0], 3);
        assert!(Selection::collapsed(point.clone()).is_collapsed());
        assert!(!Selection::new(point, Point::new(vec![0, 0], 4)).is_collapsed());
    }
}
