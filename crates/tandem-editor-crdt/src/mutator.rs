//! Declared mutations on a document inside one change transaction.

use loro::{LoroDoc, LoroList, LoroMap, LoroText};
use smol_str::{SmolStr, format_smolstr};
use tandem_editor_core::{Document, Leaf, Mark, MarkSet, Node, NodeKey, Props, Text};

use crate::CrdtError;
use crate::layout::{
    Claimed, NodeObject, TYPE, Tree, Walk, list_entries, object_of, read_data, read_leaves,
    read_string, write_data, write_leaves, write_node, write_root,
};

/// Handle passed to [`CrdtDocument::change`](crate::CrdtDocument::change).
///
/// Every structural read goes against the live state, so each mutation sees
/// the effect of the ones before it.
pub struct Mutator<'a> {
    doc: &'a LoroDoc,
    tree: Tree,
}

impl<'a> Mutator<'a> {
    pub(crate) fn new(doc: &'a LoroDoc) -> Result<Self, CrdtError> {
        let mutator = Self {
            doc,
            tree: Tree::new(doc),
        };
        let purged = mutator.purge()?;
        if purged > 0 {
            tracing::debug!(purged, "dropped repeated or dangling entries");
        }
        Ok(mutator)
    }

    /// Remove the child and part entries the projection skips, so raw lists
    /// line up with editor paths and offsets.
    fn purge(&self) -> Result<usize, CrdtError> {
        let Some(root) = self.tree.root_key() else {
            return Ok(0);
        };
        let Some(record) = self.tree.record(&root) else {
            return Ok(0);
        };
        let mut walk = Walk::new(&root);
        self.purge_node(&record, NodeObject::Document, &mut walk)
    }

    fn purge_node(&self, record: &LoroMap, object: NodeObject, walk: &mut Walk) -> Result<usize, CrdtError> {
        let Claimed { live, stale } = walk.claim_parts(&self.tree, record, object);
        let mut purged = 0;
        if let Some(parts) = self.tree.parts(record) {
            purged += delete_entries(&parts, &stale)?;
        }
        if !object.is_container() {
            return Ok(purged);
        }
        for part in live {
            let Some(list) = self.tree.list(&part) else {
                continue;
            };
            let mut stale = Vec::new();
            for (i, entry) in list_entries(&list).into_iter().enumerate() {
                match walk.claim_child(&self.tree, entry) {
                    Some((_, child)) => {
                        if let Some(object) = object_of(&child) {
                            purged += self.purge_node(&child, object, walk)?;
                        }
                    }
                    None => stale.push(i),
                }
            }
            purged += delete_entries(&list, &stale)?;
        }
        Ok(purged)
    }

    /// Write the root record for a document that has none yet.
    pub fn init_root(&mut self, document: &Document) -> Result<(), CrdtError> {
        write_root(self.doc, document)
    }

    pub fn root(&self) -> Result<NodeKey, CrdtError> {
        self.tree
            .root_key()
            .map(NodeKey::from)
            .ok_or_else(|| CrdtError::CorruptDocument("document has no root".into()))
    }

    /// Key of the node at `path` (the empty path is the root).
    pub fn resolve(&self, path: &[usize]) -> Result<NodeKey, CrdtError> {
        let mut key = self.root()?;
        for index in path {
            let children = self
                .children(&key)
                .map_err(|_| CrdtError::PathNotFound(path.to_vec()))?;
            key = children
                .get(*index)
                .cloned()
                .ok_or_else(|| CrdtError::PathNotFound(path.to_vec()))?;
        }
        Ok(key)
    }

    /// Split a node path into its parent's key and the child index.
    pub fn resolve_parent(&self, path: &[usize]) -> Result<(NodeKey, usize), CrdtError> {
        let (index, parent) = path
            .split_last()
            .ok_or_else(|| CrdtError::PathNotFound(path.to_vec()))?;
        Ok((self.resolve(parent)?, *index))
    }

    fn node(&self, key: &NodeKey) -> Result<LoroMap, CrdtError> {
        self.tree
            .record(key.as_str())
            .ok_or_else(|| CrdtError::NodeNotFound(key_str(key)))
    }

    fn parts(&self, key: &NodeKey) -> Result<LoroList, CrdtError> {
        self.tree
            .parts(&self.node(key)?)
            .ok_or_else(|| unexpected(key, "a node with parts"))
    }

    /// Raw part ids of `key`, after checking it stores the expected content.
    fn part_ids(&self, key: &NodeKey, container: bool) -> Result<Vec<Option<String>>, CrdtError> {
        let map = self.node(key)?;
        let object = object_of(&map);
        if container && !object.is_some_and(NodeObject::is_container) {
            return Err(unexpected(key, "an element"));
        }
        if !container && object != Some(NodeObject::Text) {
            return Err(unexpected(key, "a text node"));
        }
        Ok(self
            .tree
            .parts(&map)
            .map(|parts| list_entries(&parts))
            .unwrap_or_default())
    }

    fn text_parts(&self, key: &NodeKey) -> Result<Vec<LoroText>, CrdtError> {
        Ok(self
            .part_ids(key, false)?
            .into_iter()
            .flatten()
            .filter_map(|part| self.tree.text(&part))
            .collect())
    }

    fn list_parts(&self, key: &NodeKey) -> Result<Vec<LoroList>, CrdtError> {
        Ok(self
            .part_ids(key, true)?
            .into_iter()
            .flatten()
            .filter_map(|part| self.tree.list(&part))
            .collect())
    }

    /// Give `key` a new empty part, for a node whose parts all went to
    /// other nodes.
    fn fresh_part(&mut self, key: &NodeKey, object: NodeObject) -> Result<SmolStr, CrdtError> {
        let peer = self.doc.peer_id();
        let mut n = self.doc.len_ops();
        let mut part = format_smolstr!("{key}.{peer:x}.{n}");
        while self.tree.is_taken(&part) {
            n += 1;
            part = format_smolstr!("{key}.{peer:x}.{n}");
        }
        self.tree.create_part(&part, object)?;
        self.parts(key)?.push(part.as_str())?;
        Ok(part)
    }

    pub fn object(&self, key: &NodeKey) -> Result<NodeObject, CrdtError> {
        object_of(&self.node(key)?).ok_or_else(|| unexpected(key, "a typed node"))
    }

    pub fn node_type(&self, key: &NodeKey) -> Result<Option<SmolStr>, CrdtError> {
        Ok(read_string(self.node(key)?.get(TYPE)).map(SmolStr::from))
    }

    pub fn data(&self, key: &NodeKey) -> Result<Props, CrdtError> {
        Ok(read_data(&self.tree, &self.node(key)?))
    }

    pub fn children(&self, key: &NodeKey) -> Result<Vec<NodeKey>, CrdtError> {
        Ok(self
            .list_parts(key)?
            .iter()
            .flat_map(list_entries)
            .flatten()
            .map(NodeKey::from)
            .collect())
    }

    pub fn leaves(&self, key: &NodeKey) -> Result<Vec<Leaf>, CrdtError> {
        let leaves = self
            .text_parts(key)?
            .iter()
            .flat_map(read_leaves)
            .collect();
        Ok(tandem_editor_core::normalize_leaves(leaves))
    }

    pub fn text_len(&self, key: &NodeKey) -> Result<usize, CrdtError> {
        Ok(self.text_parts(key)?.iter().map(LoroText::len_unicode).sum())
    }

    /// Text parts of `key`, after checking `offset..end` fits inside them.
    fn check_range(&self, key: &NodeKey, offset: usize, end: usize) -> Result<Vec<LoroText>, CrdtError> {
        let parts = self.text_parts(key)?;
        let len = parts.iter().map(LoroText::len_unicode).sum::<usize>();
        if offset > end || end > len {
            return Err(CrdtError::OffsetOutOfRange {
                key: key_str(key),
                offset,
                end,
                len,
            });
        }
        Ok(parts)
    }

    /// Insert `text` at `offset`; the inserted run carries exactly `marks`.
    pub fn insert_text(
        &mut self,
        key: &NodeKey,
        offset: usize,
        text: &str,
        marks: &MarkSet,
    ) -> Result<(), CrdtError> {
        let parts = self.check_range(key, offset, offset)?;
        let lens: Vec<usize> = parts.iter().map(LoroText::len_unicode).collect();
        let (part, local) = match locate(&lens, offset) {
            Some((i, local)) => (parts[i].clone(), local),
            None => {
                let part = self.fresh_part(key, NodeObject::Text)?;
                let text = self.tree.text(&part).ok_or_else(|| CrdtError::NodeNotFound(part))?;
                (text, 0)
            }
        };
        let leaf = Leaf {
            text: text.to_string(),
            marks: marks.clone(),
        };
        write_leaves(&part, local, &[leaf])
    }

    /// Remove `len` characters at `offset`, returning the removed text.
    pub fn remove_text(&mut self, key: &NodeKey, offset: usize, len: usize) -> Result<String, CrdtError> {
        let end = offset.saturating_add(len);
        let parts = self.check_range(key, offset, end)?;
        let mut removed = String::new();
        for (part, range) in overlaps(&parts, offset, end) {
            removed.push_str(&part.slice(range.start, range.end)?);
            part.delete(range.start, range.len())?;
        }
        Ok(removed)
    }

    pub fn set_mark(
        &mut self,
        key: &NodeKey,
        offset: usize,
        len: usize,
        mark: &Mark,
        on: bool,
    ) -> Result<(), CrdtError> {
        let end = offset.saturating_add(len);
        let parts = self.check_range(key, offset, end)?;
        for (part, range) in overlaps(&parts, offset, end) {
            if on {
                part.mark(range, mark.as_str(), true)?;
            } else {
                part.unmark(range, mark.as_str())?;
            }
        }
        Ok(())
    }

    /// Create the record for `node` and its descendants, unattached.
    ///
    /// Fails with [`CrdtError::DuplicateKey`] when any of the keys is taken.
    pub fn create_node(&mut self, node: &Node) -> Result<(), CrdtError> {
        write_node(&self.tree, node)
    }

    pub fn insert_child(&mut self, parent: &NodeKey, index: usize, child: &NodeKey) -> Result<(), CrdtError> {
        let parts = self.list_parts(parent)?;
        let lens: Vec<usize> = parts.iter().map(LoroList::len).collect();
        if index > lens.iter().sum::<usize>() {
            return Err(CrdtError::PathNotFound(vec![index]));
        }
        match locate(&lens, index) {
            Some((i, local)) => parts[i].insert(local, child.as_str())?,
            None => {
                let part = self.fresh_part(parent, NodeObject::Block)?;
                self.tree
                    .list(&part)
                    .ok_or_else(|| CrdtError::NodeNotFound(part))?
                    .push(child.as_str())?;
            }
        }
        Ok(())
    }

    /// Detach the child at `index`; its record stays behind unreachable.
    pub fn remove_child(&mut self, parent: &NodeKey, index: usize) -> Result<NodeKey, CrdtError> {
        let mut start = 0;
        for list in self.list_parts(parent)? {
            let len = list.len();
            if index < start + len {
                let local = index - start;
                let key = read_string(list.get(local))
                    .map(NodeKey::from)
                    .ok_or_else(|| CrdtError::PathNotFound(vec![index]))?;
                list.delete(local, 1)?;
                return Ok(key);
            }
            start += len;
        }
        Err(CrdtError::PathNotFound(vec![index]))
    }

    /// Append the parts of `from` to `into`, leaving `from` with none.
    ///
    /// Content is not copied, so an edit made concurrently inside one of
    /// the moved parts shows up in `into`.
    pub fn adopt_parts(&mut self, into: &NodeKey, from: &NodeKey) -> Result<(), CrdtError> {
        let target = self.parts(into)?;
        let source = self.parts(from)?;
        for part in list_entries(&source).into_iter().flatten() {
            target.push(part.as_str())?;
        }
        if !source.is_empty() {
            source.delete(0, source.len())?;
        }
        Ok(())
    }

    /// Move everything from `position` on out of `key` and onto the end of
    /// `to`, a node of the same kind.
    ///
    /// Only the part that straddles `position` is cut and copied; the parts
    /// after it change owner as they are.
    pub fn move_tail(&mut self, key: &NodeKey, position: usize, to: &NodeKey) -> Result<(), CrdtError> {
        let object = self.object(key)?;
        let container = object.is_container();
        let ids = self.part_ids(key, container)?;
        let lens: Vec<usize> = ids
            .iter()
            .map(|id| match id {
                Some(id) if container => self.tree.list(id).map_or(0, |l| l.len()),
                Some(id) => self.tree.text(id).map_or(0, |t| t.len_unicode()),
                None => 0,
            })
            .collect();
        let total: usize = lens.iter().sum();
        if position > total {
            return Err(CrdtError::InvalidEdit(format!(
                "position {position} does not match length {total}"
            )));
        }
        let Some((cut, local)) = locate(&lens, position) else {
            return Ok(());
        };
        match &ids[cut] {
            Some(part) if local < lens[cut] && container => self.move_children(part, local, to)?,
            Some(part) if local < lens[cut] => self.move_chars(key, part, local, to)?,
            _ => {}
        }
        let later = &ids[cut + 1..];
        if !later.is_empty() {
            let target = self.parts(to)?;
            for part in later.iter().flatten() {
                target.push(part.as_str())?;
            }
            self.parts(key)?.delete(cut + 1, later.len())?;
        }
        Ok(())
    }

    fn move_chars(&mut self, key: &NodeKey, part: &str, local: usize, to: &NodeKey) -> Result<(), CrdtError> {
        let source = self
            .tree
            .text(part)
            .ok_or_else(|| CrdtError::NodeNotFound(SmolStr::new(part)))?;
        let len = source.len_unicode();
        let tail = Text::new(key.clone(), read_leaves(&source))
            .split_off(local)
            .unwrap_or_default();
        let target = self.text_parts(to)?;
        let dest = match target.last() {
            Some(dest) => dest.clone(),
            None => {
                let part = self.fresh_part(to, NodeObject::Text)?;
                self.tree.text(&part).ok_or_else(|| CrdtError::NodeNotFound(part))?
            }
        };
        write_leaves(&dest, dest.len_unicode(), &tail)?;
        source.delete(local, len - local)?;
        Ok(())
    }

    fn move_children(&mut self, part: &str, local: usize, to: &NodeKey) -> Result<(), CrdtError> {
        let source = self
            .tree
            .list(part)
            .ok_or_else(|| CrdtError::NodeNotFound(SmolStr::new(part)))?;
        let moved: Vec<String> = list_entries(&source).into_iter().skip(local).flatten().collect();
        for child in &moved {
            let end = self.children(to)?.len();
            self.insert_child(to, end, &NodeKey::from(child.as_str()))?;
        }
        source.delete(local, source.len() - local)?;
        Ok(())
    }

    pub fn set_type(&mut self, key: &NodeKey, node_type: &str) -> Result<(), CrdtError> {
        let map = self.node(key)?;
        if !matches!(object_of(&map), Some(NodeObject::Block | NodeObject::Inline)) {
            return Err(unexpected(key, "an element"));
        }
        map.insert(TYPE, node_type)?;
        Ok(())
    }

    pub fn set_data(&mut self, key: &NodeKey, data: &Props) -> Result<(), CrdtError> {
        let map = self.node(key)?;
        if object_of(&map) == Some(NodeObject::Text) {
            return Err(unexpected(key, "an element"));
        }
        write_data(&self.tree, key.as_str(), &map, data)
    }
}

/// Part index and local offset of `pos`. A position on the boundary
/// between two parts belongs to the earlier one.
fn locate(lens: &[usize], pos: usize) -> Option<(usize, usize)> {
    let mut start = 0;
    for (i, len) in lens.iter().enumerate() {
        if pos <= start + len {
            return Some((i, pos - start));
        }
        start += len;
    }
    None
}

/// The pieces of `offset..end` that fall in each text part, in local
/// coordinates.
fn overlaps(parts: &[LoroText], offset: usize, end: usize) -> Vec<(LoroText, std::ops::Range<usize>)> {
    let mut out = Vec::new();
    let mut start = 0;
    for part in parts {
        let len = part.len_unicode();
        let lo = offset.max(start);
        let hi = end.min(start + len);
        if lo < hi {
            out.push((part.clone(), lo - start..hi - start));
        }
        start += len;
    }
    out
}

fn delete_entries(list: &LoroList, indices: &[usize]) -> Result<usize, CrdtError> {
    for i in indices.iter().rev() {
        list.delete(*i, 1)?;
    }
    Ok(indices.len())
}

fn key_str(key: &NodeKey) -> SmolStr {
    SmolStr::new(key.as_str())
}

fn unexpected(key: &NodeKey, expected: &'static str) -> CrdtError {
    CrdtError::UnexpectedShape {
        key: key_str(key),
        expected,
    }
}
