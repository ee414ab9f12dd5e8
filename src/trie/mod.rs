//! Hierarchical namespace over flat key names.
//!
//! Key names are split on the delimiter and stored as a path of labelled
//! nodes. Every node carries the number of keys at or below it, maintained
//! incrementally on insert and remove so counts never require a traversal.
//! A node can be a key and a prefix of other keys at the same time.
//! Opaque names hang off the root keyed by their raw bytes, listed after the
//! decoded top-level labels, so they never share a node with a decoded name.

mod key;

use std::collections::BTreeMap;

pub use key::{
    split_segments, KeyKind, KeyMeta, KeyName, KeyPath, KeyRecord, Segments, Ttl,
};

/// One labelled node of the namespace.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrieNode {
    children: BTreeMap<Box<str>, TrieNode>,
    opaque: BTreeMap<Box<[u8]>, TrieNode>,
    leaf: Option<KeyRecord>,
    count: u64,
}

impl TrieNode {
    /// Number of keys at or below this node.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Key stored at this exact path, if any.
    pub fn record(&self) -> Option<&KeyRecord> {
        self.leaf.as_ref()
    }

    /// Whether this node's path is itself a key.
    pub fn is_key(&self) -> bool {
        self.leaf.is_some()
    }

    /// Whether keys exist below this node.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty() || !self.opaque.is_empty()
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.len() + self.opaque.len()
    }

    /// Direct child with `label`.
    pub fn child(&self, label: &str) -> Option<&TrieNode> {
        self.children.get(label)
    }

    /// Direct children in label order, opaque keys last.
    pub fn children(&self) -> impl Iterator<Item = (&str, &TrieNode)> + '_ {
        let decoded = self.children.iter().map(|(label, node)| (label.as_ref(), node));
        let opaque = self
            .opaque
            .values()
            .filter_map(|node| node.leaf.as_ref().map(|record| (record.name.as_str(), node)));
        decoded.chain(opaque)
    }

    fn is_vacant(&self) -> bool {
        !self.has_children() && self.leaf.is_none()
    }
}

/// Result of inserting a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insertion {
    /// The key was not present before.
    Added,
    /// The key was present; its record was refreshed in place.
    Refreshed,
}

/// Summary of one child in a [`ChildPage`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildEntry {
    /// Child label.
    pub label: Box<str>,
    /// Keys at or below the child.
    pub count: u64,
    /// Whether the child is itself a key.
    pub is_key: bool,
    /// Number of children of the child.
    pub fan_out: usize,
}

/// Window over the sorted children of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildPage {
    /// Index of the first entry among all children.
    pub offset: usize,
    /// Total number of children.
    pub total: usize,
    /// Entries in label order.
    pub entries: Vec<ChildEntry>,
}

impl ChildPage {
    /// Whether children exist past this page.
    pub fn has_more(&self) -> bool {
        self.offset + self.entries.len() < self.total
    }
}

/// Namespace trie rooted at the empty prefix.
#[derive(Clone, Debug)]
pub struct Trie {
    root: TrieNode,
    delimiter: String,
    revision: u64,
}

impl Trie {
    /// Creates an empty trie splitting names on `delimiter`.
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            root: TrieNode::default(),
            delimiter: delimiter.into(),
            revision: 0,
        }
    }

    /// Delimiter used for splitting.
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Number of distinct keys.
    pub fn len(&self) -> u64 {
        self.root.count
    }

    /// Whether the trie holds no nodes besides the root.
    pub fn is_empty(&self) -> bool {
        self.root.is_vacant()
    }

    /// Counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Root node.
    pub fn root(&self) -> &TrieNode {
        &self.root
    }

    /// Path of the node that holds (or would hold) `name`.
    pub fn path_of(&self, name: &KeyName) -> KeyPath {
        KeyPath::of(name, &self.delimiter)
    }

    /// Inserts `name`, refreshing it in place when already present.
    pub fn insert(&mut self, name: &KeyName) -> Insertion {
        self.upsert(name, |_| {})
    }

    /// Inserts `name` and stamps it as seen by scan generation `stamp`.
    pub fn insert_seen(&mut self, name: &KeyName, stamp: u64) -> Insertion {
        self.upsert(name, |record| record.seen = record.seen.max(stamp))
    }

    /// Inserts a key that exists only locally, with its intended kind.
    pub fn stage(&mut self, name: &KeyName, kind: KeyKind) -> Insertion {
        self.upsert(name, |record| record.staged = Some(kind))
    }

    /// Inserts a key known to exist in the store, as seen by scan generation
    /// `stamp`. Its staged marker and cached attributes are dropped.
    pub fn commit(&mut self, name: &KeyName, stamp: u64) -> Insertion {
        self.upsert(name, |record| {
            record.staged = None;
            record.meta = None;
            record.seen = record.seen.max(stamp);
        })
    }

    fn upsert(&mut self, name: &KeyName, update: impl FnOnce(&mut KeyRecord)) -> Insertion {
        self.revision += 1;
        if let Some(record) = self.record_mut(name) {
            update(record);
            return Insertion::Refreshed;
        }
        let mut record = KeyRecord::new(name.clone());
        update(&mut record);
        self.root.count += 1;
        if name.is_opaque() {
            let node = TrieNode {
                count: 1,
                leaf: Some(record),
                ..TrieNode::default()
            };
            self.root.opaque.insert(Box::from(name.as_bytes()), node);
            return Insertion::Added;
        }
        let segments = name.segments(&self.delimiter);
        let mut node = &mut self.root;
        for segment in &segments {
            node = node.children.entry(Box::from(*segment)).or_default();
            node.count += 1;
        }
        node.leaf = Some(record);
        Insertion::Added
    }

    fn record_mut(&mut self, name: &KeyName) -> Option<&mut KeyRecord> {
        let node = if name.is_opaque() {
            self.root.opaque.get_mut(name.as_bytes())?
        } else {
            walk_mut(&mut self.root, &name.segments(&self.delimiter))?
        };
        node.leaf.as_mut()
    }

    /// Removes `name`, pruning interior nodes left without keys.
    ///
    /// Returns whether the key was present.
    pub fn remove(&mut self, name: &KeyName) -> bool {
        let removed = if name.is_opaque() {
            let removed = self.root.opaque.remove(name.as_bytes()).is_some();
            if removed {
                self.root.count -= 1;
            }
            removed
        } else {
            remove_at(&mut self.root, &name.segments(&self.delimiter))
        };
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// Node holding the key `name`, if the key is present.
    pub fn lookup(&self, name: &KeyName) -> Option<&TrieNode> {
        if name.is_opaque() {
            return self.root.opaque.get(name.as_bytes());
        }
        let segments = name.segments(&self.delimiter);
        let mut node = &self.root;
        for segment in &segments {
            node = node.children.get(*segment)?;
        }
        node.is_key().then_some(node)
    }

    /// Whether the key `name` is present.
    pub fn contains(&self, name: &KeyName) -> bool {
        self.lookup(name).is_some()
    }

    /// Node at `path`, key or not.
    pub fn node(&self, path: &KeyPath) -> Option<&TrieNode> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.children.get(segment.as_ref())?;
        }
        Some(node)
    }

    /// Sorted page of the children of `path`.
    pub fn children_of(&self, path: &KeyPath, offset: usize, limit: usize) -> Option<ChildPage> {
        let node = self.node(path)?;
        let entries = node
            .children()
            .skip(offset)
            .take(limit)
            .map(|(label, child)| ChildEntry {
                label: Box::from(label),
                count: child.count,
                is_key: child.is_key(),
                fan_out: child.child_count(),
            })
            .collect();
        Some(ChildPage {
            offset,
            total: node.child_count(),
            entries,
        })
    }

    /// Replaces the cached attributes of `name`.
    ///
    /// Returns `false` when the key is not present.
    pub fn set_meta(&mut self, name: &KeyName, meta: Option<KeyMeta>) -> bool {
        match self.record_mut(name) {
            Some(record) => {
                record.meta = meta;
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    /// Names of every key, in path order.
    pub fn keys(&self) -> Vec<KeyName> {
        let mut out = Vec::with_capacity(self.root.count as usize);
        self.visit_records(|record| out.push(record.name.clone()));
        out
    }

    /// Keys last seen before scan generation `stamp` that are not staged.
    pub fn stale_keys(&self, stamp: u64) -> Vec<KeyName> {
        let mut out = Vec::new();
        self.visit_records(|record| {
            if record.seen < stamp && record.staged.is_none() {
                out.push(record.name.clone());
            }
        });
        out
    }

    /// Number of nodes, root included.
    pub fn node_count(&self) -> usize {
        let mut total = 0;
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            total += 1;
            stack.extend(node.children.values().chain(node.opaque.values()));
        }
        total
    }

    /// Drops every key.
    pub fn clear(&mut self) {
        self.root = TrieNode::default();
        self.revision += 1;
    }

    fn visit_records(&self, mut visit: impl FnMut(&KeyRecord)) {
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            if let Some(record) = &node.leaf {
                visit(record);
            }
            stack.extend(node.opaque.values().rev());
            stack.extend(node.children.values().rev());
        }
    }
}

fn walk_mut<'a>(mut node: &'a mut TrieNode, segments: &[&str]) -> Option<&'a mut TrieNode> {
    for segment in segments {
        node = node.children.get_mut(*segment)?;
    }
    Some(node)
}

fn remove_at(node: &mut TrieNode, segments: &[&str]) -> bool {
    let removed = match segments.split_first() {
        None => node.leaf.take().is_some(),
        Some((head, rest)) => {
            let Some(child) = node.children.get_mut(*head) else {
                return false;
            };
            let removed = remove_at(child, rest);
            if removed && child.is_vacant() {
                node.children.remove(*head);
            }
            removed
        }
    };
    if removed {
        node.count -= 1;
    }
    removed
}
