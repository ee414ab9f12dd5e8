//! Windowed, lazily expanded view over a trie.
//!
//! The view references the tree only by path. Rows are produced by a
//! depth-first walk that descends into expanded nodes only and stops once
//! the window is full. Expanded subtrees above the window are stepped over
//! using their cached row spans, so the cost depends on what is rendered,
//! not on the size of the keyspace.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::ViewConfig;
use crate::generation::Generation;
use crate::notify::ChangeNotice;
use crate::trie::{KeyKind, KeyName, KeyPath, KeyRecord, Trie, TrieNode, Ttl};

/// One rendered line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Row {
    /// A prefix with children; may also be a key itself.
    Node {
        /// Position in the tree.
        path: KeyPath,
        /// Last segment.
        label: String,
        /// Nesting level; top-level prefixes are 0.
        depth: usize,
        /// Keys at or below this node.
        count: u64,
        /// Whether children are shown.
        expanded: bool,
        /// Key stored at this exact path.
        key: Option<KeyName>,
        /// Type of that key, once described or staged.
        kind: Option<KeyKind>,
        /// Remaining lifetime of that key, once described.
        ttl: Option<Ttl>,
    },
    /// A key without children.
    Leaf {
        /// Position in the tree.
        path: KeyPath,
        /// Last segment.
        label: String,
        /// Nesting level.
        depth: usize,
        /// Full key name.
        name: KeyName,
        /// Type, once described or staged.
        kind: Option<KeyKind>,
        /// Remaining lifetime, once described.
        ttl: Option<Ttl>,
    },
    /// More children of `parent` exist than are shown.
    LoadMore {
        /// Node whose listing is truncated.
        parent: KeyPath,
        /// Nesting level of the listing.
        depth: usize,
        /// Children shown.
        shown: usize,
        /// Children in total.
        total: usize,
    },
    /// The listing of `parent` may still grow.
    Scanning {
        /// Node whose listing is incomplete.
        parent: KeyPath,
        /// Nesting level of the listing.
        depth: usize,
    },
}

impl Row {
    /// Path the row refers to; placeholders refer to their parent.
    pub fn path(&self) -> &KeyPath {
        match self {
            Row::Node { path, .. } | Row::Leaf { path, .. } => path,
            Row::LoadMore { parent, .. } | Row::Scanning { parent, .. } => parent,
        }
    }

    /// Nesting level.
    pub fn depth(&self) -> usize {
        match self {
            Row::Node { depth, .. }
            | Row::Leaf { depth, .. }
            | Row::LoadMore { depth, .. }
            | Row::Scanning { depth, .. } => *depth,
        }
    }

    /// Key shown on this row, if any.
    pub fn key(&self) -> Option<&KeyName> {
        match self {
            Row::Node { key, .. } => key.as_ref(),
            Row::Leaf { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether the key on this row has not been described yet.
    pub fn needs_description(&self) -> bool {
        matches!(
            self,
            Row::Leaf { kind: None, .. } | Row::Node { key: Some(_), kind: None, .. }
        )
    }
}

/// Inputs of one render besides the tree itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderMode {
    /// Whether the tree is the filtered projection.
    pub filtering: bool,
    /// Whether a scan is in progress.
    pub scanning: bool,
    /// Generation of the filter result being rendered.
    pub generation: Generation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CacheKey {
    offset: usize,
    height: usize,
    mode: RenderMode,
}

#[derive(Debug)]
struct RowCache {
    key: CacheKey,
    rows: Vec<Row>,
    last_path: Option<KeyPath>,
}

/// Expansion, scroll and pagination state of one view.
#[derive(Debug)]
pub struct ViewState {
    config: ViewConfig,
    page_size: usize,
    expanded: FxHashSet<KeyPath>,
    collapsed: FxHashSet<KeyPath>,
    pages: FxHashMap<KeyPath, usize>,
    offset: usize,
    cache: Option<RowCache>,
    spans: FxHashMap<KeyPath, usize>,
    span_mode: Option<RenderMode>,
}

impl ViewState {
    /// Empty view state listing `page_size` children per page.
    pub fn new(config: ViewConfig, page_size: usize) -> Self {
        Self {
            config,
            page_size: page_size.max(1),
            expanded: FxHashSet::default(),
            collapsed: FxHashSet::default(),
            pages: FxHashMap::default(),
            offset: 0,
            cache: None,
            spans: FxHashMap::default(),
            span_mode: None,
        }
    }

    /// Whether `path` shows its children.
    pub fn is_expanded(&self, path: &KeyPath, filtering: bool) -> bool {
        if self.collapsed.contains(path) {
            return false;
        }
        if self.expanded.contains(path) {
            return true;
        }
        let open_below = if filtering {
            self.config.filter_expand_depth
        } else {
            self.config.auto_expand_depth
        };
        path.depth().saturating_sub(1) < open_below
    }

    /// Shows the children of `path`.
    pub fn expand(&mut self, path: &KeyPath) {
        self.collapsed.remove(path);
        self.expanded.insert(path.clone());
        self.reshaped(path);
    }

    /// Hides the children of `path`.
    pub fn collapse(&mut self, path: &KeyPath) {
        self.expanded.remove(path);
        self.collapsed.insert(path.clone());
        self.reshaped(path);
    }

    /// Flips the expansion of `path`; returns the new state.
    pub fn toggle(&mut self, path: &KeyPath, filtering: bool) -> bool {
        if self.is_expanded(path, filtering) {
            self.collapse(path);
            false
        } else {
            self.expand(path);
            true
        }
    }

    /// Shows one more page of the children of `path`.
    pub fn request_more(&mut self, path: &KeyPath) {
        *self.pages.entry(path.clone()).or_insert(1) += 1;
        self.reshaped(path);
    }

    /// Number of children of `path` currently listed at most.
    pub fn page_limit(&self, path: &KeyPath) -> usize {
        self.pages
            .get(path)
            .copied()
            .unwrap_or(1)
            .saturating_mul(self.page_size)
    }

    /// First rendered row.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Scrolls to an absolute row.
    pub fn scroll_to(&mut self, offset: usize) {
        if offset != self.offset {
            self.offset = offset;
            self.invalidate();
        }
    }

    /// Scrolls by `delta` rows, stopping at the top.
    pub fn scroll_by(&mut self, delta: isize) {
        let offset = if delta < 0 {
            self.offset.saturating_sub(delta.unsigned_abs())
        } else {
            self.offset.saturating_add(delta as usize)
        };
        self.scroll_to(offset);
    }

    /// Forgets every override, page and the scroll position.
    pub fn reset(&mut self) {
        self.expanded.clear();
        self.collapsed.clear();
        self.pages.clear();
        self.offset = 0;
        self.invalidate_layout();
    }

    /// Drops the cached window.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Drops the cached window and every cached subtree span.
    pub fn invalidate_layout(&mut self) {
        self.cache = None;
        self.spans.clear();
    }

    /// Listings at and above `path` render differently now.
    fn reshaped(&mut self, path: &KeyPath) {
        self.spans.retain(|span, _| !path.starts_with(span));
        self.invalidate();
    }

    /// Whether a window is cached.
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Drops the cached window if `notice` changes a row in it or a listing
    /// rendered before it.
    pub fn on_change(&mut self, notice: &ChangeNotice) {
        self.spans.retain(|path, _| !notice.touches(path));
        let Some(cache) = &self.cache else {
            return;
        };
        let shifts = match &cache.last_path {
            Some(last) => notice.prefixes.iter().any(|prefix| prefix <= last),
            None => true,
        };
        if shifts || cache.rows.iter().any(|row| notice.touches(row.path())) {
            self.invalidate();
        }
    }

    /// Rows `offset..offset + height` of `source`.
    pub fn rows(&mut self, source: &Trie, mode: RenderMode, height: usize) -> Vec<Row> {
        self.render(source, None, mode, height)
    }

    /// Rows of a projection of `records`, such as a filter result.
    ///
    /// The shape comes from `projection`; key attributes come from `records`.
    pub fn projected_rows(
        &mut self,
        projection: &Trie,
        records: &Trie,
        mode: RenderMode,
        height: usize,
    ) -> Vec<Row> {
        self.render(projection, Some(records), mode, height)
    }

    fn render(&mut self, source: &Trie, records: Option<&Trie>, mode: RenderMode, height: usize) -> Vec<Row> {
        let key = CacheKey {
            offset: self.offset,
            height,
            mode,
        };
        if let Some(cache) = &self.cache {
            if cache.key == key {
                return cache.rows.clone();
            }
        }
        if self.span_mode != Some(mode) {
            self.spans.clear();
            self.span_mode = Some(mode);
        }
        let mut spans = std::mem::take(&mut self.spans);
        let mut walker = Walker {
            state: self,
            records,
            spans: &mut spans,
            mode,
            skip: self.offset,
            limit: height,
            rows: Vec::with_capacity(height),
            last_path: None,
        };
        walker.listing(source.root(), &KeyPath::root(), 0);
        let Walker { rows, last_path, .. } = walker;
        self.spans = spans;
        self.cache = Some(RowCache {
            key,
            rows: rows.clone(),
            last_path,
        });
        rows
    }
}

struct Walker<'a> {
    state: &'a ViewState,
    records: Option<&'a Trie>,
    spans: &'a mut FxHashMap<KeyPath, usize>,
    mode: RenderMode,
    skip: usize,
    limit: usize,
    rows: Vec<Row>,
    last_path: Option<KeyPath>,
}

impl Walker<'_> {
    fn full(&self) -> bool {
        self.rows.len() >= self.limit
    }

    fn emit(&mut self, row: Row) {
        if self.skip > 0 {
            self.skip -= 1;
            return;
        }
        if matches!(row, Row::Node { .. } | Row::Leaf { .. }) {
            self.last_path = Some(row.path().clone());
        }
        self.rows.push(row);
    }

    fn listing(&mut self, node: &TrieNode, path: &KeyPath, depth: usize) {
        let limit = self.state.page_limit(path);
        for (label, child) in node.children().take(limit) {
            if self.full() {
                return;
            }
            let child_path = path.child(label);
            if child.has_children() {
                let expanded = self.state.is_expanded(&child_path, self.mode.filtering);
                if expanded && self.skip > 0 {
                    let span = 1 + self.span(child, &child_path);
                    if span <= self.skip {
                        self.skip -= span;
                        continue;
                    }
                }
                let (kind, ttl) = self.attributes(child.record());
                self.emit(Row::Node {
                    path: child_path.clone(),
                    label: label.to_string(),
                    depth,
                    count: child.count(),
                    expanded,
                    key: child.record().map(|record| record.name.clone()),
                    kind,
                    ttl,
                });
                if expanded {
                    self.listing(child, &child_path, depth + 1);
                }
            } else if let Some(record) = child.record() {
                let (kind, ttl) = self.attributes(Some(record));
                self.emit(Row::Leaf {
                    path: child_path,
                    label: label.to_string(),
                    depth,
                    name: record.name.clone(),
                    kind,
                    ttl,
                });
            }
        }
        if self.full() {
            return;
        }
        let total = node.child_count();
        if total > limit {
            self.emit(Row::LoadMore {
                parent: path.clone(),
                depth,
                shown: limit,
                total,
            });
        } else if self.mode.scanning {
            self.emit(Row::Scanning {
                parent: path.clone(),
                depth,
            });
        }
    }

    /// Number of rows the listing of `node` renders in full.
    fn span(&mut self, node: &TrieNode, path: &KeyPath) -> usize {
        if let Some(&span) = self.spans.get(path) {
            return span;
        }
        let limit = self.state.page_limit(path);
        let mut span = 0;
        for (label, child) in node.children().take(limit) {
            if child.has_children() {
                span += 1;
                let child_path = path.child(label);
                if self.state.is_expanded(&child_path, self.mode.filtering) {
                    span += self.span(child, &child_path);
                }
            } else if child.is_key() {
                span += 1;
            }
        }
        if node.child_count() > limit || self.mode.scanning {
            span += 1;
        }
        self.spans.insert(path.clone(), span);
        span
    }

    fn attributes(&self, record: Option<&KeyRecord>) -> (Option<KeyKind>, Option<Ttl>) {
        let Some(record) = record else {
            return (None, None);
        };
        let record = self
            .records
            .and_then(|records| records.lookup(&record.name))
            .and_then(TrieNode::record)
            .unwrap_or(record);
        (record.kind().cloned(), record.meta.as_ref().map(|meta| meta.ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::KeyMeta;

    const IDLE: RenderMode = RenderMode {
        filtering: false,
        scanning: false,
        generation: Generation {
            epoch: 0,
            scan: 0,
            filter: 0,
        },
    };

    fn trie_with(keys: &[&str]) -> Trie {
        let mut trie = Trie::new(":");
        for key in keys {
            trie.insert(&KeyName::from(*key));
        }
        trie
    }

    fn path(text: &str) -> KeyPath {
        KeyPath::parse(text, ":")
    }

    fn labels(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|row| match row {
                Row::Node { label, depth, count, .. } => format!("{}{label}({count})", "  ".repeat(*depth)),
                Row::Leaf { label, depth, .. } => format!("{}{label}", "  ".repeat(*depth)),
                Row::LoadMore { shown, total, .. } => format!("more {shown}/{total}"),
                Row::Scanning { .. } => "scanning".to_string(),
            })
            .collect()
    }

    #[test]
    fn top_level_prefixes_start_expanded() {
        let trie = trie_with(&["user:1:name", "user:1:email", "user:2:name", "session:abc"]);
        let mut view = ViewState::new(ViewConfig::default(), 100);
        let rows = view.rows(&trie, IDLE, 20);
        assert_eq!(
            labels(&rows),
            vec!["session(1)", "  abc", "user(3)", "  1(2)", "  2(1)"]
        );
        view.expand(&path("user:1"));
        let rows = view.rows(&trie, IDLE, 20);
        assert_eq!(labels(&rows)[3..6], ["  1(2)", "    email", "    name"]);
    }

    #[test]
    fn key_and_prefix_render_as_one_node() {
        let trie = trie_with(&["user:1", "user:1:name"]);
        let mut view = ViewState::new(ViewConfig::default(), 100);
        let rows = view.rows(&trie, IDLE, 20);
        match &rows[1] {
            Row::Node { key, expanded, count, .. } => {
                assert_eq!(key.as_ref().map(KeyName::as_str), Some("user:1"));
                assert!(!expanded);
                assert_eq!(*count, 2);
            }
            other => panic!("unexpected row {other:?}"),
        }
    }

    #[test]
    fn key_prefix_nodes_carry_attributes() {
        let mut trie = trie_with(&["user:1", "user:1:name"]);
        let mut view = ViewState::new(ViewConfig::default(), 100);
        let rows = view.rows(&trie, IDLE, 20);
        assert!(rows[1].needs_description());
        assert!(!rows[0].needs_description());

        let meta = KeyMeta {
            kind: KeyKind::Hash,
            ttl: Ttl::Expires(std::time::Duration::from_secs(30)),
            size: None,
        };
        trie.set_meta(&KeyName::from("user:1"), Some(meta));
        view.invalidate();
        match &view.rows(&trie, IDLE, 20)[1] {
            row @ Row::Node { kind, ttl, .. } => {
                assert_eq!(kind, &Some(KeyKind::Hash));
                assert_eq!(ttl, &Some(Ttl::Expires(std::time::Duration::from_secs(30))));
                assert!(!row.needs_description());
            }
            other => panic!("unexpected row {other:?}"),
        }
    }

    #[test]
    fn projected_rows_take_attributes_from_records() {
        let mut records = trie_with(&["user:1", "user:2", "session:1"]);
        records.stage(&KeyName::from("user:2"), KeyKind::List);
        let meta = KeyMeta {
            kind: KeyKind::String,
            ttl: Ttl::Persistent,
            size: Some(8),
        };
        records.set_meta(&KeyName::from("user:1"), Some(meta));
        let projection = trie_with(&["user:1", "user:2"]);
        let filtering = RenderMode {
            filtering: true,
            ..IDLE
        };
        let mut view = ViewState::new(ViewConfig::default(), 100);
        let kinds: Vec<Option<KeyKind>> = view
            .projected_rows(&projection, &records, filtering, 10)
            .into_iter()
            .filter_map(|row| match row {
                Row::Leaf { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![Some(KeyKind::String), Some(KeyKind::List)]);
    }

    #[test]
    fn skipped_subtrees_render_like_a_full_walk() {
        let keys: Vec<String> = (0..6)
            .flat_map(|a| (0..4).flat_map(move |b| (0..3).map(move |c| format!("p{a}:q{b}:r{c}"))))
            .collect();
        let trie = trie_with(&keys.iter().map(String::as_str).collect::<Vec<_>>());
        let mut view = ViewState::new(ViewConfig::default(), 3);
        view.expand(&path("p1:q0"));
        view.expand(&path("p4:q2"));
        view.collapse(&path("p2"));
        view.request_more(&path("p3"));

        let check = |view: &mut ViewState| {
            view.scroll_to(0);
            let full = view.rows(&trie, IDLE, 1_000);
            for offset in 0..full.len() {
                view.scroll_to(offset);
                let window = view.rows(&trie, IDLE, 4);
                let end = (offset + 4).min(full.len());
                assert_eq!(window, full[offset..end], "offset {offset}");
            }
        };
        check(&mut view);
        view.collapse(&path("p1"));
        check(&mut view);
        view.expand(&path("p2"));
        view.request_more(&KeyPath::root());
        check(&mut view);
    }

    #[test]
    fn window_and_collapse() {
        let trie = trie_with(&["a:1", "a:2", "a:3", "b:1"]);
        let mut view = ViewState::new(ViewConfig::default(), 100);
        view.scroll_to(2);
        assert_eq!(labels(&view.rows(&trie, IDLE, 2)), vec!["  2", "  3"]);
        view.scroll_to(0);
        view.collapse(&path("a"));
        assert_eq!(labels(&view.rows(&trie, IDLE, 10)), vec!["a(3)", "b(1)", "  1"]);
        view.scroll_by(-5);
        assert_eq!(view.offset(), 0);
    }

    #[test]
    fn pagination_adds_load_more_rows() {
        let keys: Vec<String> = (0..7).map(|i| format!("flat{i}")).collect();
        let trie = trie_with(&keys.iter().map(String::as_str).collect::<Vec<_>>());
        let mut view = ViewState::new(ViewConfig::default(), 3);
        let rows = view.rows(&trie, IDLE, 10);
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[3],
            Row::LoadMore {
                parent: KeyPath::root(),
                depth: 0,
                shown: 3,
                total: 7
            }
        );
        view.request_more(&KeyPath::root());
        view.request_more(&KeyPath::root());
        let rows = view.rows(&trie, IDLE, 10);
        assert_eq!(rows.len(), 7);
        assert!(rows.iter().all(|row| matches!(row, Row::Leaf { .. })));
    }

    #[test]
    fn scanning_placeholders_end_listings() {
        let trie = trie_with(&["a:1"]);
        let mut view = ViewState::new(ViewConfig::default(), 10);
        let scanning = RenderMode {
            scanning: true,
            ..IDLE
        };
        assert_eq!(
            labels(&view.rows(&trie, scanning, 10)),
            vec!["a(1)", "  1", "scanning", "scanning"]
        );
        let empty = Trie::new(":");
        assert_eq!(labels(&view.rows(&empty, scanning, 10)), vec!["scanning"]);
    }

    #[test]
    fn filter_mode_expands_everything() {
        let trie = trie_with(&["a:b:c:d"]);
        let mut view = ViewState::new(ViewConfig::default(), 10);
        let filtering = RenderMode {
            filtering: true,
            ..IDLE
        };
        assert_eq!(view.rows(&trie, filtering, 10).len(), 4);
        assert_eq!(view.rows(&trie, IDLE, 10).len(), 2);
    }

    #[test]
    fn cache_survives_changes_after_the_window() {
        let trie = trie_with(&["a:1", "a:2", "z:1"]);
        let mut view = ViewState::new(ViewConfig::default(), 10);
        view.rows(&trie, IDLE, 2);
        assert!(view.is_cached());
        let notice = |prefix: &str| ChangeNotice {
            prefixes: vec![path(prefix)],
            inserted: 1,
            removed: 0,
            total: 4,
        };
        view.on_change(&notice("z"));
        assert!(view.is_cached());
        view.on_change(&notice("a"));
        assert!(!view.is_cached());
        view.rows(&trie, IDLE, 2);
        view.on_change(&notice(""));
        assert!(!view.is_cached());
    }
}
