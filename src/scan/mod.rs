//! Cursor-based key enumeration.
//!
//! The store only offers unordered, resumable enumeration that may repeat
//! keys. [`CursorScanner`] turns that primitive into a lazy sequence of
//! batches sized by a hint, with bounded round trips per batch.

mod glob;
mod memory;

use tracing::{debug, trace};

pub use glob::glob_match;
pub(crate) use glob::glob_match_bytes;
pub use memory::{GeneratedKeyspace, MemoryStore};

use crate::config::{IndexConfig, MIN_SCAN_COUNT};
use crate::error::{KeyspaceError, Result};
use crate::trie::{KeyKind, KeyMeta, KeyName, Ttl};

/// Capability of a remote key-value store consumed by the index.
pub trait StoreClient: Send {
    /// Human readable identity of the connection.
    fn label(&self) -> String;

    /// One enumeration step: returns the next cursor (0 once wrapped) and raw key names.
    fn scan(&mut self, cursor: u64, pattern: Option<&str>, count: usize)
        -> Result<(u64, Vec<Vec<u8>>)>;

    /// Types of `names`, in order; missing keys report [`KeyKind::None`].
    fn key_types(&mut self, names: &[KeyName]) -> Result<Vec<KeyKind>>;

    /// Remaining lifetime of `name`.
    fn ttl(&mut self, name: &KeyName) -> Result<Ttl>;

    /// Approximate memory held by `name`, when the store reports it.
    fn memory_usage(&mut self, name: &KeyName) -> Result<Option<u64>>;

    /// Estimated number of keys in the selected database.
    fn db_size(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }

    /// Switches to another logical database.
    fn select_db(&mut self, db: u32) -> Result<()>;
}

/// Position of an enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanCursor {
    /// Store cursor value; 0 is the initial sentinel.
    pub value: u64,
    /// Whether enumeration wrapped back to the sentinel.
    pub complete: bool,
}

impl ScanCursor {
    /// Cursor of a fresh enumeration.
    pub fn start() -> Self {
        Self {
            value: 0,
            complete: false,
        }
    }
}

impl Default for ScanCursor {
    fn default() -> Self {
        Self::start()
    }
}

/// One batch of key names.
#[derive(Clone, Debug)]
pub struct ScanBatch {
    /// Decoded names, possibly repeating names of earlier batches.
    pub keys: Vec<KeyName>,
    /// Cursor to pass to the next call.
    pub next: ScanCursor,
    /// Whether enumeration finished with this batch.
    pub done: bool,
    /// Names that failed to decode and were kept as opaque names.
    pub malformed: usize,
    /// Store calls spent on this batch.
    pub round_trips: usize,
}

/// Assembles batches from store enumeration steps.
#[derive(Clone, Debug)]
pub struct CursorScanner {
    count: usize,
    max_round_trips: usize,
    pattern: Option<String>,
}

impl CursorScanner {
    /// Scanner sized from `config`, optionally restricted to a glob `pattern`.
    pub fn new(config: &IndexConfig, pattern: Option<String>) -> Self {
        Self {
            count: config.scan_count.max(MIN_SCAN_COUNT),
            max_round_trips: config.scan_max_round_trips.max(1),
            pattern: pattern.filter(|p| !p.is_empty() && p != "*"),
        }
    }

    /// Glob restricting the enumeration.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Fetches the batch that follows `cursor`.
    ///
    /// A completed cursor yields an empty, finished batch without calling the store.
    pub fn next_batch(&self, client: &mut dyn StoreClient, cursor: ScanCursor) -> Result<ScanBatch> {
        let mut batch = ScanBatch {
            keys: Vec::new(),
            next: cursor,
            done: cursor.complete,
            malformed: 0,
            round_trips: 0,
        };
        if cursor.complete {
            return Ok(batch);
        }
        let mut value = cursor.value;
        loop {
            let request = self.count.saturating_sub(batch.keys.len()).max(MIN_SCAN_COUNT);
            let (next, raw) = client.scan(value, self.pattern.as_deref(), request)?;
            batch.round_trips += 1;
            trace!(cursor = value, next, returned = raw.len(), "scan.batch.step");
            batch.keys.reserve(raw.len());
            for bytes in raw {
                match KeyName::decode(bytes) {
                    Ok(name) => batch.keys.push(name),
                    Err(KeyspaceError::MalformedKeyName { raw }) => {
                        debug!(bytes = raw.len(), "scan.batch.malformed_name");
                        batch.malformed += 1;
                        batch.keys.push(KeyName::decode_lossy(raw));
                    }
                    Err(err) => return Err(err),
                }
            }
            value = next;
            if next == 0 {
                batch.done = true;
                break;
            }
            if batch.keys.len() >= self.count || batch.round_trips >= self.max_round_trips {
                break;
            }
        }
        batch.next = ScanCursor {
            value,
            complete: batch.done,
        };
        debug!(
            keys = batch.keys.len(),
            round_trips = batch.round_trips,
            done = batch.done,
            "scan.batch.ready"
        );
        Ok(batch)
    }
}

/// Fetches type, TTL and size of `names` with one batched type lookup.
pub fn describe_keys(client: &mut dyn StoreClient, names: &[KeyName]) -> Result<Vec<KeyMeta>> {
    let kinds = client.key_types(names)?;
    if kinds.len() != names.len() {
        return Err(KeyspaceError::InvalidArgument(format!(
            "store described {} of {} keys",
            kinds.len(),
            names.len()
        )));
    }
    let mut out = Vec::with_capacity(names.len());
    for (name, kind) in names.iter().zip(kinds) {
        let (ttl, size) = if kind == KeyKind::None {
            (Ttl::Missing, None)
        } else {
            (client.ttl(name)?, client.memory_usage(name)?)
        };
        out.push(KeyMeta { kind, ttl, size });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    fn scanner(count: usize, pattern: Option<&str>) -> CursorScanner {
        let config = IndexConfig {
            scan_count: count,
            ..IndexConfig::default()
        };
        CursorScanner::new(&config, pattern.map(str::to_string))
    }

    fn drain(scanner: &CursorScanner, store: &mut MemoryStore) -> Vec<ScanBatch> {
        let mut cursor = ScanCursor::start();
        let mut batches = Vec::new();
        loop {
            let batch = scanner.next_batch(store, cursor).unwrap();
            cursor = batch.next;
            let done = batch.done;
            batches.push(batch);
            if done {
                return batches;
            }
        }
    }

    #[test]
    fn enumerates_every_key_and_terminates() {
        let keys: Vec<String> = (0..500).map(|i| format!("k:{i}")).collect();
        let mut store = MemoryStore::from_keys(keys.iter().map(String::as_str));
        let batches = drain(&scanner(50, None), &mut store);
        assert!(batches.len() > 1);
        let seen: FxHashSet<String> = batches
            .iter()
            .flat_map(|b| b.keys.iter().map(|k| k.to_string()))
            .collect();
        assert_eq!(seen.len(), 500);
        assert!(batches.last().unwrap().next.complete);
    }

    #[test]
    fn completed_cursor_does_not_touch_the_store() {
        let mut store = MemoryStore::from_keys(["a", "b"]);
        let done = ScanCursor {
            value: 0,
            complete: true,
        };
        let batch = scanner(10, None).next_batch(&mut store, done).unwrap();
        assert!(batch.done && batch.keys.is_empty());
        assert_eq!(store.scan_calls(), 0);
    }

    #[test]
    fn pattern_restricts_keys_and_bounds_round_trips() {
        let mut keys: Vec<String> = (0..300).map(|i| format!("noise:{i}")).collect();
        keys.push("user:1".into());
        let mut store = MemoryStore::from_keys(keys.iter().map(String::as_str));
        let config = IndexConfig {
            scan_count: 100,
            scan_max_round_trips: 2,
            ..IndexConfig::default()
        };
        let scanner = CursorScanner::new(&config, Some("user:*".into()));
        let batches = drain(&scanner, &mut store);
        assert!(batches.iter().all(|b| b.round_trips <= 2));
        let found: Vec<_> = batches.iter().flat_map(|b| b.keys.clone()).collect();
        assert_eq!(found, vec![KeyName::from("user:1")]);
    }

    #[test]
    fn undecodable_names_are_degraded_and_counted() {
        let mut store = MemoryStore::default();
        store.insert_raw(vec![b'x', b':', 0xff], KeyKind::String);
        store.insert("plain:key", KeyKind::String);
        let batches = drain(&scanner(10, None), &mut store);
        let malformed: usize = batches.iter().map(|b| b.malformed).sum();
        assert_eq!(malformed, 1);
        assert!(batches
            .iter()
            .flat_map(|b| b.keys.iter())
            .any(KeyName::is_opaque));
    }

    #[test]
    fn connection_loss_surfaces_as_error() {
        let mut store = MemoryStore::generated(&GeneratedKeyspace::new(1000, 7));
        let scanner = scanner(10, None);
        let first = scanner.next_batch(&mut store, ScanCursor::start()).unwrap();
        store.fail_after(0);
        let err = scanner.next_batch(&mut store, first.next).unwrap_err();
        assert!(err.is_connection_loss());
    }

    #[test]
    fn describe_reports_missing_keys() {
        let mut store = MemoryStore::from_keys(["present"]);
        let metas = describe_keys(&mut store, &["present".into(), "gone".into()]).unwrap();
        assert_eq!(metas[0].kind, KeyKind::String);
        assert_eq!(metas[0].ttl, Ttl::Persistent);
        assert_eq!(metas[1].kind, KeyKind::None);
        assert_eq!(metas[1].ttl, Ttl::Missing);
    }
}
