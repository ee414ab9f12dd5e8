use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh64::xxh64;

use super::glob::glob_match_bytes;
use super::StoreClient;
use crate::error::{KeyspaceError, Result};
use crate::trie::{KeyKind, KeyName, Ttl};

const DATABASES: usize = 16;
const MIN_BUCKETS: usize = 16;
const KEYS_PER_BUCKET: usize = 8;

/// In-process store with cursor enumeration semantics.
///
/// Keys live in hash buckets; the cursor is the index of the next bucket to
/// visit, so enumeration order is unrelated to insertion order and keys
/// added mid-scan may or may not be returned. Cloned handles share state,
/// which lets a test mutate the store while a pipeline scans it.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<StoreState>>,
}

#[derive(Debug)]
struct StoreState {
    databases: Vec<Database>,
    selected: usize,
    scan_calls: u64,
    calls_before_failure: Option<u64>,
    duplicates: bool,
    latency: Duration,
}

impl StoreState {
    fn with_capacity(keys: usize) -> Self {
        let mut databases = Vec::with_capacity(DATABASES);
        databases.push(Database::with_capacity(keys));
        databases.extend((1..DATABASES).map(|_| Database::with_capacity(0)));
        Self {
            databases,
            selected: 0,
            scan_calls: 0,
            calls_before_failure: None,
            duplicates: false,
            latency: Duration::ZERO,
        }
    }

    fn db(&self) -> &Database {
        &self.databases[self.selected]
    }

    fn db_mut(&mut self) -> &mut Database {
        &mut self.databases[self.selected]
    }

    fn check_online(&mut self) -> Result<()> {
        match self.calls_before_failure {
            Some(0) => Err(KeyspaceError::ConnectionLost(
                "simulated connection reset".into(),
            )),
            Some(n) => {
                self.calls_before_failure = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Default for StoreState {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[derive(Clone, Debug)]
struct StoredValue {
    kind: KeyKind,
    ttl: i64,
    size: u64,
}

#[derive(Debug)]
struct Database {
    entries: FxHashMap<Vec<u8>, StoredValue>,
    buckets: Vec<Vec<Vec<u8>>>,
}

impl Database {
    fn with_capacity(keys: usize) -> Self {
        let buckets = (keys / KEYS_PER_BUCKET).next_power_of_two().max(MIN_BUCKETS);
        Self {
            entries: FxHashMap::default(),
            buckets: vec![Vec::new(); buckets],
        }
    }

    fn bucket_of(&self, key: &[u8]) -> usize {
        (xxh64(key, 0) as usize) & (self.buckets.len() - 1)
    }

    fn put(&mut self, key: Vec<u8>, value: StoredValue) {
        if self.entries.insert(key.clone(), value).is_none() {
            let bucket = self.bucket_of(&key);
            self.buckets[bucket].push(key);
        }
    }

    fn take(&mut self, key: &[u8]) -> Option<StoredValue> {
        let value = self.entries.remove(key)?;
        let bucket = self.bucket_of(key);
        self.buckets[bucket].retain(|k| k.as_slice() != key);
        Some(value)
    }

    fn find(&self, name: &KeyName) -> Option<&StoredValue> {
        self.entries.get(name.as_bytes())
    }
}

/// Shape of a generated keyspace.
#[derive(Clone, Debug)]
pub struct GeneratedKeyspace {
    /// Number of keys.
    pub count: usize,
    /// Seed of the generator; equal seeds give equal keyspaces.
    pub seed: u64,
    /// Top-level prefixes keys are spread over.
    pub prefixes: Vec<String>,
    /// Every n-th key is a flat name without delimiter; 0 disables.
    pub flat_every: usize,
}

impl GeneratedKeyspace {
    /// `count` keys spread over a default set of prefixes.
    pub fn new(count: usize, seed: u64) -> Self {
        Self {
            count,
            seed,
            prefixes: ["user", "session", "cache", "order", "queue", "product", "cart", "rate"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            flat_every: 97,
        }
    }
}

const FIELDS: [&str; 5] = ["name", "email", "profile", "items", "meta"];
const KINDS: [KeyKind; 6] = [
    KeyKind::String,
    KeyKind::Hash,
    KeyKind::List,
    KeyKind::Set,
    KeyKind::ZSet,
    KeyKind::Stream,
];

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store sized for roughly `keys` keys in database 0.
    pub fn with_capacity(keys: usize) -> Self {
        Self {
            shared: Arc::new(Mutex::new(StoreState::with_capacity(keys))),
        }
    }

    /// Store holding `keys` as string values.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let keys: Vec<&str> = keys.into_iter().collect();
        let store = Self::with_capacity(keys.len());
        for key in keys {
            store.insert(key, KeyKind::String);
        }
        store
    }

    /// Store populated deterministically from `shape`.
    pub fn generated(shape: &GeneratedKeyspace) -> Self {
        let store = Self::with_capacity(shape.count);
        let mut rng = ChaCha8Rng::seed_from_u64(shape.seed);
        {
            let mut state = store.shared.lock();
            let db = state.db_mut();
            for i in 0..shape.count {
                let name = if shape.prefixes.is_empty()
                    || (shape.flat_every > 0 && i % shape.flat_every == shape.flat_every - 1)
                {
                    format!("counter{i}")
                } else {
                    let prefix = &shape.prefixes[rng.gen_range(0..shape.prefixes.len())];
                    let field = FIELDS[rng.gen_range(0..FIELDS.len())];
                    format!("{prefix}:{i}:{field}")
                };
                let ttl = if rng.gen_bool(0.2) {
                    rng.gen_range(60..86_400)
                } else {
                    -1
                };
                let value = StoredValue {
                    kind: KINDS[rng.gen_range(0..KINDS.len())].clone(),
                    ttl,
                    size: rng.gen_range(48..4096),
                };
                db.put(name.into_bytes(), value);
            }
        }
        store
    }

    /// Loads one key per line; an optional tab-separated second column names the type.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn load_lines(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let lines: Vec<&str> = text
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
            .collect();
        let store = Self::with_capacity(lines.len());
        for line in lines {
            let (name, kind) = match line.split_once('\t') {
                Some((name, kind)) => (name, KeyKind::parse(kind.trim())),
                None => (line, KeyKind::String),
            };
            store.insert(name, kind);
        }
        Ok(store)
    }

    /// Writes `name` into the selected database.
    pub fn insert(&self, name: &str, kind: KeyKind) {
        self.insert_raw(name.as_bytes().to_vec(), kind);
    }

    /// Writes a key with arbitrary bytes into the selected database.
    pub fn insert_raw(&self, name: Vec<u8>, kind: KeyKind) {
        let size = name.len() as u64 + 56;
        self.shared
            .lock()
            .db_mut()
            .put(name, StoredValue { kind, ttl: -1, size });
    }

    /// Deletes `name`; returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.shared.lock().db_mut().take(name.as_bytes()).is_some()
    }

    /// Renames `from` to `to`, replacing any existing `to`.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.shared.lock();
        let db = state.db_mut();
        let value = db
            .take(from.as_bytes())
            .ok_or_else(|| KeyspaceError::NotFound(format!("key {from}")))?;
        db.take(to.as_bytes());
        db.put(to.as_bytes().to_vec(), value);
        Ok(())
    }

    /// Sets the remaining lifetime of `name` in seconds.
    pub fn expire(&self, name: &str, seconds: u64) -> bool {
        let mut state = self.shared.lock();
        match state.db_mut().entries.get_mut(name.as_bytes()) {
            Some(value) => {
                value.ttl = seconds as i64;
                true
            }
            None => false,
        }
    }

    /// Number of keys in the selected database.
    pub fn len(&self) -> usize {
        self.shared.lock().db().entries.len()
    }

    /// Whether the selected database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lets `calls` more store calls succeed, then fails every call with
    /// [`KeyspaceError::ConnectionLost`].
    pub fn fail_after(&self, calls: u64) {
        self.shared.lock().calls_before_failure = Some(calls);
    }

    /// Clears an injected failure.
    pub fn restore(&self) {
        self.shared.lock().calls_before_failure = None;
    }

    /// Makes every scan step repeat the bucket visited just before it.
    pub fn set_duplicates(&self, enabled: bool) {
        self.shared.lock().duplicates = enabled;
    }

    /// Delay applied to every scan step.
    pub fn set_latency(&self, latency: Duration) {
        self.shared.lock().latency = latency;
    }

    /// Number of scan steps served so far.
    pub fn scan_calls(&self) -> u64 {
        self.shared.lock().scan_calls
    }
}

impl StoreClient for MemoryStore {
    fn label(&self) -> String {
        format!("memory/{}", self.shared.lock().selected)
    }

    fn scan(
        &mut self,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> Result<(u64, Vec<Vec<u8>>)> {
        let latency = self.shared.lock().latency;
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        let mut state = self.shared.lock();
        state.check_online()?;
        state.scan_calls += 1;
        let duplicates = state.duplicates;
        let db = state.db();
        let start = usize::try_from(cursor)
            .ok()
            .filter(|&index| index < db.buckets.len())
            .ok_or_else(|| KeyspaceError::InvalidArgument(format!("invalid cursor {cursor}")))?;
        let keep = |key: &[u8]| pattern.map_or(true, |p| glob_match_bytes(p, key));
        let mut out = Vec::new();
        if duplicates && start > 0 {
            out.extend(db.buckets[start - 1].iter().filter(|k| keep(k.as_slice())).cloned());
        }
        let mut index = start;
        let mut visited = 0;
        loop {
            let bucket = &db.buckets[index];
            visited += bucket.len();
            out.extend(bucket.iter().filter(|k| keep(k.as_slice())).cloned());
            index += 1;
            if index >= db.buckets.len() || visited >= count {
                break;
            }
        }
        let next = if index >= db.buckets.len() { 0 } else { index as u64 };
        Ok((next, out))
    }

    fn key_types(&mut self, names: &[KeyName]) -> Result<Vec<KeyKind>> {
        let mut state = self.shared.lock();
        state.check_online()?;
        let db = state.db();
        Ok(names
            .iter()
            .map(|name| db.find(name).map_or(KeyKind::None, |v| v.kind.clone()))
            .collect())
    }

    fn ttl(&mut self, name: &KeyName) -> Result<Ttl> {
        let mut state = self.shared.lock();
        state.check_online()?;
        Ok(Ttl::from_raw(state.db().find(name).map_or(-2, |v| v.ttl)))
    }

    fn memory_usage(&mut self, name: &KeyName) -> Result<Option<u64>> {
        let mut state = self.shared.lock();
        state.check_online()?;
        Ok(state.db().find(name).map(|v| v.size))
    }

    fn db_size(&mut self) -> Result<Option<u64>> {
        let mut state = self.shared.lock();
        state.check_online()?;
        Ok(Some(state.db().entries.len() as u64))
    }

    fn select_db(&mut self, db: u32) -> Result<()> {
        let mut state = self.shared.lock();
        state.check_online()?;
        let index = db as usize;
        if index >= DATABASES {
            return Err(KeyspaceError::InvalidArgument(format!(
                "database {db} out of range (0..{DATABASES})"
            )));
        }
        state.selected = index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(store: &mut MemoryStore, count: usize) -> Vec<Vec<u8>> {
        let mut cursor = 0;
        let mut out = Vec::new();
        loop {
            let (next, keys) = store.scan(cursor, None, count).unwrap();
            out.extend(keys);
            if next == 0 {
                return out;
            }
            cursor = next;
        }
    }

    #[test]
    fn generated_keyspace_is_deterministic() {
        let a = MemoryStore::generated(&GeneratedKeyspace::new(200, 3));
        let b = MemoryStore::generated(&GeneratedKeyspace::new(200, 3));
        let mut left = scan_all(&mut a.clone(), 50);
        let mut right = scan_all(&mut b.clone(), 50);
        left.sort();
        right.sort();
        assert_eq!(left, right);
        assert_eq!(a.len(), 200);
    }

    #[test]
    fn duplicates_repeat_previous_bucket() {
        let keys: Vec<String> = (0..400).map(|i| format!("d:{i}")).collect();
        let mut store = MemoryStore::from_keys(keys.iter().map(String::as_str));
        store.set_duplicates(true);
        let all = scan_all(&mut store, 20);
        assert!(all.len() > 400);
        let mut distinct = all.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 400);
    }

    #[test]
    fn databases_are_isolated() {
        let mut store = MemoryStore::from_keys(["zero"]);
        store.select_db(3).unwrap();
        assert!(store.is_empty());
        store.insert("three", KeyKind::Hash);
        assert_eq!(store.db_size().unwrap(), Some(1));
        store.select_db(0).unwrap();
        assert_eq!(scan_all(&mut store, 10), vec![b"zero".to_vec()]);
        assert!(store.select_db(16).is_err());
    }

    #[test]
    fn rename_moves_value() {
        let store = MemoryStore::from_keys(["a"]);
        store.rename("a", "b").unwrap();
        assert!(!store.remove("a"));
        assert!(store.remove("b"));
        assert!(store.rename("a", "c").is_err());
    }

    #[test]
    fn load_lines_reads_names_and_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.txt");
        fs::write(&path, "# comment\nuser:1\thash\n\nsession:abc\n").unwrap();
        let mut store = MemoryStore::load_lines(&path).unwrap();
        assert_eq!(store.len(), 2);
        let kinds = store
            .key_types(&["user:1".into(), "session:abc".into()])
            .unwrap();
        assert_eq!(kinds, vec![KeyKind::Hash, KeyKind::String]);
    }
}
