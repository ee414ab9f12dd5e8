use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use smallvec::{smallvec, SmallVec};

use crate::error::{KeyspaceError, Result};

/// Segments of one key name, borrowed from the name.
pub type Segments<'a> = SmallVec<[&'a str; 8]>;

/// Full name of a key as stored in the index.
///
/// Names that could not be decoded as UTF-8 are kept as *opaque* names. They
/// keep their raw bytes, render as lossy text and always form a single
/// segment. Two opaque names are equal only when their bytes are, and an
/// opaque name never equals a decoded one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyName {
    text: Arc<str>,
    raw: Option<Arc<[u8]>>,
}

impl KeyName {
    /// Creates a regular, delimiter-splittable name.
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self {
            text: text.into(),
            raw: None,
        }
    }

    /// Creates a name from bytes that form exactly one segment.
    pub fn opaque(raw: impl Into<Vec<u8>>) -> Self {
        let raw: Vec<u8> = raw.into();
        Self {
            text: String::from_utf8_lossy(&raw).into(),
            raw: Some(raw.into()),
        }
    }

    /// Decodes raw key bytes, failing on invalid UTF-8.
    pub fn decode(raw: Vec<u8>) -> Result<Self> {
        match String::from_utf8(raw) {
            Ok(text) => Ok(Self::new(text)),
            Err(err) => Err(KeyspaceError::MalformedKeyName {
                raw: err.into_bytes(),
            }),
        }
    }

    /// Decodes raw key bytes, degrading undecodable names to opaque ones.
    pub fn decode_lossy(raw: Vec<u8>) -> Self {
        match String::from_utf8(raw) {
            Ok(text) => Self::new(text),
            Err(err) => Self::opaque(err.into_bytes()),
        }
    }

    /// Text of the name; lossy for opaque names.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Bytes of the name as the store knows it.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.raw {
            Some(raw) => raw,
            None => self.text.as_bytes(),
        }
    }

    /// Whether the name bypasses delimiter splitting.
    pub fn is_opaque(&self) -> bool {
        self.raw.is_some()
    }

    /// Path segments of this name under `delimiter`.
    pub fn segments<'a>(&'a self, delimiter: &str) -> Segments<'a> {
        if self.is_opaque() {
            smallvec![self.as_str()]
        } else {
            split_segments(self.as_str(), delimiter)
        }
    }
}

impl From<&str> for KeyName {
    fn from(value: &str) -> Self {
        KeyName::new(value)
    }
}

impl From<String> for KeyName {
    fn from(value: String) -> Self {
        KeyName::new(value)
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Splits `name` on `delimiter`.
///
/// The empty name and names made only of delimiters form one segment holding
/// the whole name, so they neither vanish nor collide with each other.
pub fn split_segments<'a>(name: &'a str, delimiter: &str) -> Segments<'a> {
    if delimiter.is_empty() || name.is_empty() || is_delimiter_run(name, delimiter) {
        return smallvec![name];
    }
    name.split(delimiter).collect()
}

fn is_delimiter_run(name: &str, delimiter: &str) -> bool {
    let unit = delimiter.as_bytes();
    name.len() % unit.len() == 0 && name.as_bytes().chunks(unit.len()).all(|chunk| chunk == unit)
}

/// Position of a node in the namespace, as labels from the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath(SmallVec<[Box<str>; 4]>);

impl KeyPath {
    /// The empty prefix.
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a path from labels.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(segments.into_iter().map(|s| Box::from(s.as_ref())).collect())
    }

    /// Path of the node holding `name`.
    pub fn of(name: &KeyName, delimiter: &str) -> Self {
        Self::from_segments(name.segments(delimiter))
    }

    /// Parses a delimiter-joined prefix; the empty string is the root.
    pub fn parse(text: &str, delimiter: &str) -> Self {
        if text.is_empty() {
            return Self::root();
        }
        Self::from_segments(split_segments(text, delimiter))
    }

    /// Labels from the root.
    pub fn segments(&self) -> &[Box<str>] {
        &self.0
    }

    /// Number of labels; the root has depth 0.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the empty prefix.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Last label, if any.
    pub fn label(&self) -> Option<&str> {
        self.0.last().map(|s| s.as_ref())
    }

    /// Enclosing prefix, `None` for the root.
    pub fn parent(&self) -> Option<KeyPath> {
        if self.is_root() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].iter().cloned().collect()))
    }

    /// Path of a direct child.
    pub fn child(&self, label: &str) -> KeyPath {
        let mut segments = self.0.clone();
        segments.push(Box::from(label));
        Self(segments)
    }

    /// Ancestor at `depth` (or the path itself when shallower).
    pub fn truncated(&self, depth: usize) -> KeyPath {
        Self(self.0.iter().take(depth).cloned().collect())
    }

    /// Whether `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Joins the labels with `delimiter`.
    pub fn join(&self, delimiter: &str) -> String {
        self.0
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join(delimiter)
    }
}

/// Data type of a key as reported by the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Plain string value.
    String,
    /// List value.
    List,
    /// Unordered set.
    Set,
    /// Sorted set.
    ZSet,
    /// Field/value hash.
    Hash,
    /// Append-only stream.
    Stream,
    /// The key no longer exists.
    None,
    /// Any other type name.
    Other(String),
}

impl KeyKind {
    /// Parses a type name as returned by the store.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "string" => KeyKind::String,
            "list" => KeyKind::List,
            "set" => KeyKind::Set,
            "zset" => KeyKind::ZSet,
            "hash" => KeyKind::Hash,
            "stream" => KeyKind::Stream,
            "none" => KeyKind::None,
            other => KeyKind::Other(other.to_string()),
        }
    }

    /// Type name.
    pub fn as_str(&self) -> &str {
        match self {
            KeyKind::String => "string",
            KeyKind::List => "list",
            KeyKind::Set => "set",
            KeyKind::ZSet => "zset",
            KeyKind::Hash => "hash",
            KeyKind::Stream => "stream",
            KeyKind::None => "none",
            KeyKind::Other(name) => name,
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remaining lifetime of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ttl {
    /// No expiry set.
    Persistent,
    /// Expires after the given duration.
    Expires(Duration),
    /// The key does not exist.
    Missing,
}

impl Ttl {
    /// Decodes the store convention: `-1` no expiry, `-2` missing key.
    pub fn from_raw(seconds: i64) -> Self {
        match seconds {
            -1 => Ttl::Persistent,
            s if s < 0 => Ttl::Missing,
            s => Ttl::Expires(Duration::from_secs(s as u64)),
        }
    }
}

/// Lazily fetched attributes of a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyMeta {
    /// Data type.
    pub kind: KeyKind,
    /// Remaining lifetime.
    pub ttl: Ttl,
    /// Approximate memory usage in bytes.
    pub size: Option<u64>,
}

/// Leaf payload of a trie node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRecord {
    /// Full key name.
    pub name: KeyName,
    /// Attributes, once described.
    pub meta: Option<KeyMeta>,
    /// Scan generation that last observed the key.
    pub seen: u64,
    /// Kind of a key created locally and not yet written to the store.
    pub staged: Option<KeyKind>,
}

impl KeyRecord {
    pub(crate) fn new(name: KeyName) -> Self {
        Self {
            name,
            meta: None,
            seen: 0,
            staged: None,
        }
    }

    /// Best known kind: described kind first, then staged kind.
    pub fn kind(&self) -> Option<&KeyKind> {
        self.meta
            .as_ref()
            .map(|meta| &meta.kind)
            .or(self.staged.as_ref())
    }
}
