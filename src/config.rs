//! Tunables for scanning, merging, filtering and rendering.
//!
//! None of these values are part of the behavioural contract; they trade
//! latency against throughput and can be adjusted per keyspace.

use std::time::Duration;

/// Smallest accepted scan batch hint.
pub const MIN_SCAN_COUNT: usize = 10;
/// Largest accepted scan batch hint.
pub const MAX_SCAN_COUNT: usize = 1_000_000;

/// Configuration shared by every component of a session.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Separator used to derive the hierarchy from flat key names.
    pub delimiter: String,
    /// Target number of keys per scan batch (a hint for the store).
    pub scan_count: usize,
    /// Maximum store round trips spent assembling one batch.
    pub scan_max_round_trips: usize,
    /// Maximum keys merged into the trie under one write lock.
    pub merge_chunk: usize,
    /// Maximum wall time spent merging one chunk.
    pub merge_slice: Duration,
    /// Children listed per page of a node.
    pub page_size: usize,
    /// Affected prefixes reported per change notice before coarsening.
    pub max_prefixes: usize,
    /// Drop keys not seen by a completed rescan.
    pub prune_on_complete: bool,
    /// Keys described per point-lookup round.
    pub inspect_batch: usize,
    /// Fuzzy filter settings.
    pub filter: FilterConfig,
    /// View model settings.
    pub view: ViewConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            delimiter: ":".to_string(),
            scan_count: 2000,
            scan_max_round_trips: 64,
            merge_chunk: 512,
            merge_slice: Duration::from_millis(4),
            page_size: 500,
            max_prefixes: 64,
            prune_on_complete: true,
            inspect_batch: 128,
            filter: FilterConfig::default(),
            view: ViewConfig::default(),
        }
    }
}

impl IndexConfig {
    /// Small slices everywhere; favours frame latency over scan throughput.
    pub fn interactive() -> Self {
        Self {
            scan_count: 500,
            merge_chunk: 128,
            merge_slice: Duration::from_millis(2),
            page_size: 200,
            filter: FilterConfig {
                slice: Duration::from_millis(4),
                ..FilterConfig::default()
            },
            ..Self::default()
        }
    }

    /// Larger batches for keyspaces with millions of keys.
    pub fn large_keyspace() -> Self {
        Self {
            scan_count: 10_000,
            scan_max_round_trips: 128,
            merge_chunk: 2048,
            merge_slice: Duration::from_millis(8),
            page_size: 1000,
            max_prefixes: 128,
            ..Self::default()
        }
    }

    /// Same configuration with a different delimiter.
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Clamps out-of-range values to usable ones.
    pub fn normalize(mut self) -> Self {
        self.scan_count = self.scan_count.clamp(MIN_SCAN_COUNT, MAX_SCAN_COUNT);
        if self.scan_max_round_trips == 0 {
            self.scan_max_round_trips = 1;
        }
        if self.merge_chunk == 0 {
            self.merge_chunk = 1;
        }
        if self.merge_slice.is_zero() {
            self.merge_slice = Duration::from_micros(500);
        }
        if self.page_size == 0 {
            self.page_size = 1;
        }
        if self.max_prefixes == 0 {
            self.max_prefixes = 1;
        }
        if self.inspect_batch == 0 {
            self.inspect_batch = 1;
        }
        self.filter = self.filter.normalize();
        self
    }
}

/// Fuzzy filter configuration.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Query changes closer together than this collapse to the latest.
    pub debounce: Duration,
    /// Time budget of one scoring slice.
    pub slice: Duration,
    /// Candidates scored between clock checks.
    pub slice_check_every: usize,
    /// Match case exactly instead of folding.
    pub case_sensitive: bool,
    /// Scoring weights.
    pub weights: ScoreWeights,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(120),
            slice: Duration::from_millis(8),
            slice_check_every: 256,
            case_sensitive: false,
            weights: ScoreWeights::default(),
        }
    }
}

impl FilterConfig {
    fn normalize(mut self) -> Self {
        if self.slice.is_zero() {
            self.slice = Duration::from_millis(1);
        }
        if self.slice_check_every == 0 {
            self.slice_check_every = 1;
        }
        self
    }
}

/// Weights of the fuzzy score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    /// Score for every matched query character.
    pub per_char: u32,
    /// Extra score when a character directly follows the previous match.
    pub consecutive: u32,
    /// Extra score when a character starts a segment.
    pub boundary: u32,
    /// Penalty for every skipped character inside the match window.
    pub gap: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            per_char: 16,
            consecutive: 12,
            boundary: 10,
            gap: 1,
        }
    }
}

/// Rendering defaults of the view model.
#[derive(Debug, Clone)]
pub struct ViewConfig {
    /// Nodes shallower than this are expanded unless collapsed.
    pub auto_expand_depth: usize,
    /// Same as `auto_expand_depth` while a filter is active.
    pub filter_expand_depth: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            auto_expand_depth: 1,
            filter_expand_depth: usize::MAX,
        }
    }
}
