//! Generation tokens that tie background work to the state it was started for.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of the (connection epoch, scan, filter) counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Generation {
    /// Bumped on reconnect and database switch.
    pub epoch: u64,
    /// Bumped whenever a scan starts or is cancelled.
    pub scan: u64,
    /// Bumped on every query change.
    pub filter: u64,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}/s{}/f{}", self.epoch, self.scan, self.filter)
    }
}

/// Which counter a piece of work depends on besides the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lane {
    /// Scan and merge work.
    Scan,
    /// Filter recomputation.
    Filter,
}

/// Live generation counters of one session.
///
/// Counters only move forward. Advancing goes through the notifier gate so
/// that advances and notification sends are totally ordered.
#[derive(Debug, Default)]
pub struct Generations {
    epoch: AtomicU64,
    scan: AtomicU64,
    filter: AtomicU64,
}

impl Generations {
    /// Current counters.
    pub fn current(&self) -> Generation {
        Generation {
            epoch: self.epoch.load(Ordering::Acquire),
            scan: self.scan.load(Ordering::Acquire),
            filter: self.filter.load(Ordering::Acquire),
        }
    }

    /// Whether work started under `token` is still wanted.
    pub fn is_current(&self, token: Generation, lane: Lane) -> bool {
        if self.epoch.load(Ordering::Acquire) != token.epoch {
            return false;
        }
        match lane {
            Lane::Scan => self.scan.load(Ordering::Acquire) == token.scan,
            Lane::Filter => self.filter.load(Ordering::Acquire) == token.filter,
        }
    }

    pub(crate) fn advance(&self, lane: Lane) -> Generation {
        match lane {
            Lane::Scan => self.scan.fetch_add(1, Ordering::AcqRel),
            Lane::Filter => self.filter.fetch_add(1, Ordering::AcqRel),
        };
        self.current()
    }

    pub(crate) fn advance_epoch(&self) -> Generation {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.scan.fetch_add(1, Ordering::AcqRel);
        self.filter.fetch_add(1, Ordering::AcqRel);
        self.current()
    }
}
