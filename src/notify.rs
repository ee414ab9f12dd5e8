//! Ordered, generation-gated notification stream.
//!
//! Every send and every generation advance happens under one gate, and a
//! send is dropped unless the sender's token is still current. A
//! notification for generation N therefore never follows one for N+1.

use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::trace;

use crate::generation::{Generation, Generations, Lane};
use crate::pipeline::PipelineStatus;
use crate::trie::KeyPath;

/// Tree changes produced by one merge chunk or key event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeNotice {
    /// Listings whose content or counts changed; the root means "anything".
    pub prefixes: Vec<KeyPath>,
    /// Keys added.
    pub inserted: usize,
    /// Keys removed.
    pub removed: usize,
    /// Distinct keys in the trie afterwards.
    pub total: u64,
}

impl ChangeNotice {
    /// Whether `path` lies on or under one of the changed prefixes, or above one.
    pub fn touches(&self, path: &KeyPath) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix) || prefix.starts_with(path))
    }
}

/// A filter result was published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterNotice {
    /// Query the result belongs to.
    pub query: String,
    /// Number of matching keys.
    pub matches: usize,
}

/// Payload of a [`Notification`].
#[derive(Clone, Debug)]
pub enum Event {
    /// The trie changed.
    Changed(ChangeNotice),
    /// The pipeline changed state or made progress.
    Pipeline(PipelineStatus),
    /// The filtered view changed.
    Filter(FilterNotice),
}

/// One message of the notification stream.
#[derive(Clone, Debug)]
pub struct Notification {
    /// Generation current when the notification was sent.
    pub generation: Generation,
    /// Position in the stream, starting at 1.
    pub seq: u64,
    /// What happened.
    pub event: Event,
}

struct Gate {
    sender: Option<Sender<Notification>>,
    seq: u64,
}

/// Sending side of the notification stream, owner of the generation counters.
pub struct Notifier {
    gate: Mutex<Gate>,
    generations: Generations,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("generation", &self.generations.current())
            .finish()
    }
}

impl Notifier {
    /// Creates a notifier and the receiving end of its stream.
    pub fn new() -> (Self, Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel();
        let notifier = Self {
            gate: Mutex::new(Gate {
                sender: Some(sender),
                seq: 0,
            }),
            generations: Generations::default(),
        };
        (notifier, receiver)
    }

    /// Current generation counters.
    pub fn current(&self) -> Generation {
        self.generations.current()
    }

    /// Whether work started under `token` is still wanted.
    pub fn is_current(&self, token: Generation, lane: Lane) -> bool {
        self.generations.is_current(token, lane)
    }

    /// Advances `lane`, invalidating in-flight work on it.
    pub fn advance(&self, lane: Lane) -> Generation {
        let _gate = self.gate.lock();
        self.generations.advance(lane)
    }

    /// Starts a new connection epoch, invalidating everything in flight.
    pub fn advance_epoch(&self) -> Generation {
        let _gate = self.gate.lock();
        self.generations.advance_epoch()
    }

    /// Sends `event` if `token` is still current on `lane`.
    pub fn publish(&self, token: Generation, lane: Lane, event: Event) -> bool {
        self.publish_with(token, lane, || event)
    }

    /// Sends `event` stamped with the current generation, whatever it is.
    ///
    /// For changes that stay valid across generations, such as key events.
    pub fn broadcast(&self, event: Event) -> bool {
        let mut gate = self.gate.lock();
        let generation = self.generations.current();
        Self::send(&mut gate, generation, event)
    }

    /// Like [`Notifier::publish`], but only builds the event once the token
    /// has been validated, still holding the gate.
    ///
    /// Side effects of `build` become visible before any later advance.
    pub fn publish_with(&self, token: Generation, lane: Lane, build: impl FnOnce() -> Event) -> bool {
        let mut gate = self.gate.lock();
        if !self.generations.is_current(token, lane) {
            trace!(%token, "notify.publish.stale");
            return false;
        }
        let event = build();
        Self::send(&mut gate, self.generations.current(), event)
    }

    fn send(gate: &mut Gate, generation: Generation, event: Event) -> bool {
        if gate.sender.is_none() {
            return false;
        }
        gate.seq += 1;
        let notification = Notification {
            generation,
            seq: gate.seq,
            event,
        };
        gate.sender
            .as_ref()
            .is_some_and(|sender| sender.send(notification).is_ok())
    }

    /// Stops delivering notifications.
    pub fn close(&self) {
        self.gate.lock().sender = None;
    }
}

/// Reduces a set of changed listings to at most `max` prefixes.
///
/// Beyond `max` distinct prefixes they collapse to their top-level
/// ancestors, and beyond `max` of those to the root.
pub fn coarsen(prefixes: impl IntoIterator<Item = KeyPath>, max: usize) -> Vec<KeyPath> {
    let mut distinct: FxHashSet<KeyPath> = prefixes.into_iter().collect();
    if distinct.len() > max {
        distinct = distinct.into_iter().map(|p| p.truncated(1)).collect();
    }
    if distinct.len() > max || distinct.contains(&KeyPath::root()) {
        return vec![KeyPath::root()];
    }
    let mut out: Vec<KeyPath> = distinct.into_iter().collect();
    out.sort();
    out
}
