//! Live fuzzy filtering of the keyspace.
//!
//! Query changes are debounced and scored on a dedicated worker in time
//! slices. A result is published into the shared [`FilterView`] only while
//! its generation is current; results of superseded queries are dropped at
//! the next slice boundary. Keys merged or removed by the pipeline are
//! forwarded here and folded into the published result incrementally.

mod fuzzy;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};

pub use fuzzy::{is_subsequence, Matcher};

use crate::error::{KeyspaceError, Result};
use crate::generation::{Generation, Lane};
use crate::notify::{Event, FilterNotice};
use crate::session::SessionContext;
use crate::trie::{KeyName, Trie};

/// Scores of matching keys.
pub type MatchSet = FxHashMap<KeyName, u32>;

/// Messages understood by the filter worker.
#[derive(Debug)]
pub(crate) enum FilterCommand {
    Query { token: Generation, text: String },
    Inserted(Vec<KeyName>),
    Removed(Vec<KeyName>),
    Cleared,
    Shutdown,
}

/// Latest published filter result.
#[derive(Debug)]
pub struct FilterView {
    /// Generation the result was computed for.
    pub generation: Generation,
    /// Query text.
    pub query: String,
    /// Whether a non-empty query is applied.
    pub active: bool,
    /// Matching keys with their scores.
    pub matches: Arc<MatchSet>,
    /// Namespace of the matching keys only.
    pub projection: Trie,
}

impl FilterView {
    fn empty(delimiter: &str) -> Self {
        Self {
            generation: Generation::default(),
            query: String::new(),
            active: false,
            matches: Arc::default(),
            projection: Trie::new(delimiter),
        }
    }
}

/// Immutable view of a published result.
#[derive(Clone, Debug)]
pub struct MatchSnapshot {
    /// Generation the result belongs to.
    pub generation: Generation,
    /// Query text.
    pub query: String,
    /// Whether a non-empty query is applied.
    pub active: bool,
    matches: Arc<MatchSet>,
}

impl MatchSnapshot {
    /// Number of matching keys.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether nothing matched.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Score of `name`, if it matched.
    pub fn score(&self, name: &KeyName) -> Option<u32> {
        self.matches.get(name).copied()
    }

    /// Best `limit` matches, highest score first, ties by name.
    pub fn top(&self, limit: usize) -> Vec<(KeyName, u32)> {
        let mut ranked: Vec<(KeyName, u32)> = self
            .matches
            .iter()
            .map(|(name, score)| (name.clone(), *score))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}

/// Handle to the filter worker.
pub struct FilterEngine {
    ctx: Arc<SessionContext>,
    commands: Sender<FilterCommand>,
    view: Arc<RwLock<FilterView>>,
    worker: Option<JoinHandle<()>>,
    query: String,
}

impl FilterEngine {
    pub(crate) fn spawn(ctx: Arc<SessionContext>) -> Result<Self> {
        let (commands, receiver) = mpsc::channel();
        let view = Arc::new(RwLock::new(FilterView::empty(&ctx.config.delimiter)));
        let worker = FilterWorker {
            ctx: Arc::clone(&ctx),
            view: Arc::clone(&view),
            receiver,
            pending: None,
            buffered: Vec::new(),
            stopping: false,
        };
        let handle = thread::Builder::new()
            .name("keyscope-filter".into())
            .spawn(move || worker.run())?;
        Ok(Self {
            ctx,
            commands,
            view,
            worker: Some(handle),
            query: String::new(),
        })
    }

    pub(crate) fn updates(&self) -> Sender<FilterCommand> {
        self.commands.clone()
    }

    pub(crate) fn view(&self) -> &Arc<RwLock<FilterView>> {
        &self.view
    }

    /// Replaces the query, superseding any computation in flight.
    ///
    /// Returns the new filter generation. An unchanged query keeps the
    /// current generation.
    pub fn set_query(&mut self, text: &str) -> Result<Generation> {
        if text == self.query {
            return Ok(self.ctx.notifier.current());
        }
        self.query = text.to_string();
        self.requery()
    }

    /// Recomputes the current query under a new generation.
    pub(crate) fn requery(&mut self) -> Result<Generation> {
        let token = self.ctx.notifier.advance(Lane::Filter);
        debug!(%token, query = %self.query, "filter.query.set");
        self.commands
            .send(FilterCommand::Query {
                token,
                text: self.query.clone(),
            })
            .map_err(|_| KeyspaceError::WorkerGone("filter"))?;
        Ok(token)
    }

    /// Current query text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Whether the published result belongs to the current query.
    pub fn is_settled(&self) -> bool {
        let generation = self.view.read().generation;
        self.ctx.notifier.is_current(generation, Lane::Filter)
    }

    /// Latest completed result, tagged with its generation.
    pub fn current_matches(&self) -> MatchSnapshot {
        let view = self.view.read();
        MatchSnapshot {
            generation: view.generation,
            query: view.query.clone(),
            active: view.active,
            matches: Arc::clone(&view.matches),
        }
    }

    /// Number of keys in the latest completed result.
    pub fn match_count(&self) -> usize {
        self.view.read().matches.len()
    }

    /// Best `limit` keys of the latest completed result.
    pub fn top(&self, limit: usize) -> Vec<(KeyName, u32)> {
        self.current_matches().top(limit)
    }

    /// Stops the worker and waits for it.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(FilterCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("filter.worker.panicked");
            }
        }
    }
}

impl Drop for FilterEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug)]
enum Update {
    Inserted(Vec<KeyName>),
    Removed(Vec<KeyName>),
    Cleared,
}

/// Scoring state of one query over a frozen candidate list.
struct MatchJob {
    token: Generation,
    matcher: Matcher,
    candidates: Vec<KeyName>,
    next: usize,
    matches: MatchSet,
}

impl MatchJob {
    fn new(token: Generation, matcher: Matcher, candidates: Vec<KeyName>) -> Self {
        Self {
            token,
            matcher,
            candidates,
            next: 0,
            matches: MatchSet::default(),
        }
    }

    /// Scores candidates until done or `budget` runs out.
    fn advance(&mut self, budget: Duration, check_every: usize) -> Result<()> {
        let started = Instant::now();
        while self.next < self.candidates.len() {
            let end = (self.next + check_every).min(self.candidates.len());
            for name in &self.candidates[self.next..end] {
                if let Some(score) = self.matcher.score(name.as_str()) {
                    self.matches.insert(name.clone(), score);
                }
            }
            self.next = end;
            let elapsed = started.elapsed();
            if self.next < self.candidates.len() && elapsed >= budget {
                return Err(KeyspaceError::FilterTimeout {
                    generation: self.token.filter,
                    processed: self.next,
                    elapsed,
                });
            }
        }
        Ok(())
    }
}

/// Fails with `Cancelled` once `token` no longer names the current query.
fn checkpoint(ctx: &SessionContext, token: Generation) -> Result<()> {
    if ctx.notifier.is_current(token, Lane::Filter) {
        Ok(())
    } else {
        Err(KeyspaceError::Cancelled)
    }
}

struct FilterWorker {
    ctx: Arc<SessionContext>,
    view: Arc<RwLock<FilterView>>,
    receiver: Receiver<FilterCommand>,
    pending: Option<(Generation, String)>,
    buffered: Vec<Update>,
    stopping: bool,
}

impl FilterWorker {
    fn run(mut self) {
        info!("filter.worker.started");
        while let Some((token, text)) = self.next_query() {
            self.execute(token, text);
            self.flush();
            if self.stopping {
                break;
            }
        }
        info!("filter.worker.stopped");
    }

    /// Waits until a query has been quiet for the debounce window, applying
    /// live updates meanwhile. `None` once the worker should stop.
    fn next_query(&mut self) -> Option<(Generation, String)> {
        let debounce = self.ctx.config.filter.debounce;
        let mut deadline = self.pending.as_ref().map(|_| Instant::now() + debounce);
        loop {
            let command = match deadline {
                None => self.receiver.recv().ok()?,
                Some(at) => match self.receiver.recv_timeout(at.saturating_duration_since(Instant::now())) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        trace!("filter.query.debounced");
                        return self.pending.take();
                    }
                    Err(RecvTimeoutError::Disconnected) => return None,
                },
            };
            match command {
                FilterCommand::Query { token, text } => {
                    self.pending = Some((token, text));
                    deadline = Some(Instant::now() + debounce);
                }
                FilterCommand::Inserted(names) => self.apply(Update::Inserted(names)),
                FilterCommand::Removed(names) => self.apply(Update::Removed(names)),
                FilterCommand::Cleared => self.apply(Update::Cleared),
                FilterCommand::Shutdown => return None,
            }
        }
    }

    fn execute(&mut self, token: Generation, text: String) {
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;
        let matcher = Matcher::new(&text, &config.filter, &config.delimiter);
        if matcher.is_empty() {
            self.publish(token, text, MatchSet::default());
            return;
        }
        let candidates = {
            let view = self.view.read();
            if view.active && is_subsequence(&view.query, &text, config.filter.case_sensitive) {
                debug!(previous = %view.query, candidates = view.matches.len(), "filter.job.narrowed");
                view.matches.keys().cloned().collect()
            } else {
                ctx.trie.read().keys()
            }
        };
        let total = candidates.len();
        let mut job = MatchJob::new(token, matcher, candidates);
        let started = Instant::now();
        loop {
            let slice = checkpoint(&ctx, token)
                .and_then(|()| job.advance(config.filter.slice, config.filter.slice_check_every));
            match slice {
                Ok(()) => break,
                Err(KeyspaceError::Cancelled) => {
                    debug!(%token, processed = job.next, total, "filter.job.cancelled");
                    return;
                }
                Err(err) if err.is_retryable() => {
                    trace!(%err, "filter.slice.yield");
                    self.poll();
                    if self.stopping {
                        return;
                    }
                    thread::yield_now();
                }
                Err(err) => {
                    warn!(%err, "filter.job.failed");
                    return;
                }
            }
        }
        debug!(
            %token,
            total,
            matches = job.matches.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "filter.job.done"
        );
        self.publish(token, text, job.matches);
    }

    fn publish(&self, token: Generation, text: String, matches: MatchSet) {
        let mut projection = Trie::new(self.ctx.config.delimiter.as_str());
        for name in matches.keys() {
            projection.insert(name);
        }
        let count = matches.len();
        let view = &self.view;
        let published = self.ctx.notifier.publish_with(token, Lane::Filter, || {
            let mut view = view.write();
            view.generation = token;
            view.active = !text.is_empty();
            view.query = text.clone();
            view.matches = Arc::new(matches);
            view.projection = projection;
            Event::Filter(FilterNotice {
                query: text.clone(),
                matches: count,
            })
        });
        if !published {
            debug!(%token, "filter.job.superseded");
        }
    }

    /// Collects commands that arrived while a job was running.
    fn poll(&mut self) {
        loop {
            match self.receiver.try_recv() {
                Ok(FilterCommand::Query { token, text }) => self.pending = Some((token, text)),
                Ok(FilterCommand::Inserted(names)) => self.buffered.push(Update::Inserted(names)),
                Ok(FilterCommand::Removed(names)) => self.buffered.push(Update::Removed(names)),
                Ok(FilterCommand::Cleared) => self.buffered.push(Update::Cleared),
                Ok(FilterCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                    self.stopping = true;
                    return;
                }
                Err(TryRecvError::Empty) => return,
            }
        }
    }

    fn flush(&mut self) {
        for update in std::mem::take(&mut self.buffered) {
            self.apply(update);
        }
    }

    /// Folds a trie change into the published result.
    fn apply(&self, update: Update) {
        let config = &self.ctx.config;
        let mut view = self.view.write();
        if !view.active {
            return;
        }
        let before = view.matches.len();
        let mut changed = false;
        match update {
            Update::Inserted(names) => {
                let matcher = Matcher::new(&view.query, &config.filter, &config.delimiter);
                for name in names {
                    if let Some(score) = matcher.score(name.as_str()) {
                        Arc::make_mut(&mut view.matches).insert(name.clone(), score);
                        view.projection.insert(&name);
                        changed = true;
                    }
                }
            }
            Update::Removed(names) => {
                for name in names {
                    if view.matches.contains_key(&name) {
                        Arc::make_mut(&mut view.matches).remove(&name);
                        view.projection.remove(&name);
                        changed = true;
                    }
                }
            }
            Update::Cleared => {
                changed = !view.matches.is_empty();
                view.matches = Arc::default();
                view.projection.clear();
            }
        }
        if !changed {
            return;
        }
        let notice = FilterNotice {
            query: view.query.clone(),
            matches: view.matches.len(),
        };
        let token = view.generation;
        drop(view);
        trace!(before, after = notice.matches, "filter.view.updated");
        self.ctx
            .notifier
            .publish(token, Lane::Filter, Event::Filter(notice));
    }
}
