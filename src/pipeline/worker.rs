use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::{AbortReason, KeyEvent, PipelineCommand, PipelineState, PipelineStatus};
use crate::error::KeyspaceError;
use crate::filter::FilterCommand;
use crate::generation::{Generation, Lane};
use crate::notify::{coarsen, ChangeNotice, Event};
use crate::scan::{describe_keys, glob_match_bytes, CursorScanner, ScanCursor, StoreClient};
use crate::session::SessionContext;
use crate::trie::{Insertion, KeyName, KeyPath, Trie};

/// State of the scan generation being loaded.
struct ScanRun {
    token: Generation,
    scanner: CursorScanner,
    cursor: ScanCursor,
    pending: VecDeque<KeyName>,
    started: Instant,
}

/// Trie changes collected while holding the write lock.
#[derive(Default)]
struct Delta {
    prefixes: Vec<KeyPath>,
    inserted: Vec<KeyName>,
    removed: Vec<KeyName>,
    total: u64,
}

impl Delta {
    fn touch(&mut self, trie: &Trie, name: &KeyName) {
        let path = trie.path_of(name);
        self.prefixes.push(path.parent().unwrap_or_default());
    }

    fn commit(&mut self, trie: &mut Trie, name: KeyName, stamp: u64) {
        self.touch(trie, &name);
        if trie.commit(&name, stamp) == Insertion::Added {
            self.inserted.push(name);
        }
    }

    fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

pub(super) struct PipelineWorker {
    ctx: Arc<SessionContext>,
    client: Box<dyn StoreClient>,
    commands: Receiver<PipelineCommand>,
    filter: Sender<FilterCommand>,
    status: Arc<Mutex<PipelineStatus>>,
    scan: Option<ScanRun>,
    pattern: Option<String>,
}

impl PipelineWorker {
    pub(super) fn new(
        ctx: Arc<SessionContext>,
        client: Box<dyn StoreClient>,
        commands: Receiver<PipelineCommand>,
        filter: Sender<FilterCommand>,
        status: Arc<Mutex<PipelineStatus>>,
    ) -> Self {
        Self {
            ctx,
            client,
            commands,
            filter,
            status,
            scan: None,
            pattern: None,
        }
    }

    pub(super) fn run(mut self) {
        info!(store = %self.client.label(), "pipeline.worker.started");
        loop {
            let command = if self.scan.is_some() {
                match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => Some(PipelineCommand::Shutdown),
                }
            } else {
                Some(self.commands.recv().unwrap_or(PipelineCommand::Shutdown))
            };
            match command {
                Some(command) => {
                    if !self.handle(command) {
                        break;
                    }
                }
                None => self.step(),
            }
        }
        info!("pipeline.worker.stopped");
    }

    /// Returns `false` once the worker should exit.
    fn handle(&mut self, command: PipelineCommand) -> bool {
        match command {
            PipelineCommand::Refresh { token, pattern } => self.start_scan(token, pattern),
            PipelineCommand::Cancel { token } => self.cancel(token),
            PipelineCommand::Apply(event) => self.apply_event(event),
            PipelineCommand::Inspect(names) => self.inspect(names),
            PipelineCommand::Reconnect { token, client } => {
                info!(store = %client.label(), %token, "pipeline.reconnect");
                self.client = client;
                self.reset_epoch(token);
            }
            PipelineCommand::SwitchDb { token, db } => match self.client.select_db(db) {
                Ok(()) => {
                    info!(db, %token, "pipeline.switch_db");
                    self.reset_epoch(token);
                }
                Err(err) => {
                    warn!(db, %err, "pipeline.switch_db.failed");
                    self.record_error(&err);
                    self.publish_status(token);
                }
            },
            PipelineCommand::Shutdown => {
                if self.scan.take().is_some() {
                    self.update_status(|status| status.state = PipelineState::Aborted(AbortReason::Disconnected));
                }
                return false;
            }
        }
        true
    }

    fn start_scan(&mut self, token: Generation, pattern: Option<String>) {
        if let Some(previous) = self.scan.take() {
            debug!(previous = %previous.token, %token, "pipeline.scan.superseded");
        }
        let scanner = CursorScanner::new(&self.ctx.config, pattern);
        let pattern = scanner.pattern().map(str::to_string);
        if pattern != self.pattern {
            debug!(from = ?self.pattern, to = ?pattern, "pipeline.scan.pattern_changed");
            self.clear_index(token);
            self.pattern = pattern.clone();
        }
        let estimated_total = if pattern.is_none() {
            match self.client.db_size() {
                Ok(size) => size,
                Err(err) => {
                    debug!(%err, "pipeline.scan.db_size_unavailable");
                    None
                }
            }
        } else {
            None
        };
        let distinct = self.ctx.trie.read().len();
        {
            let mut status = self.status.lock();
            *status = PipelineStatus {
                generation: token,
                state: PipelineState::Scanning,
                pattern: pattern.clone(),
                distinct,
                estimated_total,
                ..PipelineStatus::default()
            };
        }
        info!(%token, pattern = ?pattern, estimated_total, "pipeline.scan.start");
        self.scan = Some(ScanRun {
            token,
            scanner,
            cursor: ScanCursor::start(),
            pending: VecDeque::new(),
            started: Instant::now(),
        });
        self.publish_status(token);
    }

    /// Stops the running scan and re-publishes the status under `token`.
    ///
    /// A scan already aborted as superseded keeps that reason.
    fn cancel(&mut self, token: Generation) {
        let run = self.scan.take();
        if let Some(run) = &run {
            info!(scan = %run.token, "pipeline.scan.cancelled");
        }
        self.update_status(|status| {
            status.generation = token;
            if run.is_some() {
                status.state = PipelineState::Aborted(AbortReason::Cancelled);
            }
        });
        self.publish_status(token);
    }

    /// Advances the running scan by one batch fetch or one merge chunk.
    fn step(&mut self) {
        let Some(run) = self.scan.as_mut() else {
            return;
        };
        let token = run.token;
        if !self.ctx.notifier.is_current(token, Lane::Scan) {
            self.abort(AbortReason::Superseded, None);
            return;
        }
        if !run.pending.is_empty() {
            self.merge_chunk();
            return;
        }
        if run.cursor.complete {
            self.complete();
            return;
        }
        match run.scanner.next_batch(self.client.as_mut(), run.cursor) {
            Ok(batch) => {
                run.cursor = batch.next;
                let fetched = batch.keys.len() as u64;
                run.pending.extend(batch.keys);
                let batches = {
                    let mut status = self.status.lock();
                    status.batches += 1;
                    status.keys_seen += fetched;
                    status.malformed += batch.malformed as u64;
                    status.batches
                };
                trace!(%token, batches, fetched, done = batch.done, "pipeline.scan.batch");
                self.publish_status(token);
            }
            Err(err) if err.is_connection_loss() => self.abort(AbortReason::ConnectionLost, Some(err)),
            Err(err) => self.abort(AbortReason::Failed, Some(err)),
        }
    }

    /// Merges pending keys under one write lock, bounded by count and time.
    fn merge_chunk(&mut self) {
        let Some(run) = self.scan.as_mut() else {
            return;
        };
        let config = &self.ctx.config;
        let started = Instant::now();
        let mut delta = Delta::default();
        let mut merged = 0usize;
        {
            let mut trie = self.ctx.trie.write();
            while let Some(name) = run.pending.pop_front() {
                if trie.insert_seen(&name, run.token.scan) == Insertion::Added {
                    delta.touch(&trie, &name);
                    delta.inserted.push(name);
                }
                merged += 1;
                if merged >= config.merge_chunk || started.elapsed() >= config.merge_slice {
                    break;
                }
            }
            delta.total = trie.len();
        }
        let token = run.token;
        trace!(
            %token,
            merged,
            inserted = delta.inserted.len(),
            backlog = run.pending.len(),
            "pipeline.merge.chunk"
        );
        self.status.lock().distinct = delta.total;
        self.publish_delta(Some(token), delta);
        thread::yield_now();
    }

    fn complete(&mut self) {
        let Some(run) = self.scan.take() else {
            return;
        };
        let mut delta = Delta::default();
        if self.ctx.config.prune_on_complete {
            let mut trie = self.ctx.trie.write();
            let mut stale = trie.stale_keys(run.token.scan);
            if let Some(pattern) = &self.pattern {
                stale.retain(|name| glob_match_bytes(pattern, name.as_bytes()));
            }
            for name in stale {
                delta.touch(&trie, &name);
                if trie.remove(&name) {
                    delta.removed.push(name);
                }
            }
            delta.total = trie.len();
        }
        let pruned = delta.removed.len();
        let distinct = self.ctx.trie.read().len();
        self.update_status(|status| {
            status.state = PipelineState::Complete;
            status.distinct = distinct;
        });
        info!(
            token = %run.token,
            distinct,
            pruned,
            elapsed_ms = run.started.elapsed().as_millis() as u64,
            "pipeline.scan.complete"
        );
        self.publish_delta(Some(run.token), delta);
        self.publish_status(run.token);
    }

    fn abort(&mut self, reason: AbortReason, error: Option<KeyspaceError>) {
        let Some(run) = self.scan.take() else {
            return;
        };
        match &error {
            Some(err) => warn!(token = %run.token, ?reason, %err, "pipeline.scan.aborted"),
            None => debug!(token = %run.token, ?reason, "pipeline.scan.aborted"),
        }
        self.update_status(|status| {
            status.state = PipelineState::Aborted(reason);
            if let Some(err) = &error {
                status.last_error = Some(err.to_string());
            }
        });
        self.publish_status(run.token);
    }

    fn apply_event(&mut self, event: KeyEvent) {
        let stamp = self
            .scan
            .as_ref()
            .map_or(self.ctx.notifier.current().scan, |run| run.token.scan);
        debug!(?event, "pipeline.event.apply");
        let mut delta = Delta::default();
        {
            let mut trie = self.ctx.trie.write();
            match event {
                KeyEvent::Created(name) | KeyEvent::Updated(name) => delta.commit(&mut trie, name, stamp),
                KeyEvent::Deleted(name) => {
                    delta.touch(&trie, &name);
                    if trie.remove(&name) {
                        delta.removed.push(name);
                    }
                }
                KeyEvent::Renamed { from, to } => {
                    delta.touch(&trie, &from);
                    if trie.remove(&from) {
                        delta.removed.push(from);
                    }
                    delta.commit(&mut trie, to, stamp);
                }
                KeyEvent::Staged { name, kind } => {
                    delta.touch(&trie, &name);
                    if trie.stage(&name, kind) == Insertion::Added {
                        delta.inserted.push(name);
                    }
                }
            }
            delta.total = trie.len();
        }
        self.status.lock().distinct = delta.total;
        self.publish_delta(None, delta);
    }

    /// Fetches attributes of `names` and stores them on their records.
    fn inspect(&mut self, names: Vec<KeyName>) {
        let batch = self.ctx.config.inspect_batch;
        for chunk in names.chunks(batch) {
            let metas = match describe_keys(self.client.as_mut(), chunk) {
                Ok(metas) => metas,
                Err(err) if err.is_connection_loss() => {
                    self.record_error(&err);
                    self.abort(AbortReason::ConnectionLost, Some(err));
                    return;
                }
                Err(err) => {
                    debug!(%err, keys = chunk.len(), "pipeline.inspect.failed");
                    continue;
                }
            };
            let mut delta = Delta::default();
            {
                let mut trie = self.ctx.trie.write();
                for (name, meta) in chunk.iter().zip(metas) {
                    if trie.set_meta(name, Some(meta)) {
                        delta.touch(&trie, name);
                    }
                }
                delta.total = trie.len();
            }
            trace!(keys = chunk.len(), "pipeline.inspect.batch");
            self.publish_delta(None, delta);
        }
    }

    fn reset_epoch(&mut self, token: Generation) {
        self.scan = None;
        self.pattern = None;
        self.clear_index(token);
        *self.status.lock() = PipelineStatus {
            generation: token,
            ..PipelineStatus::default()
        };
        self.publish_status(token);
    }

    fn clear_index(&mut self, token: Generation) {
        debug!(%token, "pipeline.index.cleared");
        self.ctx.trie.write().clear();
        let _ = self.filter.send(FilterCommand::Cleared);
        self.ctx.notifier.broadcast(Event::Changed(ChangeNotice {
            prefixes: vec![KeyPath::root()],
            inserted: 0,
            removed: 0,
            total: 0,
        }));
    }

    /// Publishes a change notice and forwards the delta to the filter.
    ///
    /// Scan deltas are dropped once their generation is stale; event deltas
    /// are always delivered.
    fn publish_delta(&self, token: Option<Generation>, delta: Delta) {
        if delta.is_empty() {
            return;
        }
        let notice = ChangeNotice {
            prefixes: coarsen(delta.prefixes, self.ctx.config.max_prefixes),
            inserted: delta.inserted.len(),
            removed: delta.removed.len(),
            total: delta.total,
        };
        let event = Event::Changed(notice);
        match token {
            Some(token) => self.ctx.notifier.publish(token, Lane::Scan, event),
            None => self.ctx.notifier.broadcast(event),
        };
        if !delta.inserted.is_empty() {
            let _ = self.filter.send(FilterCommand::Inserted(delta.inserted));
        }
        if !delta.removed.is_empty() {
            let _ = self.filter.send(FilterCommand::Removed(delta.removed));
        }
    }

    fn publish_status(&self, token: Generation) {
        let status = self.status.lock().clone();
        self.ctx
            .notifier
            .publish(token, Lane::Scan, Event::Pipeline(status));
    }

    fn update_status(&self, update: impl FnOnce(&mut PipelineStatus)) {
        update(&mut *self.status.lock());
    }

    fn record_error(&self, err: &KeyspaceError) {
        self.status.lock().last_error = Some(err.to_string());
    }
}
