//! Per-connection session: the facade the renderer talks to.
//!
//! A session owns the shared context (configuration, notifier, trie), the
//! pipeline and filter workers, and the view state. The interactive loop
//! calls into it and drains the notification stream; all heavy work runs
//! on the workers.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::error::Result;
use crate::filter::{FilterEngine, MatchSnapshot};
use crate::generation::{Generation, Lane};
use crate::notify::{Event, Notification, Notifier};
use crate::pipeline::{KeyEvent, Pipeline, PipelineCommand, PipelineStatus};
use crate::scan::StoreClient;
use crate::trie::{KeyName, KeyPath, KeyRecord, Trie};
use crate::view::{RenderMode, Row, ViewState};

/// State shared by every component of one session.
#[derive(Debug)]
pub struct SessionContext {
    pub(crate) config: IndexConfig,
    pub(crate) notifier: Notifier,
    pub(crate) trie: RwLock<Trie>,
}

impl SessionContext {
    /// Session configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Current generation counters.
    pub fn generation(&self) -> Generation {
        self.notifier.current()
    }
}

/// An open browsing session over one store connection.
pub struct Session {
    ctx: Arc<SessionContext>,
    filter: FilterEngine,
    pipeline: Pipeline,
    view: ViewState,
    pattern: Option<String>,
    torn_down: bool,
}

impl Session {
    /// Opens a session over `client` and returns it with its notification stream.
    ///
    /// Nothing is scanned until [`Session::refresh`] is called.
    pub fn open(client: Box<dyn StoreClient>, config: IndexConfig) -> Result<(Self, Receiver<Notification>)> {
        let config = config.normalize();
        let (notifier, notifications) = Notifier::new();
        let view = ViewState::new(config.view.clone(), config.page_size);
        let label = client.label();
        let ctx = Arc::new(SessionContext {
            trie: RwLock::new(Trie::new(config.delimiter.as_str())),
            notifier,
            config,
        });
        let filter = FilterEngine::spawn(Arc::clone(&ctx))?;
        let pipeline = Pipeline::spawn(Arc::clone(&ctx), client, filter.updates())?;
        info!(store = %label, delimiter = %ctx.config.delimiter, "session.open");
        let session = Self {
            ctx,
            filter,
            pipeline,
            view,
            pattern: None,
            torn_down: false,
        };
        Ok((session, notifications))
    }

    /// Shared context.
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Session configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.ctx.config
    }

    /// Current generation counters.
    pub fn generation(&self) -> Generation {
        self.ctx.notifier.current()
    }

    /// Rescans the keyspace with the current pattern.
    ///
    /// Keys already indexed stay browsable while the rescan runs.
    pub fn refresh(&mut self) -> Result<Generation> {
        let pattern = self.pattern.clone();
        self.start_scan(pattern)
    }

    /// Rescans only keys matching the store-side glob `pattern`.
    ///
    /// `None` or `*` scans everything. A different pattern clears the index first.
    pub fn refresh_matching(&mut self, pattern: Option<&str>) -> Result<Generation> {
        self.pattern = pattern.filter(|p| !p.is_empty() && *p != "*").map(str::to_string);
        self.start_scan(self.pattern.clone())
    }

    fn start_scan(&mut self, pattern: Option<String>) -> Result<Generation> {
        let token = self.ctx.notifier.advance(Lane::Scan);
        debug!(%token, ?pattern, "session.refresh");
        self.pipeline.send(PipelineCommand::Refresh { token, pattern })?;
        Ok(token)
    }

    /// Stops the running scan; merged keys are kept.
    pub fn cancel_scan(&mut self) -> Result<Generation> {
        let token = self.ctx.notifier.advance(Lane::Scan);
        self.pipeline.send(PipelineCommand::Cancel { token })?;
        Ok(token)
    }

    /// Replaces the store connection, drops the index and rescans.
    pub fn reconnect(&mut self, client: Box<dyn StoreClient>) -> Result<Generation> {
        let token = self.ctx.notifier.advance_epoch();
        info!(%token, store = %client.label(), "session.reconnect");
        self.pipeline.send(PipelineCommand::Reconnect { token, client })?;
        self.restart_epoch()
    }

    /// Switches the logical database, drops the index and rescans.
    pub fn switch_db(&mut self, db: u32) -> Result<Generation> {
        let token = self.ctx.notifier.advance_epoch();
        info!(%token, db, "session.switch_db");
        self.pipeline.send(PipelineCommand::SwitchDb { token, db })?;
        self.restart_epoch()
    }

    fn restart_epoch(&mut self) -> Result<Generation> {
        self.view.reset();
        self.pattern = None;
        self.filter.requery()?;
        self.start_scan(None)
    }

    /// Replaces the filter query.
    pub fn set_query(&mut self, text: &str) -> Result<Generation> {
        let token = self.filter.set_query(text)?;
        self.view.scroll_to(0);
        self.view.invalidate();
        Ok(token)
    }

    /// Current filter query.
    pub fn query(&self) -> &str {
        self.filter.query()
    }

    /// Latest completed filter result.
    pub fn current_matches(&self) -> MatchSnapshot {
        self.filter.current_matches()
    }

    /// Whether the published filter result belongs to the current query.
    pub fn is_filter_settled(&self) -> bool {
        self.filter.is_settled()
    }

    /// Size of the latest completed filter result.
    pub fn match_count(&self) -> usize {
        self.filter.match_count()
    }

    /// Best `limit` matches of the latest completed filter result.
    pub fn top_matches(&self, limit: usize) -> Vec<(KeyName, u32)> {
        self.filter.top(limit)
    }

    /// The `height` rows starting at the scroll offset.
    ///
    /// With a query set, rows come from the filtered projection with key
    /// attributes taken from the index; until the current query has a
    /// result, a single placeholder row is returned.
    pub fn visible_rows(&mut self, height: usize) -> Vec<Row> {
        let scanning = self.pipeline.status().state.is_scanning();
        if self.filter.query().is_empty() {
            let trie = self.ctx.trie.read();
            let mode = RenderMode {
                filtering: false,
                scanning,
                generation: Generation::default(),
            };
            return self.view.rows(&trie, mode, height);
        }
        let view = self.filter.view().read();
        if !self.ctx.notifier.is_current(view.generation, Lane::Filter) {
            return vec![Row::Scanning {
                parent: KeyPath::root(),
                depth: 0,
            }];
        }
        let mode = RenderMode {
            filtering: true,
            scanning,
            generation: view.generation,
        };
        let trie = self.ctx.trie.read();
        self.view.projected_rows(&view.projection, &trie, mode, height)
    }

    /// Shows the children of `path`.
    pub fn expand(&mut self, path: &KeyPath) {
        self.view.expand(path);
    }

    /// Hides the children of `path`.
    pub fn collapse(&mut self, path: &KeyPath) {
        self.view.collapse(path);
    }

    /// Flips the expansion of `path`; returns whether it is now expanded.
    pub fn toggle(&mut self, path: &KeyPath) -> bool {
        let filtering = !self.filter.query().is_empty();
        self.view.toggle(path, filtering)
    }

    /// Lists one more page of the children of `path`.
    pub fn request_more(&mut self, path: &KeyPath) {
        self.view.request_more(path);
    }

    /// Scrolls to an absolute row.
    pub fn scroll_to(&mut self, offset: usize) {
        self.view.scroll_to(offset);
    }

    /// Scrolls by `delta` rows.
    pub fn scroll_by(&mut self, delta: isize) {
        self.view.scroll_by(delta);
    }

    /// Records a change made by an editor.
    pub fn apply(&mut self, event: KeyEvent) -> Result<()> {
        self.pipeline.send(PipelineCommand::Apply(event))
    }

    /// Fetches type, TTL and size of `names` in the background.
    pub fn inspect(&mut self, names: Vec<KeyName>) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        self.pipeline.send(PipelineCommand::Inspect(names))
    }

    /// Describes the keys of `rows` that have not been described yet.
    ///
    /// Returns how many keys were requested.
    pub fn inspect_visible(&mut self, rows: &[Row]) -> Result<usize> {
        let names: Vec<KeyName> = rows
            .iter()
            .filter(|row| row.needs_description())
            .filter_map(|row| row.key().cloned())
            .collect();
        let requested = names.len();
        self.inspect(names)?;
        Ok(requested)
    }

    /// Latest pipeline status.
    pub fn status(&self) -> PipelineStatus {
        self.pipeline.status()
    }

    /// Distinct keys indexed.
    pub fn key_count(&self) -> u64 {
        self.ctx.trie.read().len()
    }

    /// Record of `name`, if indexed.
    pub fn record(&self, name: &KeyName) -> Option<KeyRecord> {
        self.ctx
            .trie
            .read()
            .lookup(name)
            .and_then(|node| node.record().cloned())
    }

    /// Every indexed key name.
    pub fn keys(&self) -> Vec<KeyName> {
        self.ctx.trie.read().keys()
    }

    /// Folds a notification into the view state.
    ///
    /// Returns `false` for notifications made obsolete by a later
    /// generation; the renderer can ignore those.
    pub fn handle(&mut self, notification: &Notification) -> bool {
        let current = self.ctx.notifier.current();
        let generation = notification.generation;
        if generation.epoch != current.epoch {
            return false;
        }
        match &notification.event {
            Event::Changed(notice) => {
                self.view.on_change(notice);
                true
            }
            Event::Pipeline(_) => {
                if generation.scan != current.scan {
                    return false;
                }
                self.view.invalidate();
                true
            }
            Event::Filter(_) => {
                if generation.filter != current.filter {
                    return false;
                }
                if !self.filter.query().is_empty() {
                    self.view.invalidate_layout();
                }
                true
            }
        }
    }

    /// Cancels in-flight work and stops the workers.
    ///
    /// Idempotent; also run on drop.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.ctx.notifier.advance_epoch();
        self.pipeline.shutdown();
        self.filter.shutdown();
        self.ctx.notifier.close();
        info!(keys = self.ctx.trie.read().len(), "session.teardown");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}
