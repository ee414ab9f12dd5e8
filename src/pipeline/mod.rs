//! Elastic load pipeline.
//!
//! A dedicated worker drives the cursor scanner, merges batches into the
//! trie in bounded chunks and publishes a change notice after each chunk, so
//! the tree is browsable long before enumeration finishes. Commands from the
//! session (refresh, cancel, key events, inspection, reconnect) are handled
//! between chunks.

mod worker;

use std::fmt;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::error::{KeyspaceError, Result};
use crate::filter::FilterCommand;
use crate::generation::Generation;
use crate::scan::StoreClient;
use crate::session::SessionContext;
use crate::trie::{KeyKind, KeyName};

use worker::PipelineWorker;

/// Lifecycle of the current scan generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum PipelineState {
    /// No scan has run in this epoch.
    #[default]
    Idle,
    /// Batches are being fetched and merged.
    Scanning,
    /// Enumeration wrapped around.
    Complete,
    /// The scan stopped early; merged data is kept.
    Aborted(AbortReason),
}

impl PipelineState {
    /// Whether a scan is in progress.
    pub fn is_scanning(&self) -> bool {
        matches!(self, PipelineState::Scanning)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Scanning => f.write_str("scanning"),
            PipelineState::Complete => f.write_str("complete"),
            PipelineState::Aborted(reason) => write!(f, "aborted ({reason})"),
        }
    }
}

/// Why a scan stopped early.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The store connection dropped.
    ConnectionLost,
    /// The scan was cancelled explicitly.
    Cancelled,
    /// A newer generation replaced the scan.
    Superseded,
    /// The session was torn down.
    Disconnected,
    /// The store rejected the enumeration.
    Failed,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortReason::ConnectionLost => "connection lost",
            AbortReason::Cancelled => "cancelled",
            AbortReason::Superseded => "superseded",
            AbortReason::Disconnected => "disconnected",
            AbortReason::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Observable progress of the pipeline.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PipelineStatus {
    /// Generation the status was last updated under.
    pub generation: Generation,
    /// Current state.
    pub state: PipelineState,
    /// Glob restricting the current scan.
    pub pattern: Option<String>,
    /// Batches fetched by the current scan.
    pub batches: u64,
    /// Names received, duplicates included.
    pub keys_seen: u64,
    /// Distinct keys in the trie.
    pub distinct: u64,
    /// Names that could not be decoded.
    pub malformed: u64,
    /// Key count reported by the store when the scan started.
    pub estimated_total: Option<u64>,
    /// Message of the last store error.
    pub last_error: Option<String>,
}

impl PipelineStatus {
    /// Fraction of the estimated keyspace merged so far.
    pub fn progress(&self) -> Option<f64> {
        match (self.state, self.estimated_total) {
            (PipelineState::Complete, _) => Some(1.0),
            (_, Some(total)) if total > 0 => Some((self.distinct as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

/// A change made through an editor rather than discovered by scanning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyEvent {
    /// The key was written for the first time.
    Created(KeyName),
    /// The key's value changed; cached attributes are stale.
    Updated(KeyName),
    /// The key was deleted.
    Deleted(KeyName),
    /// The key was renamed.
    Renamed {
        /// Old name.
        from: KeyName,
        /// New name.
        to: KeyName,
    },
    /// A key exists only locally until its first value is written.
    Staged {
        /// Key name.
        name: KeyName,
        /// Intended data type.
        kind: KeyKind,
    },
}

pub(crate) enum PipelineCommand {
    Refresh {
        token: Generation,
        pattern: Option<String>,
    },
    Cancel {
        token: Generation,
    },
    Apply(KeyEvent),
    Inspect(Vec<KeyName>),
    Reconnect {
        token: Generation,
        client: Box<dyn StoreClient>,
    },
    SwitchDb {
        token: Generation,
        db: u32,
    },
    Shutdown,
}

/// Handle to the pipeline worker.
pub struct Pipeline {
    commands: Sender<PipelineCommand>,
    status: Arc<Mutex<PipelineStatus>>,
    worker: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub(crate) fn spawn(
        ctx: Arc<SessionContext>,
        client: Box<dyn StoreClient>,
        filter: Sender<FilterCommand>,
    ) -> Result<Self> {
        let (commands, receiver) = mpsc::channel();
        let status = Arc::new(Mutex::new(PipelineStatus {
            generation: ctx.notifier.current(),
            ..PipelineStatus::default()
        }));
        let worker = PipelineWorker::new(ctx, client, receiver, filter, Arc::clone(&status));
        let handle = thread::Builder::new()
            .name("keyscope-pipeline".into())
            .spawn(move || worker.run())?;
        Ok(Self {
            commands,
            status,
            worker: Some(handle),
        })
    }

    pub(crate) fn send(&self, command: PipelineCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| KeyspaceError::WorkerGone("pipeline"))
    }

    /// Latest status.
    pub fn status(&self) -> PipelineStatus {
        self.status.lock().clone()
    }

    /// Stops the worker and waits for it.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(PipelineCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("pipeline.worker.panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_uses_estimate_until_complete() {
        let mut status = PipelineStatus {
            state: PipelineState::Scanning,
            distinct: 50,
            estimated_total: Some(200),
            ..PipelineStatus::default()
        };
        assert_eq!(status.progress(), Some(0.25));
        status.estimated_total = None;
        assert_eq!(status.progress(), None);
        status.state = PipelineState::Complete;
        assert_eq!(status.progress(), Some(1.0));
    }

    #[test]
    fn state_serializes_with_reason() {
        let json = serde_json::to_string(&PipelineState::Aborted(AbortReason::ConnectionLost)).unwrap();
        assert_eq!(json, r#"{"state":"aborted","reason":"connection_lost"}"#);
        let idle = serde_json::to_string(&PipelineState::Idle).unwrap();
        assert_eq!(idle, r#"{"state":"idle"}"#);
    }

    #[test]
    fn state_displays_reason() {
        let state = PipelineState::Aborted(AbortReason::ConnectionLost);
        assert_eq!(state.to_string(), "aborted (connection lost)");
        assert_eq!(PipelineState::Complete.to_string(), "complete");
    }
}
