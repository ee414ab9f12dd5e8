//! Elastic keyspace index for browsing very large key-value stores.
//!
//! Keys are discovered incrementally with cursor enumeration, organized into
//! a delimiter-split namespace trie, filtered live with a fuzzy matcher and
//! exposed to a renderer as a windowed, lazily expanded list of rows. All
//! heavy work runs on background workers; the interactive side only talks to
//! a [`Session`] and drains its notification stream.
//!
//! ```no_run
//! use keyscope::{IndexConfig, MemoryStore, Session};
//!
//! # fn main() -> keyscope::Result<()> {
//! let store = MemoryStore::from_keys(["user:1:name", "user:2:name", "session:abc"]);
//! let (mut session, notifications) = Session::open(Box::new(store), IndexConfig::default())?;
//! session.refresh()?;
//! for notification in notifications.iter().take(4) {
//!     session.handle(&notification);
//! }
//! for row in session.visible_rows(20) {
//!     println!("{row:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod filter;
pub mod generation;
pub mod notify;
pub mod pipeline;
pub mod scan;
pub mod session;
pub mod trie;
pub mod view;

pub use config::{FilterConfig, IndexConfig, ScoreWeights, ViewConfig};
pub use error::{KeyspaceError, Result};
pub use filter::{MatchSnapshot, Matcher};
pub use generation::{Generation, Lane};
pub use notify::{ChangeNotice, Event, FilterNotice, Notification};
pub use pipeline::{AbortReason, KeyEvent, PipelineState, PipelineStatus};
pub use scan::{CursorScanner, GeneratedKeyspace, MemoryStore, ScanBatch, ScanCursor, StoreClient};
pub use session::{Session, SessionContext};
pub use trie::{KeyKind, KeyMeta, KeyName, KeyPath, KeyRecord, Trie, Ttl};
pub use view::{Row, ViewState};
