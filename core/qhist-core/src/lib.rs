//! # qhist-core
//!
//! Query-run history: records every analysis run a user started, tracks its
//! status, orders and selects runs for display and comparison, persists the
//! set across restarts, and reclaims artifact directories of expired runs.
//!
//! ## Design Principles
//!
//! - **Single owner**: `HistoryStore`, `SelectionTracker` and `HistoryManager`
//!   are not thread-safe. Other threads talk to them through `EventSender`.
//! - **Fail closed on load**: an unreadable or newer history file is an error,
//!   never silently replaced by an empty history.
//! - **Injectable time and state**: the scrubber takes a `Clock`, a
//!   `KeyValueStore` and a `Scheduler`, so tests drive it with fakes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use qhist_core::{HistoryConfig, HistoryManager, StorageConfig};
//!
//! let storage = StorageConfig::default();
//! let config = HistoryConfig::load(&storage.config_file());
//! let mut manager = HistoryManager::from_storage(&storage, &config);
//! manager.read_history()?;
//! for entry in manager.store().sorted_children() {
//!     println!("{}", manager.store().labels().label(&entry.item));
//! }
//! ```

pub mod artifacts;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod item;
pub mod kv;
pub mod label;
pub mod manager;
pub mod persistence;
pub mod scheduler;
pub mod scrubber;
pub mod selection;
pub mod sort;
pub mod status;
pub mod storage;
pub mod store;

pub use cleanup::CleanupStack;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HistoryConfig;
pub use error::{HistoryError, Result};
pub use events::{Emitter, EventBus, EventSender, HistoryEvent, Subscription};
pub use item::{HistoryItem, LocalRun, RemoteRun, RunKind, RunPayload, VariantAnalysisRun};
pub use kv::{JsonFileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use label::LabelProvider;
pub use manager::{HistoryManager, RehydrateOutcome, RunCollaborator};
pub use persistence::{read_history, write_history, HISTORY_VERSION};
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, ThreadScheduler};
pub use scrubber::{RetentionScrubber, ScrubOutcome, ScrubStats};
pub use selection::{ClickKind, CompareCandidate, Selection, SelectionTracker};
pub use sort::SortOrder;
pub use status::{QueryStatus, VariantAnalysisStatus};
pub use storage::StorageConfig;
pub use store::{EntryKey, HistoryEntry, HistoryStore, StoreChange};
