//! User-facing history operations.
//!
//! [`HistoryManager`] owns the [`HistoryStore`], the [`SelectionTracker`] and
//! the receiving end of the [`EventBus`]. It is the single actor allowed to
//! mutate history: collaborators and the retention scrubber only send events,
//! which the owner applies with [`HistoryManager::process_events`].
//!
//! The history file is rewritten after every mutation that users would
//! expect to survive a restart: processed events, removals, label edits and
//! explicit refreshes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cleanup::CleanupStack;
use crate::config::HistoryConfig;
use crate::error::{HistoryError, Result};
use crate::events::{EventBus, EventSender, HistoryEvent, Subscription};
use crate::item::{HistoryItem, RunKind, RunPayload};
use crate::label::LabelProvider;
use crate::persistence;
use crate::scheduler::Scheduler;
use crate::scrubber::RetentionScrubber;
use crate::selection::{ClickKind, CompareCandidate, Selection, SelectionTracker};
use crate::sort::SortOrder;
use crate::status::QueryStatus;
use crate::storage::StorageConfig;
use crate::store::{EntryKey, HistoryStore, StoreChange};

// ═══════════════════════════════════════════════════════════════════════════════
// Collaborators
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of reattaching a persisted run to its collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RehydrateOutcome {
    Attached,
    /// The collaborator no longer has the run's artifacts; drop the entry.
    Missing,
}

/// The component that started runs of one kind and still owns them.
pub trait RunCollaborator {
    /// Asks the run to stop. The final status arrives later as an event.
    fn cancel(&self, item: &HistoryItem) -> Result<()>;

    /// Reattaches a run loaded from the history file.
    fn rehydrate(&self, id: &str, run: &RunPayload, status: QueryStatus)
        -> Result<RehydrateOutcome>;

    /// Releases whatever the collaborator holds for a run the user removed.
    fn remove(&self, item: &HistoryItem) -> Result<()>;
}

#[derive(Default)]
struct Collaborators {
    local: Option<Box<dyn RunCollaborator>>,
    remote: Option<Box<dyn RunCollaborator>>,
    variant_analysis: Option<Box<dyn RunCollaborator>>,
}

impl Collaborators {
    fn slot(&mut self, kind: RunKind) -> &mut Option<Box<dyn RunCollaborator>> {
        match kind {
            RunKind::Local => &mut self.local,
            RunKind::Remote => &mut self.remote,
            RunKind::VariantAnalysis => &mut self.variant_analysis,
        }
    }

    fn get(&self, kind: RunKind) -> Option<&dyn RunCollaborator> {
        let slot = match kind {
            RunKind::Local => &self.local,
            RunKind::Remote => &self.remote,
            RunKind::VariantAnalysis => &self.variant_analysis,
        };
        slot.as_deref()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════════════════

pub struct HistoryManager {
    store: HistoryStore,
    selection: SelectionTracker,
    bus: EventBus,
    history_file: PathBuf,
    collaborators: Collaborators,
    cleanup: CleanupStack,
}

impl HistoryManager {
    pub fn new(history_file: impl Into<PathBuf>, labels: LabelProvider) -> Self {
        HistoryManager {
            store: HistoryStore::new(labels),
            selection: SelectionTracker::new(),
            bus: EventBus::new(),
            history_file: history_file.into(),
            collaborators: Collaborators::default(),
            cleanup: CleanupStack::new(),
        }
    }

    pub fn from_storage(storage: &StorageConfig, config: &HistoryConfig) -> Self {
        Self::new(
            storage.history_file(),
            LabelProvider::new(config.format.clone()),
        )
    }

    pub fn with_collaborator(
        mut self,
        kind: RunKind,
        collaborator: Box<dyn RunCollaborator>,
    ) -> Self {
        *self.collaborators.slot(kind) = Some(collaborator);
        self
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn selection(&self) -> &SelectionTracker {
        &self.selection
    }

    pub fn history_file(&self) -> &Path {
        &self.history_file
    }

    /// Sender for collaborators and background tasks.
    pub fn events(&self) -> EventSender {
        self.bus.sender()
    }

    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_changes(&self, listener: impl FnMut(&StoreChange) + 'static) -> Subscription {
        self.store.subscribe_changes(listener)
    }

    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_current(
        &self,
        listener: impl FnMut(&Option<EntryKey>) + 'static,
    ) -> Subscription {
        self.store.subscribe_current(listener)
    }

    /// Wakes `scrubber` on `scheduler` until this manager is disposed.
    pub fn attach_scrubber(
        &mut self,
        scrubber: &Arc<RetentionScrubber>,
        scheduler: &dyn Scheduler,
        wake_interval: Duration,
    ) {
        let task = scrubber.register(scheduler, wake_interval);
        self.cleanup.hold(task);
    }

    /// Stops background work owned by this manager.
    pub fn dispose(&mut self) {
        self.cleanup.dispose();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle events
    // ─────────────────────────────────────────────────────────────────────────

    /// Records a run started by a collaborator on this thread.
    pub fn add_run(&mut self, item: HistoryItem) -> Result<EntryKey> {
        let key = self.store.push(item);
        self.write_history()?;
        Ok(key)
    }

    /// Applies every queued event, then writes history once if anything
    /// changed. Returns the number of events applied.
    pub fn process_events(&mut self) -> Result<usize> {
        let events = self.bus.drain();
        if events.is_empty() {
            return Ok(0);
        }

        let mut applied = 0;
        for event in events {
            if self.apply_event(event) {
                applied += 1;
            }
        }

        if applied > 0 {
            self.write_history()?;
        }
        Ok(applied)
    }

    fn apply_event(&mut self, event: HistoryEvent) -> bool {
        match event {
            HistoryEvent::Added(item) => {
                debug!(id = item.id(), kind = %item.kind(), "Run added");
                self.store.push(item);
                true
            }
            HistoryEvent::StatusChanged {
                id,
                status,
                failure_reason,
                result_count,
                run,
            } => {
                let Some(&key) = self.store.find_by_id(&id).last() else {
                    debug!(id = %id, "Status update for a run no longer in history");
                    return false;
                };
                let outcome = self.store.update(key, |item| -> Result<bool> {
                    let mut changed = item.apply_status(status, failure_reason, result_count)?;
                    if let Some(run) = run {
                        changed |= *item.run() != run;
                        item.replace_run(run)?;
                    }
                    Ok(changed)
                });
                match outcome {
                    Some(Ok(changed)) => changed,
                    Some(Err(e)) => {
                        warn!(error = %e, "Ignoring status update");
                        false
                    }
                    None => false,
                }
            }
            HistoryEvent::Removed { id } => {
                let keys = self.store.find_by_id(&id);
                for key in &keys {
                    self.store.remove(*key);
                }
                !keys.is_empty()
            }
            HistoryEvent::ArtifactsScrubbed => self.remove_deleted_entries() > 0,
        }
    }

    /// Drops local runs whose artifact directory no longer exists.
    fn remove_deleted_entries(&mut self) -> usize {
        let gone: Vec<EntryKey> = self
            .store
            .entries()
            .iter()
            .filter(|e| e.item.artifact_dir().is_some_and(|dir| !dir.exists()))
            .map(|e| e.key)
            .collect();
        for key in &gone {
            self.store.remove(*key);
        }
        if !gone.is_empty() {
            info!(count = gone.len(), "Removed runs whose artifacts were deleted");
        }
        gone.len()
    }

    /// Reconciles history with the artifact roots and persists the result.
    pub fn remove_deleted_runs(&mut self) -> Result<usize> {
        let removed = self.remove_deleted_entries();
        if removed > 0 {
            self.write_history()?;
        }
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Loads history from disk, replacing the in-memory set, and reattaches
    /// each run. Runs whose artifacts are gone are dropped.
    pub fn read_history(&mut self) -> Result<()> {
        info!(path = %self.history_file.display(), "Reading query history");
        let items = persistence::read_history(&self.history_file)?;
        let keys = self.store.replace_all(items);

        let mut missing = Vec::new();
        for key in keys {
            let Some(item) = self.store.get(key) else {
                continue;
            };
            if self.is_missing(item) {
                missing.push(key);
            }
        }

        for key in &missing {
            self.store.remove(*key);
        }
        if !missing.is_empty() {
            info!(count = missing.len(), "Dropped runs whose artifacts no longer exist");
            self.write_history()?;
        }
        Ok(())
    }

    fn is_missing(&self, item: &HistoryItem) -> bool {
        match item.kind() {
            RunKind::Local => item.artifact_dir().is_some_and(|dir| !dir.exists()),
            RunKind::Remote | RunKind::VariantAnalysis => {
                let Some(collaborator) = self.collaborators.get(item.kind()) else {
                    return false;
                };
                match collaborator.rehydrate(item.id(), item.run(), item.status()) {
                    Ok(RehydrateOutcome::Attached) => false,
                    Ok(RehydrateOutcome::Missing) => true,
                    Err(e) => {
                        warn!(id = item.id(), error = %e, "Failed to rehydrate run; keeping it");
                        false
                    }
                }
            }
        }
    }

    pub fn write_history(&self) -> Result<()> {
        persistence::write_history(&self.history_file, self.store.items())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // User actions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn determine_selection(
        &self,
        single: Option<EntryKey>,
        multi: Option<Vec<EntryKey>>,
    ) -> Selection {
        self.selection.determine_selection(&self.store, single, multi)
    }

    pub fn on_selection_changed(&mut self, selection: &[EntryKey]) -> bool {
        self.selection.on_selection_changed(&mut self.store, selection)
    }

    /// Makes `key` current and reports whether this was a double click.
    pub fn item_clicked(&mut self, key: EntryKey, now: DateTime<Utc>) -> ClickKind {
        self.store.set_current(Some(key));
        self.selection.register_click(key, now)
    }

    /// Removes the selected runs.
    ///
    /// Local runs still in progress are skipped (cancel them first). Remote
    /// runs still in progress are only removed when `confirm` agrees; they
    /// keep running remotely. Local artifact directories are deleted.
    /// Every run is attempted; failures are reported together afterwards.
    pub fn remove_items(
        &mut self,
        single: Option<EntryKey>,
        multi: Option<Vec<EntryKey>>,
        confirm: &mut dyn FnMut(&HistoryItem) -> bool,
    ) -> Result<usize> {
        let selection = self.determine_selection(single, multi);
        if selection.multi.is_empty() {
            return Err(HistoryError::NothingSelected);
        }

        let mut removed = 0;
        let mut failures = Vec::new();
        for key in selection.multi {
            let Some(item) = self.store.get(key) else {
                continue;
            };
            let in_progress = item.status() == QueryStatus::InProgress;
            match item.kind() {
                RunKind::Local if in_progress => {
                    info!(id = item.id(), "Skipping removal of a running local query");
                    continue;
                }
                RunKind::Remote | RunKind::VariantAnalysis if in_progress && !confirm(item) => {
                    continue;
                }
                _ => {}
            }

            let label = self.store.labels().label(item);
            let Some(item) = self.store.remove(key) else {
                continue;
            };
            removed += 1;
            info!(id = item.id(), label = %label, "Removed run from history");
            if in_progress {
                info!(id = item.id(), "Run is still executing remotely");
            }

            if let Some(collaborator) = self.collaborators.get(item.kind()) {
                if let Err(e) = collaborator.remove(&item) {
                    failures.push(format!("{}: {}", label, e));
                }
            }
            if let Some(dir) = item.artifact_dir() {
                if let Err(e) = delete_dir(dir) {
                    failures.push(format!("{}: {}", label, e));
                }
            }
        }

        self.write_history()?;

        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(HistoryError::Bulk {
                operation: "Remove".to_string(),
                failures,
            })
        }
    }

    /// Asks the owning collaborators to cancel every selected run still in
    /// progress.
    pub fn cancel(
        &mut self,
        single: Option<EntryKey>,
        multi: Option<Vec<EntryKey>>,
    ) -> Result<usize> {
        let selection = self.determine_selection(single, multi);
        let mut requested = 0;
        let mut failures = Vec::new();

        for key in selection.multi {
            let Some(item) = self.store.get(key) else {
                continue;
            };
            if item.status() != QueryStatus::InProgress {
                continue;
            }
            let Some(collaborator) = self.collaborators.get(item.kind()) else {
                failures.push(format!("{}: no handler for {} runs", item.id(), item.kind()));
                continue;
            };
            match collaborator.cancel(item) {
                Ok(()) => requested += 1,
                Err(e) => failures.push(format!("{}: {}", self.store.labels().label(item), e)),
            }
        }

        if failures.is_empty() {
            Ok(requested)
        } else {
            Err(HistoryError::Bulk {
                operation: "Cancel".to_string(),
                failures,
            })
        }
    }

    /// Sets the user label of the selected run. `None` or an empty string
    /// restores the default label.
    pub fn set_label(&mut self, single: Option<EntryKey>, label: Option<String>) -> Result<()> {
        let key = self
            .determine_selection(single, None)
            .single
            .ok_or(HistoryError::NothingSelected)?;
        let changed = self
            .store
            .update(key, |item| -> Result<bool> { Ok(item.set_user_specified_label(label)) })
            .ok_or_else(|| HistoryError::ItemNotFound(key.to_string()))??;
        if changed {
            self.write_history()?;
        }
        Ok(())
    }

    pub fn set_label_format(&mut self, format: impl Into<String>) {
        self.store.set_label_format(format);
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.store.refresh();
        self.write_history()
    }

    pub fn sort_by_name(&mut self) {
        self.store.set_sort_order(self.store.sort_order().toggle_name());
    }

    pub fn sort_by_date(&mut self) {
        self.store.set_sort_order(self.store.sort_order().toggle_date());
    }

    pub fn sort_by_count(&mut self) {
        self.store.set_sort_order(self.store.sort_order().toggle_count());
    }

    pub fn set_sort_order(&mut self, order: SortOrder) {
        self.store.set_sort_order(order);
    }

    /// Resolves a compare command to `(from, to)`; `Ok(None)` if the chooser
    /// declined.
    pub fn compare(
        &self,
        single: Option<EntryKey>,
        multi: Option<Vec<EntryKey>>,
        chooser: &mut dyn FnMut(&[CompareCandidate]) -> Option<EntryKey>,
    ) -> Result<Option<(EntryKey, EntryKey)>> {
        let selection = self.determine_selection(single, multi);
        let single = selection.single.ok_or(HistoryError::NothingSelected)?;
        self.selection
            .resolve_comparison(&self.store, single, Some(&selection.multi), chooser)
    }
}

impl Drop for HistoryManager {
    fn drop(&mut self) {
        self.cleanup.dispose();
    }
}

fn delete_dir(dir: &Path) -> Result<()> {
    match fs_err::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HistoryError::io("deleting run artifacts", e)),
    }
}
