//! In-memory history of runs.
//!
//! The store keeps items in insertion order and tracks at most one *current*
//! item. Every push hands out a fresh [`EntryKey`]; keys are never reused, so
//! an item removed and pushed again (same `id`) is a new membership.
//!
//! # Notifications
//!
//! - [`StoreChange`] whenever contents or display order change.
//! - `Option<EntryKey>` whenever the current item changes (only on an actual
//!   change).
//!
//! The store is owned by a single actor and is intentionally not `Send`.

use std::fmt;

use tracing::warn;

use crate::events::{Emitter, Subscription};
use crate::item::HistoryItem;
use crate::label::LabelProvider;
use crate::sort::{self, SortOrder};

/// Membership handle for an item in a [`HistoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey(u64);

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub key: EntryKey,
    pub item: HistoryItem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Added(EntryKey),
    Updated(EntryKey),
    Removed { key: EntryKey, id: String },
    /// The whole content was replaced (history load).
    Reset,
    /// Nothing structural changed but views should re-render (sort order,
    /// label format, explicit refresh).
    Refreshed,
}

pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
    current: Option<EntryKey>,
    next_key: u64,
    sort_order: SortOrder,
    labels: LabelProvider,
    on_change: Emitter<StoreChange>,
    on_current_change: Emitter<Option<EntryKey>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        HistoryStore::new(LabelProvider::default())
    }
}

impl HistoryStore {
    pub fn new(labels: LabelProvider) -> Self {
        HistoryStore {
            entries: Vec::new(),
            current: None,
            next_key: 0,
            sort_order: SortOrder::default(),
            labels,
            on_change: Emitter::new(),
            on_current_change: Emitter::new(),
        }
    }

    fn allocate_key(&mut self) -> EntryKey {
        let key = EntryKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn index_of(&self, key: EntryKey) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Appends `item` and makes it current.
    pub fn push(&mut self, item: HistoryItem) -> EntryKey {
        let key = self.allocate_key();
        self.entries.push(HistoryEntry { key, item });
        self.set_current(Some(key));
        self.on_change.fire(&StoreChange::Added(key));
        key
    }

    /// Removes `key`. If it was current, the item now at the same index (or
    /// the new last item) becomes current; an emptied store has no current.
    pub fn remove(&mut self, key: EntryKey) -> Option<HistoryItem> {
        let index = self.index_of(key)?;
        let removed = self.entries.remove(index);

        if self.current == Some(key) {
            let next = if self.entries.is_empty() {
                None
            } else {
                Some(self.entries[index.min(self.entries.len() - 1)].key)
            };
            self.set_current(next);
        }

        self.on_change.fire(&StoreChange::Removed {
            key,
            id: removed.item.id().to_string(),
        });
        Some(removed.item)
    }

    /// Changes the current item. Returns true if it changed.
    ///
    /// Keys that are not members are refused so `current` always points into
    /// the store.
    pub fn set_current(&mut self, key: Option<EntryKey>) -> bool {
        if let Some(k) = key {
            if self.index_of(k).is_none() {
                warn!(key = %k, "Refusing to select an entry that is not in the history");
                return false;
            }
        }
        if self.current == key {
            return false;
        }
        self.current = key;
        self.on_current_change.fire(&key);
        true
    }

    /// Replaces all content, in the given order. The first item becomes current.
    pub fn replace_all(&mut self, items: Vec<HistoryItem>) -> Vec<EntryKey> {
        let mut keys = Vec::with_capacity(items.len());
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let key = self.allocate_key();
            keys.push(key);
            entries.push(HistoryEntry { key, item });
        }
        self.entries = entries;
        // The old current key is no longer a member, so any new value differs.
        let previous = self.current.take();
        let first = keys.first().copied();
        if first.is_some() {
            self.set_current(first);
        } else if previous.is_some() {
            self.on_current_change.fire(&None);
        }
        self.on_change.fire(&StoreChange::Reset);
        keys
    }

    /// Runs `f` against a copy of the item. The copy is kept, and observers
    /// notified, only when `f` returns `Ok(true)`; an error or `Ok(false)`
    /// leaves the stored item as it was.
    pub fn update<E>(
        &mut self,
        key: EntryKey,
        f: impl FnOnce(&mut HistoryItem) -> std::result::Result<bool, E>,
    ) -> Option<std::result::Result<bool, E>> {
        let index = self.index_of(key)?;
        let mut item = self.entries[index].item.clone();
        let outcome = f(&mut item);
        if matches!(outcome, Ok(true)) {
            self.entries[index].item = item;
            self.on_change.fire(&StoreChange::Updated(key));
        }
        Some(outcome)
    }

    pub fn refresh(&self) {
        self.on_change.fire(&StoreChange::Refreshed);
    }

    pub fn set_sort_order(&mut self, order: SortOrder) {
        self.sort_order = order;
        self.refresh();
    }

    pub fn set_label_format(&mut self, format: impl Into<String>) {
        self.labels.set_format(format);
        self.refresh();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn current(&self) -> Option<EntryKey> {
        self.current
    }

    pub fn current_item(&self) -> Option<&HistoryItem> {
        self.current.and_then(|k| self.get(k))
    }

    pub fn get(&self, key: EntryKey) -> Option<&HistoryItem> {
        self.index_of(key).map(|i| &self.entries[i].item)
    }

    pub fn contains(&self, key: EntryKey) -> bool {
        self.index_of(key).is_some()
    }

    /// All entries with the given collaborator id, in insertion order.
    pub fn find_by_id(&self, id: &str) -> Vec<EntryKey> {
        self.entries
            .iter()
            .filter(|e| e.item.id() == id)
            .map(|e| e.key)
            .collect()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn items(&self) -> impl Iterator<Item = &HistoryItem> {
        self.entries.iter().map(|e| &e.item)
    }

    pub fn keys(&self) -> Vec<EntryKey> {
        self.entries.iter().map(|e| e.key).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by `order`, limited to runs in `language` when given.
    /// Runs of unknown language only appear unfiltered. Storage order is
    /// untouched.
    pub fn children(&self, order: SortOrder, language: Option<&str>) -> Vec<&HistoryEntry> {
        let shown: Vec<&HistoryEntry> = match language {
            None => self.entries.iter().collect(),
            Some(language) => self
                .entries
                .iter()
                .filter(|e| e.item.language() == Some(language))
                .collect(),
        };
        let sorted: Vec<&HistoryEntry> = sort::sorted(&shown, order, &self.labels, |e| &e.item)
            .into_iter()
            .copied()
            .collect();
        sorted
    }

    /// Entries in the store's current display order.
    pub fn sorted_children(&self) -> Vec<&HistoryEntry> {
        self.children(self.sort_order, None)
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }

    pub fn labels(&self) -> &LabelProvider {
        &self.labels
    }

    pub fn label(&self, key: EntryKey) -> Option<String> {
        self.get(key).map(|item| self.labels.label(item))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_changes(&self, listener: impl FnMut(&StoreChange) + 'static) -> Subscription {
        self.on_change.subscribe(listener)
    }

    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_current(
        &self,
        listener: impl FnMut(&Option<EntryKey>) + 'static,
    ) -> Subscription {
        self.on_current_change.subscribe(listener)
    }
}
