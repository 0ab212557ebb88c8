//! Selection resolution and the compare-from anchor.
//!
//! Commands can arrive with an explicit selection (context menu on the list),
//! a partial one, or none at all (command palette). [`SelectionTracker`]
//! turns any of those into a concrete [`Selection`], and remembers which item
//! the user picked first so a two-item comparison always runs from that item.

use chrono::{DateTime, Utc};

use crate::error::{HistoryError, Result};
use crate::item::RunKind;
use crate::store::{EntryKey, HistoryStore};

/// Two clicks on the same entry closer together than this are a double click.
pub const DOUBLE_CLICK_WINDOW_MS: i64 = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub single: Option<EntryKey>,
    pub multi: Vec<EntryKey>,
}

/// A run offered to the user as a comparison partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareCandidate {
    pub key: EntryKey,
    pub label: String,
    /// Target (database) name.
    pub description: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Single,
    Double,
}

#[derive(Debug, Default)]
pub struct SelectionTracker {
    compare_with: Option<EntryKey>,
    live_selection: Vec<EntryKey>,
    last_click: Option<(EntryKey, DateTime<Utc>)>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The compare-from anchor.
    pub fn compare_with(&self) -> Option<EntryKey> {
        self.compare_with
    }

    /// The selection as last reported by the list view.
    pub fn live_selection(&self) -> &[EntryKey] {
        &self.live_selection
    }

    /// Resolves the target of a command.
    ///
    /// With nothing explicit, falls back to the live multi-selection, then to
    /// the store's current item.
    pub fn determine_selection(
        &self,
        store: &HistoryStore,
        single: Option<EntryKey>,
        multi: Option<Vec<EntryKey>>,
    ) -> Selection {
        match (single, multi) {
            (Some(single), Some(multi)) => Selection {
                single: Some(single),
                multi,
            },
            (Some(single), None) => Selection {
                single: Some(single),
                multi: vec![single],
            },
            (None, Some(multi)) => Selection {
                single: multi.first().copied(),
                multi,
            },
            (None, None) => {
                let live: Vec<EntryKey> = self
                    .live_selection
                    .iter()
                    .copied()
                    .filter(|k| store.contains(*k))
                    .collect();
                if let Some(&first) = live.first() {
                    Selection {
                        single: Some(first),
                        multi: live,
                    }
                } else {
                    let current = store.current();
                    Selection {
                        single: current,
                        multi: current.into_iter().collect(),
                    }
                }
            }
        }
    }

    /// Keeps the anchor on the first item of a growing two-item selection.
    ///
    /// | new selection            | anchor    |
    /// |--------------------------|-----------|
    /// | exactly one item `X`     | `X`       |
    /// | two items incl. anchor   | unchanged |
    /// | anything else            | cleared   |
    pub fn update_compare_with(&mut self, new_selection: &[EntryKey]) {
        match new_selection {
            [only] => self.compare_with = Some(*only),
            [a, b] if self.compare_with.is_some_and(|anchor| anchor == *a || anchor == *b) => {}
            _ => self.compare_with = None,
        }
    }

    /// Handles a selection change coming from the list view.
    ///
    /// An empty selection is refused: the current item stays and becomes the
    /// live selection again. Returns false in that case.
    pub fn on_selection_changed(&mut self, store: &mut HistoryStore, selection: &[EntryKey]) -> bool {
        let Some(&first) = selection.first() else {
            self.live_selection = store.current().into_iter().collect();
            self.update_compare_with(&[]);
            return false;
        };

        store.set_current(Some(first));
        self.live_selection = selection.to_vec();

        let all_local = selection
            .iter()
            .all(|k| store.get(*k).is_some_and(|item| item.kind() == RunKind::Local));
        if all_local {
            self.update_compare_with(selection);
        } else {
            self.update_compare_with(&[]);
        }
        true
    }

    /// The *from* side of a comparison: the anchor when it is part of the
    /// selection and still a completed local run, else `single`.
    pub fn from_query_to_compare(
        &self,
        store: &HistoryStore,
        single: EntryKey,
        multi: &[EntryKey],
    ) -> EntryKey {
        match self.compare_with {
            Some(anchor)
                if multi.contains(&anchor)
                    && store.get(anchor).is_some_and(|i| i.is_completed_local()) =>
            {
                anchor
            }
            _ => single,
        }
    }

    /// Finds the *to* side of a comparison from `subject`.
    ///
    /// With exactly two selected, the partner is the other one. With fewer,
    /// every completed local run on the same target is offered to `chooser`,
    /// which may decline by returning `None`.
    pub fn find_other_query_to_compare(
        &self,
        store: &HistoryStore,
        subject: EntryKey,
        multi_select: &[EntryKey],
        chooser: &mut dyn FnMut(&[CompareCandidate]) -> Option<EntryKey>,
    ) -> Result<Option<EntryKey>> {
        let subject_item = store
            .get(subject)
            .ok_or_else(|| HistoryError::ItemNotFound(subject.to_string()))?;
        let target = subject_item.target_name();

        if let [a, b] = multi_select {
            let other = if *a == subject { *b } else { *a };
            let other_item = store
                .get(other)
                .ok_or_else(|| HistoryError::ItemNotFound(other.to_string()))?;
            if !other_item.is_completed_local() {
                return Err(HistoryError::NotCompletedQuery);
            }
            if other_item.target_name() != target {
                return Err(HistoryError::DatabasesDiffer);
            }
            return Ok(Some(other));
        }

        if multi_select.len() > 2 {
            return Err(HistoryError::TooManySelected);
        }

        let candidates: Vec<CompareCandidate> = store
            .entries()
            .iter()
            .filter(|e| e.key != subject)
            .filter(|e| e.item.is_completed_local() && e.item.target_name() == target)
            .map(|e| CompareCandidate {
                key: e.key,
                label: store.labels().label(&e.item),
                description: e.item.target_name(),
                detail: e.item.result_count().map(|n| format!("{} results", n)),
            })
            .collect();

        if candidates.is_empty() {
            return Err(HistoryError::NoOtherQueries);
        }

        Ok(chooser(&candidates).filter(|k| candidates.iter().any(|c| c.key == *k)))
    }

    /// Resolves a compare command to a `(from, to)` pair.
    ///
    /// Every involved run must be a completed local run. `Ok(None)` means the
    /// chooser declined.
    pub fn resolve_comparison(
        &self,
        store: &HistoryStore,
        single: EntryKey,
        multi: Option<&[EntryKey]>,
        chooser: &mut dyn FnMut(&[CompareCandidate]) -> Option<EntryKey>,
    ) -> Result<Option<(EntryKey, EntryKey)>> {
        let single_only = [single];
        let multi = multi.unwrap_or(&single_only);

        let completed = |k: &EntryKey| store.get(*k).is_some_and(|i| i.is_completed_local());
        if !completed(&single) || !multi.iter().all(completed) {
            return Err(HistoryError::NotCompletedQuery);
        }

        let from = self.from_query_to_compare(store, single, multi);
        let to = self.find_other_query_to_compare(store, from, multi, chooser)?;
        Ok(to.map(|to| (from, to)))
    }

    /// Records a click on `key` at `now` and classifies it.
    pub fn register_click(&mut self, key: EntryKey, now: DateTime<Utc>) -> ClickKind {
        let previous = self.last_click.replace((key, now));
        match previous {
            Some((prev_key, prev_time))
                if prev_key == key
                    && (now - prev_time).num_milliseconds() < DOUBLE_CLICK_WINDOW_MS =>
            {
                ClickKind::Double
            }
            _ => ClickKind::Single,
        }
    }
}
