//! Subcommand implementations. Each loads history from the storage root,
//! performs one operation through `HistoryManager`, and writes a short report.

use std::io::Write;
use std::sync::Arc;

use qhist_core::{
    CompareCandidate, EntryKey, HistoryConfig, HistoryError, HistoryItem, HistoryManager,
    JsonFileKeyValueStore, RetentionScrubber, ScrubOutcome, SortOrder, StorageConfig, SystemClock,
};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("No run with id {0}")]
    UnknownRun(String),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

pub type CliResult = std::result::Result<(), CliError>;

fn open(storage: &StorageConfig) -> Result<(HistoryConfig, HistoryManager), CliError> {
    let config = HistoryConfig::load(&storage.config_file());
    let mut manager = HistoryManager::from_storage(storage, &config);
    manager.read_history()?;
    Ok((config, manager))
}

/// Latest membership for `id`.
fn resolve(manager: &HistoryManager, id: &str) -> Result<EntryKey, CliError> {
    manager
        .store()
        .find_by_id(id)
        .last()
        .copied()
        .ok_or_else(|| CliError::UnknownRun(id.to_string()))
}

fn describe(manager: &HistoryManager, key: EntryKey) -> String {
    let store = manager.store();
    match store.get(key) {
        Some(item) => format!("{} ({})", item.id(), store.labels().label(item)),
        None => key.to_string(),
    }
}

pub fn list(
    storage: &StorageConfig,
    order: SortOrder,
    language: Option<&str>,
    out: &mut dyn Write,
) -> CliResult {
    let (_, manager) = open(storage)?;
    let store = manager.store();
    for entry in store.children(order, language) {
        writeln!(
            out,
            "{}  {}  {}",
            entry.item.id(),
            entry.item.status(),
            store.labels().label(&entry.item)
        )?;
    }
    Ok(())
}

pub fn label(
    storage: &StorageConfig,
    id: &str,
    label: Option<String>,
    out: &mut dyn Write,
) -> CliResult {
    let (_, mut manager) = open(storage)?;
    let key = resolve(&manager, id)?;
    manager.set_label(Some(key), label)?;
    writeln!(out, "{}", describe(&manager, key))?;
    Ok(())
}

pub fn remove(storage: &StorageConfig, ids: &[String], yes: bool, out: &mut dyn Write) -> CliResult {
    let (_, mut manager) = open(storage)?;
    let keys = ids
        .iter()
        .map(|id| resolve(&manager, id))
        .collect::<Result<Vec<_>, _>>()?;

    let removed = manager.remove_items(None, Some(keys), &mut |item: &HistoryItem| {
        if !yes {
            warn!(id = item.id(), "Run is still executing; pass --yes to remove it anyway");
        }
        yes
    })?;
    writeln!(out, "Removed {} run(s)", removed)?;
    Ok(())
}

pub fn scrub(storage: &StorageConfig, force: bool, out: &mut dyn Write) -> CliResult {
    storage.ensure_dirs()?;
    let (config, mut manager) = open(storage)?;
    let scrubber = RetentionScrubber::from_config(
        &config,
        storage.artifact_roots(),
        Arc::new(JsonFileKeyValueStore::new(storage.global_state_file())),
        Arc::new(SystemClock),
        manager.events(),
    );

    if force {
        scrubber.reset_lease()?;
    }
    let outcome = scrubber.wake();
    manager.process_events()?;

    match outcome? {
        ScrubOutcome::Skipped => writeln!(
            out,
            "Skipped: last scrub was less than {} seconds ago",
            config.throttle_interval_secs
        )?,
        ScrubOutcome::Swept(stats) => writeln!(
            out,
            "Deleted {} artifact director(ies), kept {}; {} run(s) in history",
            stats.deleted,
            stats.kept,
            manager.store().len()
        )?,
    }
    Ok(())
}

pub fn compare(storage: &StorageConfig, from: &str, to: &str, out: &mut dyn Write) -> CliResult {
    let (_, manager) = open(storage)?;
    let from_key = resolve(&manager, from)?;
    let to_key = resolve(&manager, to)?;

    let pair = manager.compare(
        Some(from_key),
        Some(vec![from_key, to_key]),
        &mut |_: &[CompareCandidate]| None,
    )?;
    match pair {
        Some((from, to)) => {
            writeln!(out, "from: {}", describe(&manager, from))?;
            writeln!(out, "to:   {}", describe(&manager, to))?;
        }
        None => writeln!(out, "No comparison partner chosen")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use qhist_core::artifacts::{create_run_dir, read_marker};
    use qhist_core::{LocalRun, ManualClock, QueryStatus, RunPayload};
    use tempfile::{tempdir, TempDir};

    fn local(id: &str, db: &str, output_dir: Option<std::path::PathBuf>) -> HistoryItem {
        let mut item = HistoryItem::new(
            id,
            Utc::now(),
            RunPayload::Local(LocalRun {
                query_name: format!("Query{}", id),
                query_path: format!("/queries/{}.ql", id),
                database_name: db.to_string(),
                language: Some("python".to_string()),
                output_dir,
                is_quick_eval: false,
                evaluation_time_ms: None,
            }),
        );
        item.apply_status(QueryStatus::Completed, None, Some(2))
            .unwrap();
        item
    }

    fn seeded(items: Vec<HistoryItem>) -> (TempDir, StorageConfig) {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path());
        let mut manager = HistoryManager::from_storage(&storage, &HistoryConfig::default());
        for item in items {
            manager.add_run(item).unwrap();
        }
        (temp, storage)
    }

    fn run(f: impl FnOnce(&mut dyn Write) -> CliResult) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_list_prints_in_requested_order() {
        let (_temp, storage) = seeded(vec![local("b", "db", None), local("a", "db", None)]);
        let output = run(|out| list(&storage, SortOrder::NameAsc, None, out));
        let ids: Vec<&str> = output
            .lines()
            .map(|l| l.split("  ").next().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(output.contains("completed"));

        let output = run(|out| list(&storage, SortOrder::NameAsc, Some("python"), out));
        assert_eq!(output.lines().count(), 2);
        let output = run(|out| list(&storage, SortOrder::NameAsc, Some("ruby"), out));
        assert!(output.is_empty());
    }

    #[test]
    fn test_label_then_clear() {
        let (_temp, storage) = seeded(vec![local("a", "db", None)]);
        let output = run(|out| label(&storage, "a", Some("mine".into()), out));
        assert_eq!(output.trim(), "a (mine)");
        let output = run(|out| label(&storage, "a", None, out));
        assert!(output.contains("Querya on db"));
    }

    #[test]
    fn test_remove_unknown_id_fails_without_removing() {
        let (_temp, storage) = seeded(vec![local("a", "db", None)]);
        let mut out = Vec::new();
        let err = remove(&storage, &["a".into(), "zzz".into()], false, &mut out).unwrap_err();
        assert!(matches!(err, CliError::UnknownRun(ref id) if id == "zzz"));
        assert_eq!(qhist_core::read_history(&storage.history_file()).unwrap().len(), 1);
    }

    #[test]
    fn test_scrub_force_deletes_expired_and_drops_run() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path());
        storage.ensure_dirs().unwrap();
        let expired = create_run_dir(
            &storage.local_queries_dir(),
            &ManualClock::new(Utc::now() - Duration::days(40)),
        )
        .unwrap();
        assert!(read_marker(&expired).is_some());
        let mut manager = HistoryManager::from_storage(&storage, &HistoryConfig::default());
        manager.add_run(local("old", "db", Some(expired.clone()))).unwrap();
        drop(manager);

        let output = run(|out| scrub(&storage, true, out));
        assert!(output.starts_with("Deleted 1"));
        assert!(!expired.exists());
        assert!(qhist_core::read_history(&storage.history_file())
            .unwrap()
            .is_empty());

        let output = run(|out| scrub(&storage, false, out));
        assert!(output.starts_with("Skipped"));
    }

    #[test]
    fn test_compare_reports_pair_or_database_mismatch() {
        let (_temp, storage) = seeded(vec![
            local("a", "db", None),
            local("b", "db", None),
            local("c", "other", None),
        ]);
        let output = run(|out| compare(&storage, "a", "b", out));
        assert!(output.starts_with("from: a"));
        assert!(output.contains("to:   b"));

        let mut out = Vec::new();
        let err = compare(&storage, "a", "c", &mut out).unwrap_err();
        assert!(matches!(err, CliError::History(HistoryError::DatabasesDiffer)));
    }
}
