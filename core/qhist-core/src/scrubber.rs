//! Retention scrubber for run artifact directories.
//!
//! Runs on a [`Scheduler`] at a fixed wake interval. Each wake first checks a
//! lease (`lastScrubTime` in the shared [`KeyValueStore`]); if another wake,
//! possibly in another process, swept within the throttle interval, it does
//! nothing. Otherwise it renews the lease and sweeps every artifact root:
//!
//! | Child of root                            | Action |
//! |------------------------------------------|--------|
//! | not a directory                          | delete |
//! | no `timestamp` marker / marker not an int | delete |
//! | `now - marker >= max_age`                 | delete |
//! | otherwise                                | keep   |
//!
//! After the sweep an [`HistoryEvent::ArtifactsScrubbed`] is sent so the
//! history owner can drop entries whose artifacts are gone. Deletion errors
//! are collected and reported as one [`HistoryError::ScrubFailed`] after that.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::artifacts::{list_children, read_marker};
use crate::clock::Clock;
use crate::config::HistoryConfig;
use crate::error::{HistoryError, Result};
use crate::events::{EventSender, HistoryEvent};
use crate::kv::KeyValueStore;
use crate::scheduler::{ScheduledTask, Scheduler};

/// Key holding the last sweep start, in milliseconds since the Unix epoch.
pub const LAST_SCRUB_TIME_KEY: &str = "lastScrubTime";

/// Results from one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScrubStats {
    pub deleted: u32,
    pub kept: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrubOutcome {
    /// Another wake holds a fresh lease.
    Skipped,
    Swept(ScrubStats),
}

type SweepCallback = Box<dyn Fn(&ScrubStats) + Send + Sync>;
type RemovePath = fn(&Path) -> io::Result<()>;

pub struct RetentionScrubber {
    roots: Vec<PathBuf>,
    max_age: chrono::Duration,
    throttle: chrono::Duration,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    events: EventSender,
    on_sweep: Option<SweepCallback>,
    remove_path: RemovePath,
}

impl RetentionScrubber {
    pub fn new(
        roots: Vec<PathBuf>,
        max_age: chrono::Duration,
        throttle: chrono::Duration,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        events: EventSender,
    ) -> Self {
        RetentionScrubber {
            roots,
            max_age,
            throttle,
            kv,
            clock,
            events,
            on_sweep: None,
            remove_path: delete_path,
        }
    }

    pub fn from_config(
        config: &HistoryConfig,
        roots: Vec<PathBuf>,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        events: EventSender,
    ) -> Self {
        Self::new(
            roots,
            config.max_age(),
            config.throttle_interval(),
            kv,
            clock,
            events,
        )
    }

    /// Called after every sweep (not after skipped wakes), errors included.
    pub fn on_sweep(mut self, callback: impl Fn(&ScrubStats) + Send + Sync + 'static) -> Self {
        self.on_sweep = Some(Box::new(callback));
        self
    }

    #[cfg(test)]
    fn with_remove_path(mut self, remove_path: RemovePath) -> Self {
        self.remove_path = remove_path;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Forgets the lease so the next wake sweeps regardless of throttle.
    pub fn reset_lease(&self) -> Result<()> {
        self.kv.set(LAST_SCRUB_TIME_KEY, Value::Null)
    }

    pub fn last_scrub_time(&self) -> Result<Option<i64>> {
        Ok(self
            .kv
            .get(LAST_SCRUB_TIME_KEY)?
            .and_then(|value| value.as_i64()))
    }

    /// One scheduler tick: sweep unless the lease is still fresh.
    pub fn wake(&self) -> Result<ScrubOutcome> {
        let now_ms = self.clock.now().timestamp_millis();

        let last = self.last_scrub_time().unwrap_or_else(|e| {
            warn!(error = %e, "Scrub lease is unreadable; treating it as expired");
            None
        });
        if let Some(last) = last {
            let elapsed = now_ms - last;
            // A lease from the future means clock skew; treat it as expired.
            if (0..self.throttle.num_milliseconds()).contains(&elapsed) {
                debug!(elapsed_ms = elapsed, "Scrub lease still fresh; skipping");
                return Ok(ScrubOutcome::Skipped);
            }
        }

        self.kv.set(LAST_SCRUB_TIME_KEY, Value::from(now_ms))?;

        let stats = self.sweep(now_ms);
        info!(
            deleted = stats.deleted,
            kept = stats.kept,
            errors = stats.errors.len(),
            "Scrubbed expired query artifacts"
        );

        if !self.events.send(HistoryEvent::ArtifactsScrubbed) {
            debug!("History owner is gone; scrub notification dropped");
        }
        if let Some(callback) = &self.on_sweep {
            callback(&stats);
        }

        if stats.errors.is_empty() {
            Ok(ScrubOutcome::Swept(stats))
        } else {
            Err(HistoryError::ScrubFailed {
                failures: stats.errors,
            })
        }
    }

    fn sweep(&self, now_ms: i64) -> ScrubStats {
        let mut stats = ScrubStats::default();
        let max_age_ms = self.max_age.num_milliseconds();

        for root in &self.roots {
            if !root.exists() {
                info!(root = %root.display(), "Artifact root does not exist; skipping");
                continue;
            }

            let (children, errors) = list_children(root);
            stats.errors.extend(errors);

            for child in children {
                match expiry_reason(&child, now_ms, max_age_ms) {
                    None => stats.kept += 1,
                    Some(reason) => {
                        debug!(path = %child.display(), reason, "Deleting query artifact");
                        match (self.remove_path)(&child) {
                            Ok(()) => stats.deleted += 1,
                            Err(e) => stats
                                .errors
                                .push(format!("Error while deleting {}: {}", child.display(), e)),
                        }
                    }
                }
            }
        }

        stats
    }

    /// Registers the scrubber to wake every `wake_interval`. Failures are
    /// logged; the schedule keeps running.
    #[must_use = "dropping the handle stops the scrubber"]
    pub fn register(
        self: &Arc<Self>,
        scheduler: &dyn Scheduler,
        wake_interval: Duration,
    ) -> ScheduledTask {
        let scrubber = Arc::clone(self);
        scheduler.every(
            wake_interval,
            Box::new(move || {
                if let Err(e) = scrubber.wake() {
                    warn!(error = %e, "Retention scrub failed");
                }
            }),
        )
    }
}

/// Why `path` should be deleted, or `None` to keep it.
fn expiry_reason(path: &Path, now_ms: i64, max_age_ms: i64) -> Option<&'static str> {
    let is_dir = fs_err::symlink_metadata(path)
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Some("not a directory");
    }
    match read_marker(path) {
        None => Some("missing or invalid timestamp"),
        Some(created) if now_ms - created >= max_age_ms => Some("expired"),
        Some(_) => None,
    }
}

/// Deletes a file or directory tree. Already gone counts as success.
fn delete_path(path: &Path) -> io::Result<()> {
    let is_dir = fs_err::symlink_metadata(path)
        .map(|m| m.is_dir())
        .unwrap_or(false);
    let result = if is_dir {
        fs_err::remove_dir_all(path)
    } else {
        fs_err::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{write_marker, MARKER_FILE};
    use crate::clock::ManualClock;
    use crate::events::EventBus;
    use crate::kv::MemoryKeyValueStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    const NOW_MS: i64 = 1_700_000_000_000;

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        clock: ManualClock,
        kv: Arc<MemoryKeyValueStore>,
        bus: EventBus,
        scrubber: RetentionScrubber,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().unwrap();
        let root = temp.path().join("queries");
        std::fs::create_dir_all(&root).unwrap();
        let clock = ManualClock::new(chrono::Utc.timestamp_millis_opt(NOW_MS).unwrap());
        let kv = Arc::new(MemoryKeyValueStore::new());
        let bus = EventBus::new();
        let scrubber = RetentionScrubber::new(
            vec![root.clone(), temp.path().join("missing-root")],
            chrono::Duration::days(30),
            chrono::Duration::hours(2),
            kv.clone(),
            Arc::new(clock.clone()),
            bus.sender(),
        );
        Fixture {
            _temp: temp,
            root,
            clock,
            kv,
            bus,
            scrubber,
        }
    }

    fn run_dir(root: &Path, name: &str, created_ms: i64) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        write_marker(&dir, created_ms).unwrap();
        dir
    }

    fn swept(outcome: ScrubOutcome) -> ScrubStats {
        match outcome {
            ScrubOutcome::Swept(stats) => stats,
            ScrubOutcome::Skipped => panic!("expected a sweep"),
        }
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let f = fixture();
        let max_age = chrono::Duration::days(30).num_milliseconds();
        let exactly = run_dir(&f.root, "exactly", NOW_MS - max_age);
        let younger = run_dir(&f.root, "younger", NOW_MS - max_age + 1);

        let stats = swept(f.scrubber.wake().unwrap());
        assert!(!exactly.exists());
        assert!(younger.exists());
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.kept, 1);
    }

    #[test]
    fn test_deletes_files_and_bad_markers() {
        let f = fixture();
        std::fs::write(f.root.join("stray.txt"), "x").unwrap();
        std::fs::create_dir_all(f.root.join("no-marker")).unwrap();
        let garbage = f.root.join("garbage");
        std::fs::create_dir_all(&garbage).unwrap();
        std::fs::write(garbage.join(MARKER_FILE), "not a number").unwrap();
        let fresh = run_dir(&f.root, "fresh", NOW_MS - 1000);

        let stats = swept(f.scrubber.wake().unwrap());
        assert_eq!(stats.deleted, 3);
        let remaining: Vec<_> = std::fs::read_dir(&f.root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(remaining, vec![fresh]);
    }

    #[test]
    fn test_second_wake_within_throttle_is_noop() {
        let f = fixture();
        swept(f.scrubber.wake().unwrap());
        assert_eq!(f.kv.get(LAST_SCRUB_TIME_KEY).unwrap(), Some(Value::from(NOW_MS)));

        f.clock.advance(chrono::Duration::hours(1));
        let stray = f.root.join("stray.txt");
        std::fs::write(&stray, "x").unwrap();

        assert_eq!(f.scrubber.wake().unwrap(), ScrubOutcome::Skipped);
        assert!(stray.exists());
        assert_eq!(f.kv.get(LAST_SCRUB_TIME_KEY).unwrap(), Some(Value::from(NOW_MS)));

        f.clock.advance(chrono::Duration::hours(1));
        swept(f.scrubber.wake().unwrap());
        assert!(!stray.exists());
    }

    #[test]
    fn test_future_lease_is_treated_as_expired() {
        let f = fixture();
        f.kv
            .set(LAST_SCRUB_TIME_KEY, Value::from(NOW_MS + 60_000))
            .unwrap();
        swept(f.scrubber.wake().unwrap());
        assert_eq!(f.scrubber.last_scrub_time().unwrap(), Some(NOW_MS));
    }

    #[test]
    fn test_reset_lease_forces_sweep() {
        let f = fixture();
        swept(f.scrubber.wake().unwrap());
        f.scrubber.reset_lease().unwrap();
        swept(f.scrubber.wake().unwrap());
    }

    #[test]
    fn test_sweep_notifies_bus_and_callback() {
        let f = fixture();
        let sweeps = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&sweeps);
        let scrubber = f
            .scrubber
            .on_sweep(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        scrubber.wake().unwrap();
        scrubber.wake().unwrap();
        assert_eq!(sweeps.load(Ordering::SeqCst), 1);
        assert_eq!(f.bus.drain(), vec![HistoryEvent::ArtifactsScrubbed]);
    }

    #[cfg(unix)]
    #[test]
    fn test_deletion_failure_still_notifies_then_errors() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        let locked = f.root.join("locked");
        std::fs::create_dir_all(locked.join("inner")).unwrap();
        std::fs::write(locked.join("inner").join("file"), "x").unwrap();
        std::fs::set_permissions(locked.join("inner"), std::fs::Permissions::from_mode(0o555))
            .unwrap();

        let result = f.scrubber.wake();
        if locked.join("inner").exists() {
            std::fs::set_permissions(locked.join("inner"), std::fs::Permissions::from_mode(0o755))
                .unwrap();
        }

        // Running as root ignores permission bits; only assert when it failed.
        if let Err(e) = result {
            assert!(matches!(e, HistoryError::ScrubFailed { .. }));
            assert!(e.to_string().starts_with("Error while scrubbing queries:"));
        }
        assert_eq!(f.bus.drain(), vec![HistoryEvent::ArtifactsScrubbed]);
    }

    #[test]
    fn test_failed_deletions_are_collected_after_full_sweep() {
        let f = fixture();
        let stuck = run_dir(&f.root, "stuck", 0);
        let expired = run_dir(&f.root, "expired", 0);
        let fresh = run_dir(&f.root, "fresh", NOW_MS);
        let scrubber = f.scrubber.with_remove_path(|path| {
            if path.ends_with("stuck") {
                Err(io::Error::new(io::ErrorKind::Other, "device busy"))
            } else {
                delete_path(path)
            }
        });

        let err = scrubber.wake().unwrap_err();
        match &err {
            HistoryError::ScrubFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("stuck"));
                assert!(failures[0].contains("device busy"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(stuck.exists());
        assert!(!expired.exists());
        assert!(fresh.exists());
        assert_eq!(scrubber.last_scrub_time().unwrap(), Some(NOW_MS));
        assert_eq!(f.bus.drain(), vec![HistoryEvent::ArtifactsScrubbed]);
    }

    #[test]
    fn test_unreadable_state_file_does_not_stop_scrubbing() {
        use crate::kv::JsonFileKeyValueStore;

        let f = fixture();
        let state = f.root.parent().unwrap().join("global-state.json");
        std::fs::write(&state, "{ truncated").unwrap();
        let stale = f.root.join("stale");
        std::fs::create_dir_all(&stale).unwrap();

        let scrubber = RetentionScrubber::new(
            vec![f.root.clone()],
            chrono::Duration::days(30),
            chrono::Duration::hours(2),
            Arc::new(JsonFileKeyValueStore::new(&state)),
            Arc::new(f.clock.clone()),
            f.bus.sender(),
        );
        scrubber.reset_lease().unwrap();
        std::fs::write(&state, "{ truncated").unwrap();

        let stats = swept(scrubber.wake().unwrap());
        assert_eq!(stats.deleted, 1);
        assert!(!stale.exists());
        assert_eq!(scrubber.last_scrub_time().unwrap(), Some(NOW_MS));
        assert_eq!(scrubber.wake().unwrap(), ScrubOutcome::Skipped);
    }
}
