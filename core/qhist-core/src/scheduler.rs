//! Periodic task scheduling.
//!
//! [`Scheduler::every`] registers a task to run at a fixed interval and
//! returns a [`ScheduledTask`] handle; cancelling (or dropping) the handle
//! stops future runs. A run already in flight always finishes.
//!
//! - [`ThreadScheduler`]: one background thread per task, woken by
//!   `recv_timeout` so cancellation is prompt.
//! - [`ManualScheduler`]: runs due tasks only when [`ManualScheduler::advance`]
//!   moves its [`ManualClock`] forward.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use tracing::{debug, warn};

use crate::clock::{Clock, ManualClock};

pub type Task = Box<dyn FnMut() + Send>;

pub trait Scheduler {
    #[must_use = "dropping the handle cancels the task"]
    fn every(&self, interval: Duration, task: Task) -> ScheduledTask;
}

/// Handle for a registered periodic task.
pub struct ScheduledTask {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ScheduledTask {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        ScheduledTask {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle for a task that never got scheduled.
    fn inert() -> Self {
        ScheduledTask { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Thread-backed scheduler
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct ThreadScheduler {
    name: Option<String>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names spawned threads, for log and debugger readability.
    pub fn named(name: impl Into<String>) -> Self {
        ThreadScheduler {
            name: Some(name.into()),
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn every(&self, interval: Duration, mut task: Task) -> ScheduledTask {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }

        let spawned = builder.spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => task(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        match spawned {
            Ok(_) => ScheduledTask::new(move || {
                let _ = stop_tx.send(());
            }),
            Err(e) => {
                warn!(error = %e, "Failed to spawn scheduler thread; task will not run");
                ScheduledTask::inert()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Manual scheduler (fake time)
// ═══════════════════════════════════════════════════════════════════════════════

struct ManualTask {
    id: u64,
    interval: chrono::Duration,
    next_due: DateTime<Utc>,
    /// `None` while the task is running.
    task: Option<Task>,
}

#[derive(Default)]
struct ManualState {
    next_id: u64,
    tasks: Vec<ManualTask>,
}

/// Scheduler driven by a [`ManualClock`]; nothing runs until `advance`.
#[derive(Clone)]
pub struct ManualScheduler {
    clock: ManualClock,
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new(clock: ManualClock) -> Self {
        ManualScheduler {
            clock,
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Moves time forward by `by`, running every task that falls due on the
    /// way, in due order, with the clock set to each due time.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + to_chrono(by);

        loop {
            let due = {
                let mut state = self.lock();
                let next = state
                    .tasks
                    .iter_mut()
                    .filter(|t| t.task.is_some() && t.next_due <= target)
                    .min_by_key(|t| (t.next_due, t.id));
                next.map(|t| (t.id, t.next_due, t.task.take()))
            };

            let Some((id, due_at, Some(mut task))) = due else {
                break;
            };

            self.clock.set(due_at);
            debug!(task = id, "Running scheduled task");
            task();

            let mut state = self.lock();
            if let Some(entry) = state.tasks.iter_mut().find(|t| t.id == id) {
                entry.next_due = due_at + entry.interval;
                entry.task = Some(task);
            }
        }

        self.clock.set(target);
    }
}

impl Scheduler for ManualScheduler {
    fn every(&self, interval: Duration, task: Task) -> ScheduledTask {
        let interval = to_chrono(interval).max(chrono::Duration::milliseconds(1));
        let id = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.tasks.push(ManualTask {
                id,
                interval,
                next_due: self.clock.now() + interval,
                task: Some(task),
            });
            id
        };

        let state = Arc::clone(&self.state);
        ScheduledTask::new(move || {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            state.tasks.retain(|t| t.id != id);
        })
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOUR: Duration = Duration::from_secs(3600);

    fn counter() -> (Arc<AtomicUsize>, Task) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            count,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_manual_scheduler_runs_on_interval_boundaries() {
        let scheduler = ManualScheduler::new(ManualClock::new(Utc::now()));
        let (count, task) = counter();
        let _handle = scheduler.every(HOUR, task);

        scheduler.advance(HOUR - Duration::from_millis(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.advance(Duration::from_millis(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.advance(HOUR * 3);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_manual_scheduler_sets_clock_to_due_time() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        let scheduler = ManualScheduler::new(clock.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _handle = {
            let seen = Arc::clone(&seen);
            let clock = clock.clone();
            scheduler.every(HOUR, Box::new(move || seen.lock().unwrap().push(clock.now())))
        };
        scheduler.advance(HOUR * 2 + Duration::from_secs(5));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![start + chrono::Duration::hours(1), start + chrono::Duration::hours(2)]
        );
        assert_eq!(
            clock.now(),
            start + chrono::Duration::hours(2) + chrono::Duration::seconds(5)
        );
    }

    #[test]
    fn test_cancel_stops_manual_task() {
        let scheduler = ManualScheduler::new(ManualClock::new(Utc::now()));
        let (count, task) = counter();
        let handle = scheduler.every(HOUR, task);
        handle.cancel();
        scheduler.advance(HOUR * 5);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.task_count(), 0);
    }

    #[test]
    fn test_thread_scheduler_runs_and_cancels() {
        let scheduler = ThreadScheduler::named("qhist-test");
        let (count, task) = counter();
        let handle = scheduler.every(Duration::from_millis(10), task);
        thread::sleep(Duration::from_millis(100));
        handle.cancel();
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 1);
        thread::sleep(Duration::from_millis(50));
        // At most one in-flight run may land after cancel.
        assert!(count.load(Ordering::SeqCst) <= after_cancel + 1);
    }
}
