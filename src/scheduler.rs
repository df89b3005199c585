// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Named background task slots.
//!
//! Every timer the sync core runs (debounce windows, polling loops, guard
//! sweeps) lives in a slot of a [`Scheduler`]. Scheduling into an occupied
//! slot aborts the previous task, and dropping the scheduler aborts everything
//! it still holds, so no timer outlives its owner.
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use campaign_sync::Scheduler;
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new("demo");
//! scheduler.debounce("commit", Duration::from_millis(500), async {});
//! scheduler.debounce("commit", Duration::from_millis(500), async {}); // replaces the first
//! assert!(scheduler.is_pending("commit"));
//! scheduler.cancel_all();
//! assert!(!scheduler.is_pending("commit"));
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;

pub struct Scheduler {
    name: String,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Trailing debounce: run `task` once `delay` passes without another
    /// `debounce` call on the same slot.
    ///
    /// Once the window elapses the task is detached onto its own tokio task,
    /// so cancelling the slot afterwards never interrupts work in progress.
    /// Returns `true` if a pending task was replaced.
    pub fn debounce<F>(&self, slot: &str, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(task);
        });
        self.replace(slot, handle)
    }

    /// Run a long-lived task (polling loop, sweeper) in `slot`.
    ///
    /// Returns `true` if a pending task was replaced.
    pub fn spawn<F>(&self, slot: &str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.replace(slot, tokio::spawn(task))
    }

    fn replace(&self, slot: &str, handle: JoinHandle<()>) -> bool {
        let previous = self.tasks.lock().insert(slot.to_string(), handle);
        match previous {
            Some(old) if !old.is_finished() => {
                old.abort();
                trace!(scheduler = %self.name, slot, "Replaced pending task");
                true
            }
            _ => false,
        }
    }

    /// Abort whatever is pending in `slot`. Returns `true` if something was.
    pub fn cancel(&self, slot: &str) -> bool {
        match self.tasks.lock().remove(slot) {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                trace!(scheduler = %self.name, slot, "Cancelled task");
                true
            }
            _ => false,
        }
    }

    /// Abort every slot. Returns the number of tasks that were still pending.
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain().map(|(_, h)| h).collect();
        handles
            .into_iter()
            .filter(|h| !h.is_finished())
            .map(|h| h.abort())
            .count()
    }

    #[must_use]
    pub fn is_pending(&self, slot: &str) -> bool {
        self.tasks
            .lock()
            .get(slot)
            .is_some_and(|h| !h.is_finished())
    }

    /// Number of slots with a task still pending
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.tasks.lock().values().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces() {
        let scheduler = Scheduler::new("test");
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            scheduler.debounce("commit", Duration::from_millis(500), counting(&runs));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending("commit"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let scheduler = Scheduler::new("test");
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler.debounce("commit", Duration::from_millis(500), counting(&runs));
        assert!(scheduler.cancel("commit"));
        assert!(!scheduler.cancel("commit"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_are_independent() {
        let scheduler = Scheduler::new("test");
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler.debounce("a", Duration::from_millis(100), counting(&runs));
        scheduler.debounce("b", Duration::from_millis(100), counting(&runs));
        assert_eq!(scheduler.active_count(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_long_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let scheduler = Scheduler::new("test");
            let runs = runs.clone();
            scheduler.spawn("poll", async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            });
            tokio::time::sleep(Duration::from_millis(35)).await;
        }
        let seen = runs.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_counts_pending() {
        let scheduler = Scheduler::new("test");
        scheduler.spawn("x", std::future::pending());
        scheduler.spawn("y", std::future::pending());
        tokio::task::yield_now().await;
        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(scheduler.active_count(), 0);
    }
}
