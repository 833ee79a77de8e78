//! ---
//! tgw_section: "01-core-functionality"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Runtime helpers supporting the scheduler."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Fixed point in time bounding a scheduling phase.
///
/// Built on the tokio clock so paused-time tests drive it deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started_at: Instant,
    expires_at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self::starting_at(Instant::now(), budget)
    }

    pub fn starting_at(started_at: Instant, budget: Duration) -> Self {
        Self {
            started_at,
            expires_at: started_at + budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.started_at)
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whichever of the two deadlines expires first.
    pub fn earliest(self, other: Deadline) -> Deadline {
        if other.expires_at < self.expires_at {
            other
        } else {
            self
        }
    }

    /// Suspend until the deadline passes. Returns immediately if it already has.
    pub async fn sleep(&self) {
        tokio::time::sleep_until(self.expires_at).await;
    }
}

/// Outcome of draining a [`TaskTracker`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub panicked: usize,
    pub abandoned: usize,
}

/// Keeps join handles for spawned background work so it can be counted and drained.
#[derive(Debug, Default)]
pub struct TaskTracker {
    tasks: Vec<JoinHandle<()>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();
        self.tasks.push(tokio::spawn(fut));
    }

    /// Number of tasks that have not finished yet.
    pub fn in_flight(&mut self) -> usize {
        self.reap();
        self.tasks.len()
    }

    /// Take ownership of the outstanding handles, leaving the tracker empty.
    pub fn take(&mut self) -> TaskTracker {
        TaskTracker {
            tasks: std::mem::take(&mut self.tasks),
        }
    }

    fn reap(&mut self) {
        self.tasks.retain(|task| !task.is_finished());
    }

    /// Await every task, aborting whatever is still running once `timeout` elapses.
    pub async fn join_within(self, timeout: Duration) -> DrainReport {
        let deadline = Deadline::after(timeout);
        let mut report = DrainReport::default();
        for mut task in self.tasks {
            tokio::select! {
                joined = &mut task => match joined {
                    Ok(()) => report.completed += 1,
                    Err(err) => {
                        warn!(error = %err, "tracked task failed");
                        report.panicked += 1;
                    }
                },
                _ = deadline.sleep() => {
                    task.abort();
                    report.abandoned += 1;
                }
            }
        }
        debug!(
            completed = report.completed,
            panicked = report.panicked,
            abandoned = report.abandoned,
            "tracked tasks drained"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_after_budget() {
        let deadline = Deadline::after(Duration::from_secs(30));
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!deadline.is_expired());
        assert_eq!(deadline.elapsed(), Duration::from_secs(29));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_picks_the_sooner_deadline() {
        let window = Deadline::after(Duration::from_secs(30));
        let budget = Deadline::after(Duration::from_secs(10));
        assert_eq!(window.earliest(budget), budget);
        assert_eq!(budget.earliest(window), budget);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_waits_for_expiry() {
        let deadline = Deadline::after(Duration::from_secs(3));
        let start = Instant::now();
        deadline.sleep().await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert!(deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_drains_finished_and_abandons_slow_tasks() {
        let mut tracker = TaskTracker::new();
        tracker.spawn(async {});
        tracker.spawn(async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        });
        tracker.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let report = tracker.take().join_within(Duration::from_secs(5)).await;
        assert_eq!(report.completed, 2);
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.panicked, 0);
    }

    #[tokio::test]
    async fn in_flight_ignores_finished_tasks() {
        let mut tracker = TaskTracker::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tracker.spawn(async {});
        tracker.spawn(async move {
            let _ = rx.await;
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tracker.in_flight(), 1);
        let _ = tx.send(());
        let report = tracker.join_within(Duration::from_secs(1)).await;
        assert_eq!(report.completed, 1);
    }
}
