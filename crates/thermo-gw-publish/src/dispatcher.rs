//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Broker publishing and publish supervision."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Spawns one task per publish so the scheduler never waits on the broker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thermo_gw_common::{DispatchPolicy, PublishConfig};
use thermo_gw_metrics::GatewayMetrics;
use thermo_gw_msg::{Measurement, OutboundMessage};
use thermo_gw_rt::{DrainReport, TaskTracker};
use tracing::{debug, info, warn};

use crate::{Publisher, Result};

/// Snapshot of publish outcomes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

pub struct PublishDispatcher {
    publisher: Arc<dyn Publisher>,
    settings: PublishConfig,
    counters: Arc<Counters>,
    metrics: Option<GatewayMetrics>,
    tracked: Mutex<TaskTracker>,
}

impl PublishDispatcher {
    pub fn new(publisher: Arc<dyn Publisher>, settings: PublishConfig) -> Self {
        Self {
            publisher,
            settings,
            counters: Arc::new(Counters::default()),
            metrics: None,
            tracked: Mutex::new(TaskTracker::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.settings.policy
    }

    /// Encode `measurement` and hand it to a publish task.
    pub fn dispatch(&self, measurement: &Measurement) -> Result<()> {
        let message = OutboundMessage::from_measurement(measurement)?;
        self.dispatch_message(message);
        Ok(())
    }

    pub fn dispatch_message(&self, message: OutboundMessage) {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        let (attempts, wait_for_room) = match self.settings.policy {
            DispatchPolicy::FireAndForget => (1, false),
            DispatchPolicy::Tracked => (1 + u32::from(self.settings.max_retries), true),
        };
        let job = PublishJob {
            publisher: self.publisher.clone(),
            counters: self.counters.clone(),
            metrics: self.metrics.clone(),
            attempts,
            wait_for_room,
            retry_interval: self.settings.retry_interval,
        };
        debug!(topic = %message.topic, policy = ?self.settings.policy, "dispatching publish");
        match self.settings.policy {
            DispatchPolicy::FireAndForget => {
                tokio::spawn(job.run(message));
            }
            DispatchPolicy::Tracked => self.tracked.lock().spawn(job.run(message)),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Publishes still running under the tracked policy.
    pub fn in_flight(&self) -> usize {
        self.tracked.lock().in_flight()
    }

    /// Wait for tracked publishes, abandoning any still running after the drain timeout.
    ///
    /// Detached fire-and-forget tasks are not waited on.
    pub async fn drain(&self) -> DrainReport {
        let pending = self.tracked.lock().take();
        let report = pending.join_within(self.settings.drain_timeout).await;
        let stats = self.stats();
        info!(
            completed = report.completed,
            abandoned = report.abandoned,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "publish dispatcher drained"
        );
        report
    }
}

impl std::fmt::Debug for PublishDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishDispatcher")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

struct PublishJob {
    publisher: Arc<dyn Publisher>,
    counters: Arc<Counters>,
    metrics: Option<GatewayMetrics>,
    attempts: u32,
    // Detached tasks have no drain deadline, so they never wait on a full client queue.
    wait_for_room: bool,
    retry_interval: Duration,
}

impl PublishJob {
    async fn run(self, message: OutboundMessage) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let sent = if self.wait_for_room {
                self.publisher.publish(&message.topic, &message.payload).await
            } else {
                self.publisher.publish_nowait(&message.topic, &message.payload).await
            };
            match sent {
                Ok(()) => {
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    self.observe("succeeded");
                    debug!(topic = %message.topic, attempt, "published");
                    return;
                }
                Err(err) if attempt < self.attempts => {
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    self.observe("retried");
                    warn!(topic = %message.topic, attempt, error = %err, "publish failed; retrying");
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.observe("failed");
                    warn!(topic = %message.topic, attempts = attempt, error = %err, "publish failed");
                    return;
                }
            }
        }
    }

    fn observe(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_publish(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use thermo_gw_msg::{DiscoveredDevice, MeasurementCodec};

    use super::*;
    use crate::InMemoryPublisher;

    fn settings(policy: DispatchPolicy) -> PublishConfig {
        PublishConfig {
            policy,
            max_retries: 3,
            retry_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(10),
        }
    }

    fn measurement() -> Measurement {
        let device = DiscoveredDevice::new(Some("Thermo1".into()), "AA:BB:CC:DD:EE:FF");
        MeasurementCodec::measurement(&device, &[0x00, 0x19, 0x00], Utc::now()).unwrap()
    }

    async fn settle(dispatcher: &PublishDispatcher, finished: u64) {
        for _ in 0..100 {
            let stats = dispatcher.stats();
            if stats.succeeded + stats.failed >= finished {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn fire_and_forget_publishes_without_tracking() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let dispatcher = PublishDispatcher::new(publisher.clone(), settings(DispatchPolicy::FireAndForget));

        dispatcher.dispatch(&measurement()).unwrap();
        assert_eq!(dispatcher.in_flight(), 0);
        settle(&dispatcher, 1).await;

        assert_eq!(dispatcher.stats().succeeded, 1);
        let published = publisher.published();
        assert_eq!(published[0].topic, "Thermo1/temp/AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    async fn fire_and_forget_failure_is_counted_not_retried() {
        let publisher = Arc::new(InMemoryPublisher::failing_first(1));
        let dispatcher = PublishDispatcher::new(publisher.clone(), settings(DispatchPolicy::FireAndForget));

        dispatcher.dispatch(&measurement()).unwrap();
        settle(&dispatcher, 1).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 0);
        assert_eq!(publisher.attempts(), 1);
    }

    /// Client whose request queue never has room.
    struct SaturatedClient;

    #[async_trait::async_trait]
    impl Publisher for SaturatedClient {
        async fn publish(&self, _topic: &str, _payload: &[u8]) -> crate::Result<()> {
            std::future::pending().await
        }

        async fn publish_nowait(&self, topic: &str, _payload: &[u8]) -> crate::Result<()> {
            Err(crate::PublishError::Rejected {
                topic: topic.to_owned(),
                reason: "request queue full".to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn fire_and_forget_fails_fast_on_a_full_client_queue() {
        let dispatcher =
            PublishDispatcher::new(Arc::new(SaturatedClient), settings(DispatchPolicy::FireAndForget));

        for _ in 0..3 {
            dispatcher.dispatch(&measurement()).unwrap();
        }
        settle(&dispatcher, 3).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.dispatched, 3);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.succeeded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tracked_retries_until_success() {
        let publisher = Arc::new(InMemoryPublisher::failing_first(2));
        let dispatcher = PublishDispatcher::new(publisher.clone(), settings(DispatchPolicy::Tracked));

        dispatcher.dispatch(&measurement()).unwrap();
        let report = dispatcher.drain().await;

        assert_eq!(report.completed, 1);
        let stats = dispatcher.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(publisher.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn tracked_gives_up_after_max_retries() {
        let publisher = Arc::new(InMemoryPublisher::failing_first(usize::MAX));
        let dispatcher = PublishDispatcher::new(publisher.clone(), settings(DispatchPolicy::Tracked));

        dispatcher.dispatch(&measurement()).unwrap();
        dispatcher.drain().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 3);
        assert_eq!(publisher.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_abandons_publishes_past_the_timeout() {
        let publisher = Arc::new(InMemoryPublisher::failing_first(usize::MAX));
        let mut config = settings(DispatchPolicy::Tracked);
        config.max_retries = 100;
        config.drain_timeout = Duration::from_secs(5);
        let dispatcher = PublishDispatcher::new(publisher, config);

        dispatcher.dispatch(&measurement()).unwrap();
        let report = dispatcher.drain().await;
        assert_eq!(report.abandoned, 1);
        assert_eq!(dispatcher.stats().failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn outcomes_reach_prometheus() {
        let registry = thermo_gw_metrics::new_registry();
        let metrics = GatewayMetrics::new(registry.clone()).unwrap();
        let dispatcher = PublishDispatcher::new(
            Arc::new(InMemoryPublisher::failing_first(1)),
            settings(DispatchPolicy::Tracked),
        )
        .with_metrics(metrics);

        dispatcher.dispatch(&measurement()).unwrap();
        dispatcher.drain().await;

        let families = registry.gather();
        let publishes = families
            .iter()
            .find(|family| family.get_name() == "thermo_gw_publishes_total")
            .unwrap();
        assert_eq!(publishes.get_metric().len(), 2);
    }
}
