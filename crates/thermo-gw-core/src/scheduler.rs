//! ---
//! tgw_section: "01-core-functionality"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Gateway scheduling loop and lifecycle."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Outer state machine: `Idle -> Scanning -> ReadingWindow -> Idle -> ... -> Terminated`.
//!
//! Within a window the current device set is read in full sequential passes.
//! Deadlines are only checked between passes, so a pass always completes and
//! a window may overrun `discovery_interval` by up to one pass.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thermo_gw_ble::{DeviceSession, DeviceSet, DiscoveryScanner, Radio, SessionOutcome};
use thermo_gw_common::time::duration_to_millis;
use thermo_gw_common::GatewayConfig;
use thermo_gw_metrics::GatewayMetrics;
use thermo_gw_publish::PublishDispatcher;
use thermo_gw_rt::Deadline;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The radio could not perform a discovery sweep.
    #[error("discovery failed: {0}")]
    Discovery(#[from] thermo_gw_ble::BleError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    Idle,
    Scanning,
    ReadingWindow,
    Terminated,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Scanning => "scanning",
            SchedulerState::ReadingWindow => "reading_window",
            SchedulerState::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// Timing parameters of a run. Fixed once the scheduler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub discovery_interval: Duration,
    pub total_runtime: Duration,
    pub read_timeout: Duration,
    pub scan_duration: Duration,
}

impl From<&GatewayConfig> for ScanWindow {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            discovery_interval: config.discovery_interval,
            total_runtime: config.total_runtime,
            read_timeout: config.read_timeout,
            scan_duration: config.scan_duration,
        }
    }
}

/// Totals for one completed run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub scans: u64,
    pub passes: u64,
    pub sessions: u64,
    pub readings: u64,
    pub no_readings: u64,
    pub publishes: u64,
}

pub struct GatewayScheduler {
    scanner: DiscoveryScanner,
    session: DeviceSession,
    dispatcher: Arc<PublishDispatcher>,
    window: ScanWindow,
    service: Uuid,
    devices: DeviceSet,
    state: watch::Sender<SchedulerState>,
    metrics: Option<GatewayMetrics>,
    summary: RunSummary,
}

impl GatewayScheduler {
    pub fn new(
        radio: Arc<dyn Radio>,
        dispatcher: Arc<PublishDispatcher>,
        config: &GatewayConfig,
    ) -> Self {
        let window = ScanWindow::from(config);
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            scanner: DiscoveryScanner::new(radio.clone(), window.scan_duration),
            session: DeviceSession::new(radio, config.measurement_characteristic),
            dispatcher,
            window,
            service: config.service_uuid,
            devices: DeviceSet::new(),
            state,
            metrics: None,
            summary: RunSummary::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Device set produced by the latest sweep.
    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    pub fn window(&self) -> ScanWindow {
        self.window
    }

    /// Drive scans and reading windows until the runtime budget is spent.
    ///
    /// Returns an error only when a discovery sweep cannot run.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let budget = Deadline::after(self.window.total_runtime);
        info!(
            total_runtime_s = self.window.total_runtime.as_secs_f64(),
            discovery_interval_s = self.window.discovery_interval.as_secs_f64(),
            read_timeout_s = self.window.read_timeout.as_secs_f64(),
            service = %self.service,
            "gateway scheduler started"
        );

        while !budget.is_expired() {
            self.transition(SchedulerState::Scanning);
            let devices = match self.scanner.discover(self.service).await {
                Ok(devices) => devices,
                Err(err) => {
                    error!(error = %err, "discovery sweep failed; stopping");
                    self.transition(SchedulerState::Terminated);
                    return Err(err.into());
                }
            };
            self.summary.scans += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_scan(devices.len());
            }
            self.devices = devices;

            let window = Deadline::after(self.window.discovery_interval);
            self.transition(SchedulerState::ReadingWindow);
            let span = info_span!("reading_window", scan = self.summary.scans, devices = self.devices.len());
            self.reading_window(window, budget).instrument(span).await;

            self.transition(SchedulerState::Idle);
            tokio::task::yield_now().await;
        }

        self.transition(SchedulerState::Terminated);
        info!(
            elapsed_s = budget.elapsed().as_secs_f64(),
            scans = self.summary.scans,
            passes = self.summary.passes,
            readings = self.summary.readings,
            no_readings = self.summary.no_readings,
            "runtime budget exhausted"
        );
        Ok(self.summary)
    }

    async fn reading_window(&mut self, window: Deadline, budget: Deadline) {
        if self.devices.is_empty() {
            let until = window.earliest(budget);
            debug!(idle_ms = duration_to_millis(until.remaining()), "no devices; idling through window");
            until.sleep().await;
            return;
        }

        loop {
            self.read_pass().await;
            if window.is_expired() || budget.is_expired() {
                break;
            }
            tokio::task::yield_now().await;
        }
        debug!(elapsed_ms = duration_to_millis(window.elapsed()), "reading window closed");
    }

    async fn read_pass(&mut self) {
        self.summary.passes += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_pass();
        }

        for device in self.devices.iter() {
            let outcome = self.session.read_one(device, self.window.read_timeout).await;
            self.summary.sessions += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_session(outcome.label());
            }
            match outcome {
                SessionOutcome::Reading(measurement) => {
                    self.summary.readings += 1;
                    match self.dispatcher.dispatch(&measurement) {
                        Ok(()) => self.summary.publishes += 1,
                        Err(err) => warn!(device = %device, error = %err, "measurement not dispatched"),
                    }
                }
                SessionOutcome::NoReading(reason) => {
                    self.summary.no_readings += 1;
                    debug!(device = %device, %reason, "no reading this pass");
                }
            }
        }
    }

    fn transition(&self, next: SchedulerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "scheduler state change");
        }
    }
}

impl fmt::Debug for GatewayScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayScheduler")
            .field("window", &self.window)
            .field("service", &self.service)
            .field("state", &self.state())
            .field("devices", &self.devices.len())
            .finish_non_exhaustive()
    }
}
