//! ---
//! tgw_section: "03-observability"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Metrics collection and export utilities."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the gateway.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the listener is actually bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "thermo_gwd_starts_total",
            "Total number of times the gateway daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "thermo_gwd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Counters describing discovery, device sessions and publishing.
#[derive(Clone, Debug)]
pub struct GatewayMetrics {
    registry: SharedRegistry,
    scans_total: IntCounter,
    passes_total: IntCounter,
    devices_discovered: IntGauge,
    sessions_total: IntCounterVec,
    publishes_total: IntCounterVec,
}

impl GatewayMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let scans_total = IntCounter::with_opts(Opts::new(
            "thermo_gw_scans_total",
            "Discovery sweeps performed",
        ))?;
        registry.register(Box::new(scans_total.clone()))?;

        let passes_total = IntCounter::with_opts(Opts::new(
            "thermo_gw_passes_total",
            "Sequential read passes over the current device set",
        ))?;
        registry.register(Box::new(passes_total.clone()))?;

        let devices_discovered = IntGauge::with_opts(Opts::new(
            "thermo_gw_devices_discovered",
            "Devices advertising the target service in the latest sweep",
        ))?;
        registry.register(Box::new(devices_discovered.clone()))?;

        let sessions_total = IntCounterVec::new(
            Opts::new(
                "thermo_gw_sessions_total",
                "Device sessions by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(sessions_total.clone()))?;

        let publishes_total = IntCounterVec::new(
            Opts::new(
                "thermo_gw_publishes_total",
                "Publish attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(publishes_total.clone()))?;

        Ok(Self {
            registry,
            scans_total,
            passes_total,
            devices_discovered,
            sessions_total,
            publishes_total,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_scan(&self, devices: usize) {
        self.scans_total.inc();
        self.devices_discovered.set(devices as i64);
    }

    pub fn record_pass(&self) {
        self.passes_total.inc();
    }

    pub fn record_session(&self, outcome: &str) {
        self.sessions_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_publish(&self, outcome: &str) {
        self.publishes_total.with_label_values(&[outcome]).inc();
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;

    #[test]
    fn gateway_metrics_register_and_count() {
        let registry = new_registry();
        let metrics = GatewayMetrics::new(registry.clone()).unwrap();
        metrics.record_scan(3);
        metrics.record_scan(1);
        metrics.record_session("reading");
        metrics.record_session("timed_out");
        metrics.record_session("reading");
        metrics.record_publish("succeeded");

        let families = registry.gather();
        let find = |name: &str| {
            families
                .iter()
                .find(|family| family.get_name() == name)
                .unwrap_or_else(|| panic!("missing {name}"))
        };
        assert_eq!(find("thermo_gw_scans_total").get_metric()[0].get_counter().get_value(), 2.0);
        assert_eq!(
            find("thermo_gw_devices_discovered").get_metric()[0].get_gauge().get_value(),
            1.0
        );
        assert_eq!(find("thermo_gw_sessions_total").get_metric().len(), 2);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        GatewayMetrics::new(registry.clone()).unwrap();
        assert!(GatewayMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn http_server_serves_registry() {
        let registry = new_registry();
        let daemon = DaemonMetrics::new(registry.clone()).unwrap();
        daemon.inc_start();

        let server = spawn_http_server(registry, SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("thermo_gwd_starts_total 1"));
        server.shutdown().await.unwrap();
    }
}
