//! ---
//! tgw_section: "01-core-functionality"
//! tgw_subsection: "binary"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Binary entrypoint for the gateway daemon."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use thermo_gw_ble::{bring_up, BtleplugRadio, Radio, SimulatedRadio};
use thermo_gw_common::config::{AppConfig, Mode};
use thermo_gw_common::logging::init_tracing;
use thermo_gw_core::GatewayScheduler;
use thermo_gw_metrics::{new_registry, spawn_http_server, DaemonMetrics, GatewayMetrics, SharedRegistry};
use thermo_gw_publish::{InMemoryPublisher, MqttPublisher, PublishDispatcher, Publisher, TlsMaterial};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "BLE health thermometer to MQTT gateway",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override application mode")]
    mode: Option<CliMode>,

    #[arg(long, value_name = "SECONDS", help = "Override the total runtime budget")]
    total_runtime: Option<f64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Hardware,
    Simulation,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Hardware => Mode::Hardware,
            CliMode::Simulation => Mode::Simulation,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Scan, read and publish until the runtime budget is spent")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    CheckConfig,
}

const DEFAULT_CONFIG_CANDIDATES: [&str; 2] = ["configs/gateway.toml", "/etc/thermo-gw/gateway.toml"];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let load_started = Instant::now();
    let (mut config, config_path) = match &cli.config {
        Some(path) => (AppConfig::from_file(path)?, path.clone()),
        None => {
            let loaded = AppConfig::load_with_source(&DEFAULT_CONFIG_CANDIDATES)?;
            (loaded.config, loaded.source)
        }
    };
    let load_duration = load_started.elapsed();

    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    if let Some(seconds) = cli.total_runtime {
        config.gateway.total_runtime = Duration::try_from_secs_f64(seconds)
            .ok()
            .filter(|budget| !budget.is_zero())
            .ok_or_else(|| anyhow!("--total-runtime must be a positive number of seconds"))?;
    }
    config
        .validate()
        .context("configuration invalid after command-line overrides")?;

    let metrics_registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();

    init_tracing("thermo-gwd", &config.logging)?;
    info!(
        config_path = %config_path.display(),
        mode = ?config.mode,
        version = env!("CARGO_PKG_VERSION"),
        "configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, daemon_metrics.registry()).await,
        Commands::CheckConfig => {
            println!(
                "Configuration {} is valid (mode: {:?}, broker: {}:{}, total runtime: {:?})",
                config_path.display(),
                config.mode,
                config.broker.endpoint,
                config.broker.port,
                config.gateway.total_runtime
            );
            Ok(())
        }
    }
}

/// Broker side of the gateway, kept concrete so it can be shut down after the run.
enum Broker {
    Mqtt(Arc<MqttPublisher>),
    Memory(Arc<InMemoryPublisher>),
}

impl Broker {
    fn publisher(&self) -> Arc<dyn Publisher> {
        match self {
            Broker::Mqtt(publisher) => publisher.clone(),
            Broker::Memory(publisher) => publisher.clone(),
        }
    }

    async fn close(&self) {
        match self {
            Broker::Mqtt(publisher) => publisher.shutdown().await,
            Broker::Memory(publisher) => {
                info!(published = publisher.delivered(), "simulated broker closed")
            }
        }
    }
}

async fn open_backends(config: &AppConfig) -> Result<(Arc<dyn Radio>, Broker)> {
    match config.mode {
        Mode::Hardware => {
            bring_up(&config.adapter)
                .await
                .context("bluetooth adapter bring-up failed")?;
            let radio = BtleplugRadio::open(config.adapter.index)
                .await
                .context("failed to open bluetooth adapter")?;
            let tls = TlsMaterial::load(&config.broker.tls)?;
            let publisher = MqttPublisher::connect(&config.broker, tls)
                .context("failed to create mqtt client")?;
            Ok((Arc::new(radio), Broker::Mqtt(Arc::new(publisher))))
        }
        Mode::Simulation => {
            if config.simulation.devices.is_empty() {
                warn!("simulation mode without scripted devices; every sweep will be empty");
            }
            let radio = SimulatedRadio::from_config(&config.simulation);
            Ok((
                Arc::new(radio),
                Broker::Memory(Arc::new(InMemoryPublisher::new())),
            ))
        }
    }
}

async fn run_daemon(config: AppConfig, metrics_registry: SharedRegistry) -> Result<()> {
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(metrics_registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };
    let gateway_metrics = GatewayMetrics::new(metrics_registry)?;

    let (radio, broker) = open_backends(&config).await?;
    let dispatcher = Arc::new(
        PublishDispatcher::new(broker.publisher(), config.broker.publish.clone())
            .with_metrics(gateway_metrics.clone()),
    );
    let mut scheduler = GatewayScheduler::new(radio, dispatcher.clone(), &config.gateway)
        .with_metrics(gateway_metrics);

    let outcome = scheduler.run().await;

    let drained = dispatcher.drain().await;
    if drained.abandoned > 0 {
        warn!(abandoned = drained.abandoned, "publishes still pending at shutdown");
    }
    broker.close().await;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    let summary = outcome.context("gateway stopped on a fatal radio error")?;
    let stats = dispatcher.stats();
    info!(
        scans = summary.scans,
        passes = summary.passes,
        sessions = summary.sessions,
        readings = summary.readings,
        no_readings = summary.no_readings,
        published = stats.succeeded,
        publish_failures = stats.failed,
        "gateway run complete"
    );
    Ok(())
}
