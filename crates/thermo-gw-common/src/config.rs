//! ---
//! tgw_section: "01-core-functionality"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Shared primitives and utilities for the gateway runtime."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use tracing::debug;
use uuid::Uuid;

use crate::logging::LogFormat;

/// Bluetooth SIG "Health Thermometer" service.
pub const HEALTH_THERMOMETER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1809_0000_1000_8000_0080_5f9b_34fb);

/// "Temperature Measurement" characteristic (notify) of the Health Thermometer service.
pub const TEMPERATURE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a1e_0000_1000_8000_0080_5f9b_34fb);

/// Standard MQTT-over-TLS port.
pub const MQTT_TLS_PORT: u16 = 8883;

fn default_mode() -> Mode {
    Mode::Hardware
}

fn default_service_uuid() -> Uuid {
    HEALTH_THERMOMETER_SERVICE_UUID
}

fn default_characteristic_uuid() -> Uuid {
    TEMPERATURE_MEASUREMENT_UUID
}

fn default_total_runtime() -> Duration {
    Duration::from_secs(6000)
}

fn default_discovery_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_scan_duration() -> Duration {
    Duration::from_secs(5)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_bring_up_command() -> Vec<String> {
    vec!["hciconfig".to_owned(), "hci0".to_owned(), "up".to_owned()]
}

fn default_diagnostics_command() -> Vec<String> {
    vec!["hciconfig".to_owned(), "-a".to_owned()]
}

fn default_broker_port() -> u16 {
    MQTT_TLS_PORT
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_qos() -> u8 {
    1
}

fn default_request_capacity() -> usize {
    10
}

fn default_max_retries() -> u8 {
    3
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_device_cert() -> PathBuf {
    PathBuf::from("/home/root/certs/certificate.pem")
}

fn default_private_key() -> PathBuf {
    PathBuf::from("/home/root/certs/private.key")
}

fn default_root_ca() -> PathBuf {
    PathBuf::from("/home/root/certs/AmazonRootCA1.pem")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_simulated_services() -> Vec<Uuid> {
    vec![HEALTH_THERMOMETER_SERVICE_UUID]
}

fn default_notify_after() -> Duration {
    Duration::from_millis(200)
}

/// Primary configuration object for the gateway daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "THERMO_GW_CONFIG";

    /// Load configuration from disk, respecting the `THERMO_GW_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_file(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_file(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read, parse and validate one configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;
        self.broker.validate(self.mode)?;
        if self.mode.is_simulation() {
            self.simulation.validate()?;
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            gateway: GatewayConfig::default(),
            adapter: AdapterConfig::default(),
            broker: BrokerConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Where readings come from.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Real Bluetooth adapter and a TLS-secured broker.
    #[default]
    Hardware,
    /// Scripted peripherals and an in-memory publisher.
    Simulation,
}

impl Mode {
    pub fn is_simulation(&self) -> bool {
        matches!(self, Mode::Simulation)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hardware" => Ok(Mode::Hardware),
            "simulation" => Ok(Mode::Simulation),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Discovery and scheduling parameters.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Uuid,
    #[serde(default = "default_characteristic_uuid")]
    pub measurement_characteristic: Uuid,
    #[serde(default = "default_total_runtime")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub total_runtime: Duration,
    #[serde(default = "default_discovery_interval")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub discovery_interval: Duration,
    #[serde(default = "default_scan_duration")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub scan_duration: Duration,
    #[serde(default = "default_read_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub read_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            measurement_characteristic: default_characteristic_uuid(),
            total_runtime: default_total_runtime(),
            discovery_interval: default_discovery_interval(),
            scan_duration: default_scan_duration(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("total_runtime", self.total_runtime),
            ("discovery_interval", self.discovery_interval),
            ("scan_duration", self.scan_duration),
            ("read_timeout", self.read_timeout),
        ] {
            if value.is_zero() {
                return Err(anyhow!("gateway.{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

/// Local Bluetooth adapter selection and bring-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Index into the adapters reported by the platform.
    #[serde(default)]
    pub index: usize,
    /// Command run before the radio is opened; empty disables bring-up.
    #[serde(default = "default_bring_up_command")]
    pub bring_up: Vec<String>,
    /// Command whose output is logged after bring-up; empty disables it.
    #[serde(default = "default_diagnostics_command")]
    pub diagnostics: Vec<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            index: 0,
            bring_up: default_bring_up_command(),
            diagnostics: default_diagnostics_command(),
        }
    }
}

/// How publish tasks are supervised.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchPolicy {
    /// Detached tasks; failures are logged and counted only.
    #[default]
    FireAndForget,
    /// Tasks are retained, retried on failure, and drained at shutdown.
    Tracked,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub policy: DispatchPolicy,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_retry_interval")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub retry_interval: Duration,
    #[serde(default = "default_drain_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub drain_timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            policy: DispatchPolicy::default(),
            max_retries: default_max_retries(),
            retry_interval: default_retry_interval(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_device_cert")]
    pub device_cert: PathBuf,
    #[serde(default = "default_private_key")]
    pub private_key: PathBuf,
    #[serde(default = "default_root_ca")]
    pub root_ca: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            device_cert: default_device_cert(),
            private_key: default_private_key(),
            root_ca: default_root_ca(),
        }
    }
}

/// Remote MQTT broker connection settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub keep_alive: Duration,
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Capacity of the client request channel.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            port: default_broker_port(),
            client_id: None,
            keep_alive: default_keep_alive(),
            qos: default_qos(),
            request_capacity: default_request_capacity(),
            tls: TlsConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self, mode: Mode) -> Result<()> {
        if self.qos > 2 {
            return Err(anyhow!("broker.qos must be 0, 1 or 2 (got {})", self.qos));
        }
        if self.request_capacity == 0 {
            return Err(anyhow!("broker.request_capacity must be greater than zero"));
        }
        if !mode.is_simulation() && self.endpoint.trim().is_empty() {
            return Err(anyhow!("broker.endpoint is required in hardware mode"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

/// Scripted peripheral used in simulation mode.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
    #[serde(default = "default_simulated_services")]
    pub services: Vec<Uuid>,
    /// Measurement flags byte; bit 0 selects Fahrenheit.
    #[serde(default)]
    pub flags: u8,
    #[serde(default)]
    pub raw_value: u16,
    #[serde(default = "default_notify_after")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub notify_after: Duration,
    /// Never sends a notification.
    #[serde(default)]
    pub silent: bool,
    /// Refuses every connection attempt.
    #[serde(default)]
    pub fail_connect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SimulationConfig {
    #[serde(default)]
    pub devices: Vec<SimulatedDeviceConfig>,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        for device in &self.devices {
            if device.address.trim().is_empty() {
                return Err(anyhow!("simulated devices must declare an address"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_thermometer_profile() {
        let config = AppConfig::default();
        assert_eq!(config.mode, Mode::Hardware);
        assert_eq!(
            config.gateway.service_uuid.to_string(),
            "00001809-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            config.gateway.measurement_characteristic.to_string(),
            "00002a1e-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(config.gateway.read_timeout, Duration::from_secs(5));
        assert_eq!(config.gateway.discovery_interval, Duration::from_secs(30));
        assert_eq!(config.gateway.total_runtime, Duration::from_secs(6000));
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.qos, 1);
        assert_eq!(config.broker.publish.policy, DispatchPolicy::FireAndForget);
    }

    #[test]
    fn hardware_mode_requires_endpoint() {
        let config = AppConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broker.endpoint"));
    }

    #[test]
    fn parses_uppercase_service_uuid_and_fractional_durations() {
        let config: AppConfig = r#"
            mode = "simulation"

            [gateway]
            service_uuid = "00001809-0000-1000-8000-00805F9B34FB"
            read_timeout = 0.5
            discovery_interval = 2
        "#
        .parse()
        .unwrap();
        assert_eq!(config.gateway.service_uuid, HEALTH_THERMOMETER_SERVICE_UUID);
        assert_eq!(config.gateway.read_timeout, Duration::from_millis(500));
        assert_eq!(config.gateway.discovery_interval, Duration::from_secs(2));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let err = r#"
            mode = "simulation"
            [gateway]
            read_timeout = 0
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("read_timeout"));
    }

    #[test]
    fn mode_from_str_is_case_insensitive() {
        assert_eq!("Simulation".parse::<Mode>().unwrap(), Mode::Simulation);
        assert!("hybrid".parse::<Mode>().is_err());
    }
}
