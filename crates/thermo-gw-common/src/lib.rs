//! ---
//! tgw_section: "01-core-functionality"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Shared primitives and utilities for the gateway runtime."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Shared primitives for the thermometer gateway workspace.
//! This crate exposes configuration loading, tracing setup and time helpers
//! consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AdapterConfig, AppConfig, BrokerConfig, DispatchPolicy, GatewayConfig, LoadedAppConfig,
    LoggingConfig, MetricsConfig, Mode, PublishConfig, SimulatedDeviceConfig, SimulationConfig,
    TlsConfig, HEALTH_THERMOMETER_SERVICE_UUID, MQTT_TLS_PORT, TEMPERATURE_MEASUREMENT_UUID,
};
pub use logging::{init_tracing, LogFormat};
