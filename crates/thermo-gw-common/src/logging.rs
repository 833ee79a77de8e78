//! ---
//! tgw_section: "01-core-functionality"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Shared primitives and utilities for the gateway runtime."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Daemon log layout.
//!
//! Gateway events nest under three spans, so every line carries its context:
//!
//! * `discovery` (`service`) around one sweep,
//! * `reading_window` (`scan`, `devices`) around the passes after a sweep,
//! * `device_session` (`device_name`, `device_address`) around one connect/read/teardown.
//!
//! Per-device outcomes are logged at `info`/`warn` inside `device_session`; scheduler
//! state changes and publish attempts are `debug`. The BLE and MQTT client crates are
//! held at `warn` by default since they log every GATT and packet exchange.
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "THERMO_GW_LOG";
const DEFAULT_DIRECTIVE: &str = "info,btleplug=warn,rumqttc=warn";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `THERMO_GW_LOG` overrides the filter (e.g. `info`, `debug,btleplug=warn`). When unset
///   `RUST_LOG` is honoured, finally defaulting to `info` with the BLE and MQTT clients at `warn`.
/// * The stdout layer follows [`LoggingConfig::format`]; a daily rolling JSON file is
///   always written under [`LoggingConfig::directory`].
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config
        .file_prefix
        .clone()
        .unwrap_or_else(|| service_name.to_owned());

    let file_appender = daily(&config.directory, format!("{}.log", prefix));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to {} logging",
                LOG_ENV, err, DEFAULT_DIRECTIVE
            );
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        Err(_) => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
    };

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_directory() {
        let temp = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: temp.path().join("nested/logs"),
            format: LogFormat::Pretty,
            file_prefix: Some("test".into()),
        };
        init_tracing("thermo-gwd", &config).unwrap();
        assert!(config.directory.is_dir());
    }

    #[test]
    fn default_directive_quiets_radio_and_broker_clients() {
        let filter = EnvFilter::try_new(DEFAULT_DIRECTIVE).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("btleplug=warn"));
        assert!(rendered.contains("rumqttc=warn"));
    }

    #[test]
    fn log_format_uses_kebab_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: LogFormat,
        }
        let parsed: Wrapper = toml::from_str("format = \"structured-json\"").unwrap();
        assert_eq!(parsed.format, LogFormat::StructuredJson);
    }
}
