//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Bluetooth LE discovery and device sessions."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Host adapter bring-up before the radio is opened.

use thermo_gw_common::AdapterConfig;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{BleError, Result};

/// Run the configured bring-up command, then log the diagnostics command output.
///
/// A failing bring-up is fatal. Diagnostics are best effort.
pub async fn bring_up(config: &AdapterConfig) -> Result<()> {
    if let Some(output) = run(&config.bring_up).await? {
        if !output.status.success() {
            return Err(BleError::AdapterBringUp {
                command: config.bring_up.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        info!(command = %config.bring_up.join(" "), "bluetooth adapter brought up");
    }

    match run(&config.diagnostics).await {
        Ok(Some(output)) => info!(
            command = %config.diagnostics.join(" "),
            status = %output.status,
            output = %String::from_utf8_lossy(&output.stdout).trim(),
            "adapter diagnostics"
        ),
        Ok(None) => {}
        Err(err) => warn!(error = %err, "adapter diagnostics unavailable"),
    }
    Ok(())
}

async fn run(command: &[String]) -> Result<Option<std::process::Output>> {
    let Some((program, args)) = command.split_first() else {
        return Ok(None);
    };
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| BleError::AdapterCommand {
            command: command.join(" "),
            source,
        })?;
    Ok(Some(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bring_up: &[&str], diagnostics: &[&str]) -> AdapterConfig {
        AdapterConfig {
            index: 0,
            bring_up: bring_up.iter().map(|s| s.to_string()).collect(),
            diagnostics: diagnostics.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn empty_commands_are_skipped() {
        bring_up(&config(&[], &[])).await.unwrap();
    }

    #[tokio::test]
    async fn failing_bring_up_is_fatal() {
        let err = bring_up(&config(&["sh", "-c", "echo down >&2; exit 3"], &[]))
            .await
            .unwrap_err();
        match err {
            BleError::AdapterBringUp { command, stderr, .. } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(stderr, "down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let err = bring_up(&config(&["/nonexistent/thermo-gw-hciconfig"], &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, BleError::AdapterCommand { .. }));
    }

    #[tokio::test]
    async fn diagnostics_failure_does_not_abort() {
        bring_up(&config(&["true"], &["/nonexistent/thermo-gw-diag"]))
            .await
            .unwrap();
    }
}
