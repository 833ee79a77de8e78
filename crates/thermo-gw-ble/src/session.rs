//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Bluetooth LE discovery and device sessions."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Connect, capture one notification, tear down.
//!
//! Every failure inside a session ends as [`SessionOutcome::NoReading`]; nothing
//! escapes to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thermo_gw_common::time::{duration_to_millis, wall_clock_now};
use thermo_gw_msg::{DiscoveredDevice, Measurement, MeasurementCodec};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{Connection, NotificationStream, Radio};

/// Why a session finished without a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoReadingReason {
    ConnectFailed,
    SubscribeFailed,
    TimedOut,
    MalformedPayload,
    StreamClosed,
}

impl NoReadingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoReadingReason::ConnectFailed => "connect_failed",
            NoReadingReason::SubscribeFailed => "subscribe_failed",
            NoReadingReason::TimedOut => "timed_out",
            NoReadingReason::MalformedPayload => "malformed_payload",
            NoReadingReason::StreamClosed => "stream_closed",
        }
    }
}

impl fmt::Display for NoReadingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Reading(Measurement),
    NoReading(NoReadingReason),
}

impl SessionOutcome {
    /// Label used for logs and the sessions metric.
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Reading(_) => "reading",
            SessionOutcome::NoReading(reason) => reason.as_str(),
        }
    }

    pub fn into_measurement(self) -> Option<Measurement> {
        match self {
            SessionOutcome::Reading(measurement) => Some(measurement),
            SessionOutcome::NoReading(_) => None,
        }
    }
}

/// Reads one measurement from one peripheral at a time.
#[derive(Clone)]
pub struct DeviceSession {
    radio: Arc<dyn Radio>,
    characteristic: Uuid,
}

impl DeviceSession {
    pub fn new(radio: Arc<dyn Radio>, characteristic: Uuid) -> Self {
        Self {
            radio,
            characteristic,
        }
    }

    /// Capture the first notification from `device`, or give up after `read_timeout`.
    pub async fn read_one(&self, device: &DiscoveredDevice, read_timeout: Duration) -> SessionOutcome {
        let span = info_span!(
            "device_session",
            device_name = %device.name,
            device_address = %device.address
        );
        async {
            let outcome = self.run(device, read_timeout).await;
            debug!(outcome = outcome.label(), "session finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, device: &DiscoveredDevice, read_timeout: Duration) -> SessionOutcome {
        let mut connection = match self.radio.connect(&device.address).await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(error = %err, "connection failed");
                return SessionOutcome::NoReading(NoReadingReason::ConnectFailed);
            }
        };
        debug!("connected");

        let outcome = self.capture(connection.as_mut(), device, read_timeout).await;

        if let Err(err) = connection.disconnect().await {
            warn!(error = %err, "disconnect failed");
        }
        outcome
    }

    async fn capture(
        &self,
        connection: &mut dyn Connection,
        device: &DiscoveredDevice,
        read_timeout: Duration,
    ) -> SessionOutcome {
        let notifications = match connection.subscribe(self.characteristic).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, characteristic = %self.characteristic, "subscribe failed");
                return SessionOutcome::NoReading(NoReadingReason::SubscribeFailed);
            }
        };

        let outcome = first_notification(notifications, device, read_timeout).await;

        if let Err(err) = connection.unsubscribe(self.characteristic).await {
            warn!(error = %err, "unsubscribe failed");
        }
        outcome
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("characteristic", &self.characteristic)
            .finish_non_exhaustive()
    }
}

// The stream is consumed by value and dropped on return, so a second
// notification is never observed.
async fn first_notification(
    mut notifications: NotificationStream,
    device: &DiscoveredDevice,
    read_timeout: Duration,
) -> SessionOutcome {
    tokio::select! {
        next = notifications.next() => match next {
            Some(raw) => match MeasurementCodec::measurement(device, &raw, wall_clock_now()) {
                Ok(measurement) => {
                    info!(
                        temperature = measurement.value(),
                        unit = %measurement.unit(),
                        "measurement received"
                    );
                    SessionOutcome::Reading(measurement)
                }
                Err(err) => {
                    warn!(error = %err, "discarding notification");
                    SessionOutcome::NoReading(NoReadingReason::MalformedPayload)
                }
            },
            None => {
                warn!("notification stream closed before a measurement arrived");
                SessionOutcome::NoReading(NoReadingReason::StreamClosed)
            }
        },
        _ = tokio::time::sleep(read_timeout) => {
            info!(timeout_ms = duration_to_millis(read_timeout), "no notification before timeout");
            SessionOutcome::NoReading(NoReadingReason::TimedOut)
        }
    }
}

#[cfg(test)]
mod tests {
    use thermo_gw_common::TEMPERATURE_MEASUREMENT_UUID;
    use thermo_gw_msg::TemperatureUnit;
    use tokio::time::Instant;

    use super::*;
    use crate::sim::{RadioEvent, SimulatedPeripheral, SimulatedRadio};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn session(radio: &Arc<SimulatedRadio>) -> DeviceSession {
        DeviceSession::new(radio.clone(), TEMPERATURE_MEASUREMENT_UUID)
    }

    fn device(peripheral: &SimulatedPeripheral) -> DiscoveredDevice {
        DiscoveredDevice::new(peripheral.name.clone(), peripheral.address.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn first_notification_becomes_the_measurement() {
        let peripheral = SimulatedPeripheral::thermometer("Thermo1", "AA:BB:CC:DD:EE:FF", 0x01, 250);
        let radio = Arc::new(SimulatedRadio::new(vec![peripheral.clone()]));

        let outcome = session(&radio).read_one(&device(&peripheral), TIMEOUT).await;
        let measurement = outcome.into_measurement().expect("measurement");
        assert_eq!(measurement.value(), 482.0);
        assert_eq!(measurement.unit(), TemperatureUnit::Fahrenheit);
        assert_eq!(measurement.device_name(), "Thermo1");

        let address = peripheral.address.clone();
        assert_eq!(
            radio.events(),
            vec![
                RadioEvent::Connect(address.clone()),
                RadioEvent::Subscribe(address.clone()),
                RadioEvent::Unsubscribe(address.clone()),
                RadioEvent::Disconnect(address),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peripheral_times_out_after_exactly_read_timeout() {
        let peripheral = SimulatedPeripheral::thermometer("Quiet", "11:22", 0, 10).silent();
        let radio = Arc::new(SimulatedRadio::new(vec![peripheral.clone()]));

        let started = Instant::now();
        let outcome = session(&radio).read_one(&device(&peripheral), TIMEOUT).await;
        assert_eq!(outcome, SessionOutcome::NoReading(NoReadingReason::TimedOut));
        assert_eq!(started.elapsed(), TIMEOUT);
        assert!(radio.events().contains(&RadioEvent::Disconnect(peripheral.address.clone())));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_is_no_reading() {
        let peripheral = SimulatedPeripheral::thermometer("Busy", "33:44", 0, 10).refusing_connections();
        let radio = Arc::new(SimulatedRadio::new(vec![peripheral.clone()]));

        let outcome = session(&radio).read_one(&device(&peripheral), TIMEOUT).await;
        assert_eq!(outcome, SessionOutcome::NoReading(NoReadingReason::ConnectFailed));
        assert_eq!(radio.events(), vec![RadioEvent::Connect(peripheral.address.clone())]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_characteristic_still_disconnects() {
        let peripheral = SimulatedPeripheral::thermometer("Odd", "55:66", 0, 10);
        let radio = Arc::new(SimulatedRadio::new(vec![peripheral.clone()]));
        let session = DeviceSession::new(radio.clone(), Uuid::from_u128(0xdead));

        let outcome = session.read_one(&device(&peripheral), TIMEOUT).await;
        assert_eq!(outcome, SessionOutcome::NoReading(NoReadingReason::SubscribeFailed));
        let events = radio.events();
        assert_eq!(events.last(), Some(&RadioEvent::Disconnect(peripheral.address.clone())));
        assert!(!events.contains(&RadioEvent::Unsubscribe(peripheral.address.clone())));
    }

    #[tokio::test(start_paused = true)]
    async fn short_payload_is_reported_as_malformed() {
        let peripheral =
            SimulatedPeripheral::thermometer("Broken", "77:88", 0, 10).with_payload(vec![0x00, 0x01]);
        let radio = Arc::new(SimulatedRadio::new(vec![peripheral.clone()]));

        let outcome = session(&radio).read_one(&device(&peripheral), TIMEOUT).await;
        assert_eq!(outcome, SessionOutcome::NoReading(NoReadingReason::MalformedPayload));
        assert_eq!(outcome.label(), "malformed_payload");
    }

    #[tokio::test(start_paused = true)]
    async fn notification_after_timeout_is_not_captured() {
        let peripheral = SimulatedPeripheral::thermometer("Slow", "99:AA", 0, 10)
            .notify_after(Duration::from_secs(6));
        let radio = Arc::new(SimulatedRadio::new(vec![peripheral.clone()]));

        let outcome = session(&radio).read_one(&device(&peripheral), TIMEOUT).await;
        assert_eq!(outcome, SessionOutcome::NoReading(NoReadingReason::TimedOut));
    }
}
