//! ---
//! tgw_section: "02-messaging-data-model"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Measurement data model and payload codecs."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Data model shared by discovery, device sessions and publishing.

pub mod codec;
#[allow(missing_docs)]
pub mod payload;
#[allow(missing_docs)]
pub mod types;

/// Shared result type for message encoding.
pub type Result<T> = std::result::Result<T, MessageError>;

/// Errors raised while turning measurements into broker messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Notification payload could not be decoded.
    #[error(transparent)]
    Codec(#[from] codec::CodecError),
    /// Wrapper for JSON serialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use codec::{CodecError, DecodedTemperature, MeasurementCodec};
pub use payload::{measurement_topic, topic_for, MeasurementRecord, OutboundMessage};
pub use types::{DeviceAddress, DiscoveredDevice, Measurement, TemperatureUnit, UNKNOWN_DEVICE_NAME};
