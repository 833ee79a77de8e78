//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Broker publishing and publish supervision."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Hand-off of measurements to the message broker.

use async_trait::async_trait;

pub mod dispatcher;
pub mod memory;
pub mod mqtt;
pub mod tls;

pub use dispatcher::{DispatchStats, PublishDispatcher};
pub use memory::InMemoryPublisher;
pub use mqtt::MqttPublisher;
pub use tls::TlsMaterial;

pub type Result<T> = std::result::Result<T, PublishError>;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("unsupported qos level {0}")]
    InvalidQos(u8),
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("failed to encode measurement: {0}")]
    Encode(#[from] thermo_gw_msg::MessageError),
    #[error("broker rejected publish to {topic}: {reason}")]
    Rejected { topic: String, reason: String },
}

/// Destination for encoded measurements.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Queue `payload` on `topic`. Returns once the client accepted the request,
    /// not when the broker acknowledged it.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Like [`Publisher::publish`], but fails instead of waiting when the client
    /// cannot take the request right away. Used for untracked publishes, which
    /// must not accumulate while the broker is unreachable.
    async fn publish_nowait(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.publish(topic, payload).await
    }
}
