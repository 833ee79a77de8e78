//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Broker publishing and publish supervision."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! rumqttc client over mutual TLS.
//!
//! The event loop runs in its own task and owns reconnection; publishes only
//! enqueue requests on the client channel. That channel holds `request_capacity`
//! requests, so while the broker is down `publish` waits for room and
//! `publish_nowait` fails.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use thermo_gw_common::BrokerConfig;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{PublishError, Publisher, Result, TlsMaterial};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Build the client and start its event loop. The connection is established lazily.
    pub fn connect(config: &BrokerConfig, tls: TlsMaterial) -> Result<Self> {
        let qos = qos_level(config.qos)?;
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("thermo-gw-{}", uuid::Uuid::new_v4()));

        let mut options = MqttOptions::new(client_id.clone(), config.endpoint.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_transport(tls.into_transport());

        let (client, event_loop) = AsyncClient::new(options, config.request_capacity);
        let broker = format!("{}:{}", config.endpoint, config.port);
        info!(broker = %broker, client_id = %client_id, ?qos, "mqtt client created");

        Ok(Self {
            client,
            qos,
            event_loop: spawn_event_loop(event_loop, broker),
        })
    }

    /// Send DISCONNECT and stop the event loop.
    pub async fn shutdown(&self) {
        if let Err(err) = self.client.disconnect().await {
            debug!(error = %err, "mqtt disconnect request not delivered");
        }
        self.event_loop.abort();
    }
}

impl std::fmt::Debug for MqttPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttPublisher")
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .publish(topic, self.qos, false, payload.to_vec())
            .await?;
        debug!(topic, bytes = payload.len(), "publish queued");
        Ok(())
    }

    async fn publish_nowait(&self, topic: &str, payload: &[u8]) -> Result<()> {
        // Fails with a full request channel while the event loop is backing off.
        self.client
            .try_publish(topic, self.qos, false, payload.to_vec())?;
        debug!(topic, bytes = payload.len(), "publish queued");
        Ok(())
    }
}

pub fn qos_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(PublishError::InvalidQos(other)),
    }
}

fn spawn_event_loop(mut event_loop: EventLoop, broker: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(broker = %broker, "mqtt event loop started");
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(broker = %broker, code = ?ack.code, "connected to broker");
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    debug!(packet_id = ack.pkid, "publish acknowledged");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(broker = %broker, error = %err, "mqtt connection error; reconnecting");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    })
}
