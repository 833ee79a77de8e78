//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Broker publishing and publish supervision."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thermo_gw_msg::OutboundMessage;
use tracing::info;

use crate::{PublishError, Publisher, Result};

/// Messages kept by [`InMemoryPublisher::new`].
pub const DEFAULT_RETAINED: usize = 256;

/// Publisher used in simulation mode: logs every message and keeps the most recent ones.
#[derive(Debug)]
pub struct InMemoryPublisher {
    recent: Mutex<VecDeque<OutboundMessage>>,
    retain: usize,
    delivered: AtomicUsize,
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self::retaining(DEFAULT_RETAINED)
    }
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retain` messages; older ones are dropped but still counted.
    pub fn retaining(retain: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(retain.min(DEFAULT_RETAINED))),
            retain,
            delivered: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Reject the next `count` publish attempts.
    pub fn failing_first(count: usize) -> Self {
        let publisher = Self::default();
        publisher.failures_remaining.store(count, Ordering::Relaxed);
        publisher
    }

    /// Retained messages, oldest first.
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Every accepted message, including those no longer retained.
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let rejected = self
            .failures_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(PublishError::Rejected {
                topic: topic.to_owned(),
                reason: "simulated broker rejection".to_owned(),
            });
        }
        info!(
            topic,
            payload = %String::from_utf8_lossy(payload),
            "simulated publish"
        );
        self.delivered.fetch_add(1, Ordering::Relaxed);
        if self.retain > 0 {
            let mut recent = self.recent.lock();
            if recent.len() == self.retain {
                recent.pop_front();
            }
            recent.push_back(OutboundMessage {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }
}
