use crate::error::{BusError, MessageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A JSON payload published on a named topic.
///
/// The payload is kept as the exact text that was published so relays can
/// forward it byte for byte.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: Arc<str>,
    pub payload: Arc<str>,
}

impl BusMessage {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        serde_json::from_str(&self.payload).map_err(|e| MessageError::Malformed {
            topic: self.topic.to_string(),
            details: e.to_string(),
        })
    }
}

/// Topic names for one DUT instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub dut_id: String,
    /// Detector -> orchestrator
    pub result: String,
    /// Switch or external -> orchestrator
    pub alert: String,
    /// Orchestrator -> forwarder / detector
    pub response: String,
    /// Orchestrator -> forwarder / detector
    pub alert_response: String,
    /// Orchestrator -> forwarder, periodic and after writes
    pub status: String,
}

impl Channels {
    pub fn for_dut(dut_id: &str) -> Self {
        Self {
            dut_id: dut_id.to_string(),
            result: format!("tester.{}.result", dut_id),
            alert: format!("tester.{}.alert", dut_id),
            response: format!("tester.{}.response", dut_id),
            alert_response: format!("tester.{}.alert-response", dut_id),
            status: format!("tester.{}.status", dut_id),
        }
    }
}

/// Topic selection for a subscription
#[derive(Debug, Clone)]
pub enum TopicFilter {
    /// Accept every topic
    All,
    /// Accept one exact topic
    Exact(String),
    /// Dot-separated pattern where `*` matches exactly one segment
    Pattern(String),
    /// Accept when any inner filter accepts
    AnyOf(Vec<TopicFilter>),
}

impl TopicFilter {
    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TopicFilter::AnyOf(
            topics
                .into_iter()
                .map(|t| TopicFilter::Exact(t.into()))
                .collect(),
        )
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicFilter::All => true,
            TopicFilter::Exact(expected) => expected == topic,
            TopicFilter::Pattern(pattern) => {
                let mut pattern_parts = pattern.split('.');
                let mut topic_parts = topic.split('.');
                loop {
                    match (pattern_parts.next(), topic_parts.next()) {
                        (None, None) => return true,
                        (Some("*"), Some(_)) => continue,
                        (Some(p), Some(t)) if p == t => continue,
                        _ => return false,
                    }
                }
            }
            TopicFilter::AnyOf(filters) => filters.iter().any(|f| f.matches(topic)),
        }
    }
}

/// In-process publish/subscribe bus shared by all station components
pub struct Bus {
    sender: broadcast::Sender<BusMessage>,
    debug_logging: bool,
}

impl Bus {
    /// Create a new bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new bus that logs every publish at debug level
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to topics accepted by `filter`
    pub fn subscribe(&self, filter: TopicFilter, name: &str) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
            name: name.to_string(),
        }
    }

    /// Publish a pre-serialized payload. Fire-and-forget: returns the number
    /// of subscribers that were live at the time of the send.
    pub fn publish_raw(&self, topic: &str, payload: impl Into<Arc<str>>) -> usize {
        let message = BusMessage {
            topic: Arc::from(topic),
            payload: payload.into(),
        };

        if self.debug_logging {
            debug!("Publishing on {}: {}", message.topic, message.payload);
        }

        match self.sender.send(message) {
            Ok(count) => count,
            Err(_) => {
                debug!("No subscribers for {}", topic);
                0
            }
        }
    }

    /// Serialize and publish a message
    pub fn publish<T: Serialize>(&self, topic: &str, message: &T) -> Result<usize, BusError> {
        let payload = serde_json::to_string(message).map_err(|e| BusError::PublishFailed {
            topic: topic.to_string(),
            details: e.to_string(),
        })?;
        Ok(self.publish_raw(topic, payload))
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for Bus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Receiver side of a topic subscription
pub struct Subscription {
    receiver: broadcast::Receiver<BusMessage>,
    filter: TopicFilter,
    name: String,
}

impl Subscription {
    /// Receive the next message accepted by the filter
    pub async fn recv(&mut self) -> Result<BusMessage, BusError> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => {
                    if self.filter.matches(&message.topic) {
                        return Ok(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Subscriber '{}' lagged behind by {} messages", self.name, n);
                    return Err(BusError::Lagged(n));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Bus closed for subscriber '{}'", self.name);
                    return Err(BusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive a message without waiting
    pub fn try_recv(&mut self) -> Result<Option<BusMessage>, BusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    if self.filter.matches(&message.topic) {
                        return Ok(Some(message));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Subscriber '{}' lagged behind by {} messages", self.name, n);
                    return Err(BusError::Lagged(n));
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(BusError::ChannelClosed);
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
