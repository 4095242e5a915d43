use crate::{
    bus::{Bus, BusMessage, Channels, Subscription, TopicFilter},
    component::Component,
    error::{BusError, DutwatchError, Result},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Destination of relayed orchestrator traffic
#[async_trait]
pub trait Downstream: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one message. The payload must be passed on untouched.
    async fn deliver(&self, topic: &str, payload: &str) -> std::result::Result<(), BusError>;
}

/// Republishes onto a second bus under the same topic
pub struct BusRelay {
    target: Bus,
}

impl BusRelay {
    pub fn new(target: Bus) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Downstream for BusRelay {
    fn name(&self) -> &str {
        "bus-relay"
    }

    async fn deliver(&self, topic: &str, payload: &str) -> std::result::Result<(), BusError> {
        let receivers = self.target.publish_raw(topic, payload);
        if receivers == 0 {
            debug!("No downstream listeners on {}", topic);
        }
        Ok(())
    }
}

/// Writes relayed traffic to the log, for stations without an uplink
pub struct LogDownstream;

#[async_trait]
impl Downstream for LogDownstream {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, topic: &str, payload: &str) -> std::result::Result<(), BusError> {
        info!(target: "dutwatch::uplink", "{} {}", topic, payload);
        Ok(())
    }
}

/// Counters for the relay
#[derive(Debug, Clone, Default)]
pub struct ForwarderStats {
    pub start_time: Option<DateTime<Utc>>,
    pub last_forwarded: Option<DateTime<Utc>>,
    pub forwarded: u64,
    pub delivery_errors: u64,
    pub dropped: u64,
}

/// Relays the `response`, `alert-response` and `status` channels of one DUT
/// to a downstream at best effort. Nothing flows back to the orchestrator.
pub struct Forwarder {
    bus: Bus,
    channels: Channels,
    downstream: Arc<dyn Downstream>,
    stats: Arc<RwLock<ForwarderStats>>,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Forwarder {
    pub fn new(bus: Bus, channels: Channels, downstream: Arc<dyn Downstream>) -> Self {
        Self {
            bus,
            channels,
            downstream,
            stats: Arc::new(RwLock::new(ForwarderStats::default())),
            cancel: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
        }
    }

    pub fn relayed_topics(channels: &Channels) -> TopicFilter {
        TopicFilter::topics([
            channels.response.clone(),
            channels.alert_response.clone(),
            channels.status.clone(),
        ])
    }

    pub async fn stats(&self) -> ForwarderStats {
        self.stats.read().await.clone()
    }

    async fn relay(
        mut subscription: Subscription,
        downstream: Arc<dyn Downstream>,
        stats: Arc<RwLock<ForwarderStats>>,
        cancel: CancellationToken,
    ) {
        loop {
            let message: BusMessage = tokio::select! {
                _ = cancel.cancelled() => break,
                received = subscription.recv() => match received {
                    Ok(message) => message,
                    Err(BusError::Lagged(n)) => {
                        warn!("Forwarder lagged, {} messages not relayed", n);
                        stats.write().await.dropped += n;
                        continue;
                    }
                    Err(_) => break,
                }
            };

            match downstream.deliver(&message.topic, &message.payload).await {
                Ok(()) => {
                    let mut stats = stats.write().await;
                    stats.forwarded += 1;
                    stats.last_forwarded = Some(Utc::now());
                }
                Err(e) => {
                    warn!("Delivery to {} failed: {}", downstream.name(), e);
                    stats.write().await.delivery_errors += 1;
                }
            }
        }
        debug!("Forwarder relay stopped");
    }
}

#[async_trait]
impl Component for Forwarder {
    fn name(&self) -> &str {
        "forwarder"
    }

    async fn start(&self) -> Result<()> {
        if self.task.lock().is_some() {
            return Err(DutwatchError::component("forwarder", "Already running"));
        }
        self.stats.write().await.start_time = Some(Utc::now());

        let subscription = self
            .bus
            .subscribe(Self::relayed_topics(&self.channels), "forwarder");
        let handle = tokio::spawn(Self::relay(
            subscription,
            Arc::clone(&self.downstream),
            Arc::clone(&self.stats),
            self.cancel.clone(),
        ));
        *self.task.lock() = Some(handle);

        info!(
            "Forwarder relaying {} to {}",
            self.channels.dut_id,
            self.downstream.name()
        );
        Ok(())
    }

    async fn housekeep(&self) -> Result<()> {
        let stats = self.stats.read().await;
        debug!(
            "Forwarder heartbeat: forwarded={}, errors={}, dropped={}",
            stats.forwarded, stats.delivery_errors, stats.dropped
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                warn!("Forwarder task ended abnormally: {}", e);
            }
        }
        info!("Forwarder closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    struct FailingDownstream;

    #[async_trait]
    impl Downstream for FailingDownstream {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(&self, topic: &str, _payload: &str) -> std::result::Result<(), BusError> {
            Err(BusError::PublishFailed {
                topic: topic.to_string(),
                details: "uplink down".to_string(),
            })
        }
    }

    async fn wait_for_forwarded(forwarder: &Forwarder, count: u64) {
        for _ in 0..200 {
            if forwarder.stats().await.forwarded >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("forwarder did not relay {} messages", count);
    }

    #[tokio::test]
    async fn test_relays_outbound_channels_byte_exact() {
        let bus = Bus::new(64);
        let uplink = Bus::new(64);
        let channels = Channels::for_dut("vid7");
        let mut downstream = uplink.subscribe(TopicFilter::Pattern("tester.*.*".into()), "uplink");

        let forwarder = Forwarder::new(bus.clone(), channels.clone(), Arc::new(BusRelay::new(uplink)));
        forwarder.start().await.unwrap();

        let payload = r#"{"stage":"popUp",   "status":"success"}"#;
        bus.publish_raw(&channels.response, payload);
        bus.publish_raw(&channels.result, r#"{"stage":"popUp","status":"success"}"#);
        bus.publish_raw(&channels.alert_response, r#"{"stage":"alert-msg","status":"failed"}"#);
        bus.publish_raw(&channels.status, r#"{"power":"off"}"#);

        let mut received = Vec::new();
        for _ in 0..3 {
            let message = timeout(Duration::from_secs(1), downstream.recv())
                .await
                .unwrap()
                .unwrap();
            received.push((message.topic.to_string(), message.payload.to_string()));
        }

        assert_eq!(received[0], (channels.response.clone(), payload.to_string()));
        assert_eq!(received[1].0, channels.alert_response);
        assert_eq!(received[2], (channels.status.clone(), r#"{"power":"off"}"#.to_string()));

        // Result traffic is not relayed
        wait_for_forwarded(&forwarder, 3).await;
        assert!(downstream.try_recv().unwrap().is_none());

        forwarder.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_delivery_errors_are_counted_not_fatal() {
        let bus = Bus::new(64);
        let channels = Channels::for_dut("vid1");
        let forwarder = Forwarder::new(bus.clone(), channels.clone(), Arc::new(FailingDownstream));
        forwarder.start().await.unwrap();

        bus.publish_raw(&channels.response, "{}");
        bus.publish_raw(&channels.status, "{}");

        for _ in 0..200 {
            if forwarder.stats().await.delivery_errors == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = forwarder.stats().await;
        assert_eq!(stats.delivery_errors, 2);
        assert_eq!(stats.forwarded, 0);

        forwarder.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let forwarder = Forwarder::new(Bus::new(8), Channels::for_dut("vid1"), Arc::new(LogDownstream));
        forwarder.start().await.unwrap();
        assert!(forwarder.start().await.is_err());
        forwarder.close().await.unwrap();
    }
}
