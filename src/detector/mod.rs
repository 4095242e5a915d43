mod analysis;
mod engine;
mod state;

pub use analysis::{polygon_area, FrameAnalyzer};
pub use engine::{DetectionEngine, DetectionSummary, Tunables};
pub use state::{DetectionPhase, DetectionState, FrameClassification, FrameMetrics, Thresholds};

use crate::bus::{Bus, BusMessage, Channels, Subscription, TopicFilter};
use crate::component::Component;
use crate::config::DetectorConfig;
use crate::error::{BusError, DetectorError, Result};
use crate::events::{AlertOrigin, Outcome, Stage, StageEvent};
use crate::source::{open_source_for_path, FrameSource};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Produces a fresh, unopened frame source each time the detector needs one
pub type SourceFactory =
    Box<dyn Fn() -> std::result::Result<Box<dyn FrameSource>, DetectorError> + Send + Sync>;

/// Last alert acknowledgement seen on the alert-response channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertAcknowledgement {
    pub acknowledged: bool,
    pub origin: Option<AlertOrigin>,
}

struct DetectorInner {
    settings: DetectorConfig,
    bus: Bus,
    channels: Channels,
    engine: tokio::sync::Mutex<DetectionEngine>,
    source_factory: SourceFactory,
    acknowledgement: parking_lot::Mutex<AlertAcknowledgement>,
    halted: AtomicBool,
}

/// Bus-facing wrapper around the detection engine.
///
/// With `await_handshake` the engine is brought up step by step as the
/// orchestrator confirms each stage: `init` configures, `beginCapture` opens
/// the source, `testScreen` starts the frame loop. Otherwise all three happen
/// at start.
pub struct DetectorComponent {
    inner: Arc<DetectorInner>,
    cancel: CancellationToken,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DetectorComponent {
    pub fn new(settings: DetectorConfig, bus: Bus, channels: Channels, source_factory: SourceFactory) -> Self {
        let engine = DetectionEngine::new(settings.clone(), bus.clone(), channels.clone());
        Self {
            inner: Arc::new(DetectorInner {
                settings,
                bus,
                channels,
                engine: tokio::sync::Mutex::new(engine),
                source_factory,
                acknowledgement: parking_lot::Mutex::new(AlertAcknowledgement::default()),
                halted: AtomicBool::new(false),
            }),
            cancel: CancellationToken::new(),
            listener: parking_lot::Mutex::new(None),
        }
    }

    /// Build a detector reading the source configured under `[detector]`
    pub fn from_config(settings: DetectorConfig, bus: Bus, channels: Channels) -> Self {
        let path = settings.source.clone();
        let fps = settings.source_fps;
        let factory: SourceFactory = Box::new(move || match &path {
            Some(path) => open_source_for_path(path, fps),
            None => Err(DetectorError::SourceUnavailable {
                source_name: "<none>".to_string(),
                details: "no detector source configured".to_string(),
            }),
        });
        Self::new(settings, bus, channels, factory)
    }

    pub fn acknowledgement(&self) -> AlertAcknowledgement {
        *self.inner.acknowledgement.lock()
    }

    /// True once a fatal error stopped this detector instance
    pub fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> bool {
        self.inner.engine.lock().await.is_running()
    }

    /// Wait for the frame loop to end on its own (source exhausted)
    pub async fn wait_for_completion(&self) -> Option<std::result::Result<DetectionSummary, DetectorError>> {
        self.inner.engine.lock().await.wait().await
    }
}

impl DetectorInner {
    fn publish_result(&self, stage: Stage, status: Outcome) {
        if let Err(e) = self
            .bus
            .publish(&self.channels.result, &StageEvent::new(stage, status))
        {
            warn!("Failed to publish {} result: {}", stage, e);
        }
    }

    fn halt(&self, error: &DetectorError) {
        error!("Detector for {} halted: {}", self.channels.dut_id, error);
        self.halted.store(true, Ordering::SeqCst);
    }

    async fn configure(&self) -> std::result::Result<(), DetectorError> {
        let mut engine = self.engine.lock().await;
        engine
            .configure(
                self.settings.frame_threshold_seconds,
                self.settings.binarization_threshold,
            )
            .map(|_| ())
    }

    async fn open(&self) -> std::result::Result<(), DetectorError> {
        let mut engine = self.engine.lock().await;
        if engine.is_running() || engine.is_open() {
            debug!("Source already open for {}", self.channels.dut_id);
            return Ok(());
        }
        let source = (self.source_factory)()?;
        engine.open_source(source).map(|_| ())
    }

    async fn start_loop(&self) -> std::result::Result<(), DetectorError> {
        self.engine.lock().await.start()
    }

    /// Configure, open and start without waiting for the orchestrator
    async fn bring_up(&self) -> std::result::Result<(), DetectorError> {
        self.configure().await?;
        self.open().await?;
        self.start_loop().await
    }

    async fn handle_message(&self, message: &BusMessage) {
        let event = match StageEvent::decode(&message.topic, &message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping message on {}: {}", message.topic, e);
                return;
            }
        };

        if *message.topic == *self.channels.response {
            self.handle_response(event).await;
        } else if *message.topic == *self.channels.alert_response {
            self.handle_alert_response(event);
        }
    }

    async fn handle_response(&self, event: StageEvent) {
        if event.status == Outcome::Failed {
            warn!("Orchestrator reported {} failed", event.stage);
            return;
        }
        if !self.settings.await_handshake || self.halted.load(Ordering::SeqCst) {
            debug!("Ignoring {} response", event.stage);
            return;
        }

        match event.stage {
            Stage::Init => {
                let result = self.configure().await;
                if let Err(e) = &result {
                    self.halt(e);
                }
                self.publish_result(Stage::BeginCapture, Outcome::from_bool(result.is_ok()));
            }
            Stage::BeginCapture => {
                let result = self.open().await;
                if let Err(e) = &result {
                    self.halt(e);
                }
                self.publish_result(Stage::TestScreen, Outcome::from_bool(result.is_ok()));
            }
            Stage::TestScreen => {
                if let Err(e) = self.start_loop().await {
                    self.halt(&e);
                }
            }
            other => debug!("No detector action for {} response", other),
        }
    }

    fn handle_alert_response(&self, event: StageEvent) {
        let mut acknowledgement = self.acknowledgement.lock();
        match (event.stage, event.status) {
            (Stage::AlertBySwitch, Outcome::Success) => {
                *acknowledgement = AlertAcknowledgement {
                    acknowledged: true,
                    origin: Some(AlertOrigin::Switch),
                };
                info!("Alert confirmed by switch");
            }
            (Stage::AlertByMessage, Outcome::Success) => {
                *acknowledgement = AlertAcknowledgement {
                    acknowledged: true,
                    origin: Some(AlertOrigin::Message),
                };
                info!("Alert confirmed by detection");
            }
            (Stage::AlertReset, Outcome::Success) => {
                *acknowledgement = AlertAcknowledgement::default();
                info!("Alert reset confirmed");
            }
            (stage, Outcome::Failed) => warn!("Orchestrator reported {} failed", stage),
            (stage, _) => debug!("Ignoring {} alert response", stage),
        }
    }
}

async fn run_listener(inner: Arc<DetectorInner>, mut subscription: Subscription, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = subscription.recv() => match received {
                Ok(message) => inner.handle_message(&message).await,
                Err(BusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }
    debug!("Detector listener stopped");
}

#[async_trait]
impl Component for DetectorComponent {
    fn name(&self) -> &str {
        "detector"
    }

    async fn start(&self) -> Result<()> {
        let subscription = self.inner.bus.subscribe(
            TopicFilter::topics([
                self.inner.channels.response.clone(),
                self.inner.channels.alert_response.clone(),
            ]),
            "detector",
        );

        let handle = tokio::spawn(run_listener(
            Arc::clone(&self.inner),
            subscription,
            self.cancel.clone(),
        ));
        *self.listener.lock() = Some(handle);

        if self.inner.settings.await_handshake {
            info!("Detector waiting for orchestrator init");
        } else if let Err(e) = self.inner.bring_up().await {
            // Fatal to this detector only; the rest of the station keeps running
            self.inner.halt(&e);
        }
        Ok(())
    }

    async fn housekeep(&self) -> Result<()> {
        let running = self.inner.engine.lock().await.is_running();
        debug!(
            "Detector heartbeat: running={}, halted={}, acknowledgement={:?}",
            running,
            self.is_halted(),
            self.acknowledgement()
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }

        match self.inner.engine.lock().await.shutdown().await {
            Some(Ok(summary)) => info!("Detector closed: {:?}", summary),
            Some(Err(e)) => warn!("Detector closed after error: {}", e),
            None => info!("Detector closed"),
        }
        Ok(())
    }
}
