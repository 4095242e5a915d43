use super::types::{ComponentState, ShutdownReason};
use crate::bus::{Bus, Channels};
use crate::component::Component;
use crate::config::DutwatchConfig;
use crate::detector::DetectorComponent;
use crate::error::Result;
use crate::forwarder::{Downstream, Forwarder, LogDownstream};
use crate::indicator::{IndicatorPort, MemoryIndicatorPort, SwitchInput};
use crate::orchestrator::StageOrchestrator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

/// Hardware and uplink the station is wired to
pub struct StationParts {
    pub port: Arc<dyn IndicatorPort>,
    pub switch: Option<Arc<dyn SwitchInput>>,
    pub downstream: Arc<dyn Downstream>,
}

impl StationParts {
    /// Lamps mirrored in memory, relay written to the log, plus the evdev
    /// switch when one is configured and supported
    pub fn from_config(config: &DutwatchConfig) -> Self {
        Self {
            port: Arc::new(MemoryIndicatorPort::new()),
            switch: open_switch(config),
            downstream: Arc::new(LogDownstream),
        }
    }
}

#[cfg(all(feature = "switch_evdev", target_os = "linux"))]
fn open_switch(config: &DutwatchConfig) -> Option<Arc<dyn SwitchInput>> {
    let device = config.orchestrator.switch_device.as_deref()?;
    match crate::indicator::EvdevSwitch::open(device, config.orchestrator.switch_key) {
        Ok(switch) => Some(Arc::new(switch)),
        Err(e) => {
            warn!("Alert switch unavailable, continuing without it: {}", e);
            None
        }
    }
}

#[cfg(not(all(feature = "switch_evdev", target_os = "linux")))]
fn open_switch(config: &DutwatchConfig) -> Option<Arc<dyn SwitchInput>> {
    if let Some(device) = &config.orchestrator.switch_device {
        warn!(
            "Switch device {} configured but evdev support is not compiled in",
            device
        );
    }
    None
}

/// Main application coordinator for one DUT station.
///
/// Components are registered in start order: forwarder, detector, stage
/// orchestrator. Shutdown walks the list backwards.
pub struct TesterApp {
    pub(super) config: DutwatchConfig,
    pub(super) bus: Bus,
    pub(super) channels: Channels,

    // Components
    pub(super) detector: Arc<DetectorComponent>,
    pub(super) orchestrator: Arc<StageOrchestrator>,
    pub(super) components: Vec<Arc<dyn Component>>,
    pub(super) port: Arc<dyn IndicatorPort>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
}

impl TesterApp {
    /// Create the station with the parts described by the configuration
    pub fn new(config: DutwatchConfig) -> Result<Self> {
        let parts = StationParts::from_config(&config);
        Self::with_parts(config, parts)
    }

    /// Create the station around explicitly supplied hardware
    pub fn with_parts(config: DutwatchConfig, parts: StationParts) -> Result<Self> {
        config.validate()?;

        let bus = Bus::new(config.system.event_bus_capacity);
        let channels = Channels::for_dut(&config.dut.id);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        let forwarder = Arc::new(Forwarder::new(
            bus.clone(),
            channels.clone(),
            parts.downstream,
        ));

        let detector = Arc::new(DetectorComponent::from_config(
            config.detector.clone(),
            bus.clone(),
            channels.clone(),
        ));

        let port = Arc::clone(&parts.port);
        let orchestrator = Arc::new(StageOrchestrator::new(
            config.orchestrator.clone(),
            bus.clone(),
            channels.clone(),
            parts.port,
            parts.switch,
        ));
        orchestrator.attach(forwarder.clone());
        orchestrator.attach(detector.clone());

        let components: Vec<Arc<dyn Component>> =
            vec![forwarder, detector.clone(), orchestrator.clone()];

        info!("Station wired for {}", channels.dut_id);

        Ok(Self {
            config,
            bus,
            channels,
            detector,
            orchestrator,
            components,
            port,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
        })
    }

    pub fn config(&self) -> &DutwatchConfig {
        &self.config
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub fn detector(&self) -> &Arc<DetectorComponent> {
        &self.detector
    }

    pub fn stage_orchestrator(&self) -> &Arc<StageOrchestrator> {
        &self.orchestrator
    }

    /// Component names in start order
    pub fn component_names(&self) -> Vec<String> {
        self.components
            .iter()
            .map(|component| component.name().to_string())
            .collect()
    }
}
