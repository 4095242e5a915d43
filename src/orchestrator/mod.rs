mod actuation;
mod handler;
mod servo;
mod tasks;
#[cfg(test)]
mod tests;

pub use actuation::{
    verified_group_write, Activation, ActuationDomain, AlertLatch, GroupWriteReport, Mismatch,
    SwitchAction,
};
pub use handler::{stage_lamps, OrchestratorCore};
pub use servo::ServoSweeper;

use crate::bus::{Bus, Channels, TopicFilter};
use crate::component::Component;
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::indicator::{IndicatorPort, SwitchInput};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives the station lamps, alert latch and servo from bus events.
///
/// Runs four activities once started: bus dispatch, switch polling (when a
/// switch is attached), the periodic status broadcast and housekeeping of
/// attached collaborators.
pub struct StageOrchestrator {
    settings: OrchestratorConfig,
    bus: Bus,
    core: Arc<OrchestratorCore>,
    switch: Option<Arc<dyn SwitchInput>>,
    collaborators: parking_lot::Mutex<Vec<Arc<dyn Component>>>,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl StageOrchestrator {
    pub fn new(
        settings: OrchestratorConfig,
        bus: Bus,
        channels: Channels,
        port: Arc<dyn IndicatorPort>,
        switch: Option<Arc<dyn SwitchInput>>,
    ) -> Self {
        let servo = ServoSweeper::new(
            Arc::clone(&port),
            settings.servo_angles.clone(),
            settings.servo_step(),
        );
        let core = OrchestratorCore::new(bus.clone(), channels, ActuationDomain::new(port), servo);
        Self {
            settings,
            bus,
            core: Arc::new(core),
            switch,
            collaborators: parking_lot::Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Register a component whose liveness hook runs on every housekeeping tick
    pub fn attach(&self, collaborator: Arc<dyn Component>) {
        self.collaborators.lock().push(collaborator);
    }

    pub fn core(&self) -> &Arc<OrchestratorCore> {
        &self.core
    }

    pub async fn latch_active(&self) -> bool {
        self.core.actuation().latch().await.is_active()
    }
}

#[async_trait]
impl Component for StageOrchestrator {
    fn name(&self) -> &str {
        "orchestrator"
    }

    async fn start(&self) -> Result<()> {
        let channels = self.core.channels();
        let subscription = self.bus.subscribe(
            TopicFilter::topics([channels.result.clone(), channels.alert.clone()]),
            "orchestrator",
        );

        let mut handles = Vec::new();
        handles.push(tokio::spawn(tasks::run_dispatch(
            Arc::clone(&self.core),
            subscription,
            self.cancel.clone(),
        )));

        self.core.init_power().await;

        match &self.switch {
            Some(switch) => handles.push(tokio::spawn(tasks::run_switch_poller(
                Arc::clone(&self.core),
                Arc::clone(switch),
                self.settings.switch_poll(),
                self.settings.switch_holdoff(),
                self.cancel.clone(),
            ))),
            None => info!("No alert switch attached"),
        }

        handles.push(tokio::spawn(tasks::run_status_broadcaster(
            Arc::clone(&self.core),
            self.settings.status_interval(),
            self.settings.status_tick(),
            self.cancel.clone(),
        )));

        let collaborators = self.collaborators.lock().clone();
        handles.push(tokio::spawn(tasks::run_housekeeping(
            collaborators,
            self.settings.housekeep_period(),
            self.cancel.clone(),
        )));

        self.tasks.lock().extend(handles);
        info!("Stage orchestrator started for {}", channels.dut_id);
        Ok(())
    }

    async fn housekeep(&self) -> Result<()> {
        debug!(
            "Orchestrator heartbeat: latch={}, sweeping={}",
            self.latch_active().await,
            self.core.servo().is_sweeping()
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Orchestrator task ended abnormally: {}", e);
            }
        }
        self.core.servo().shutdown().await;
        info!("Stage orchestrator closed");
        Ok(())
    }
}
