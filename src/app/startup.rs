use super::{ComponentState, TesterApp};
use crate::error::Result;
use tracing::{error, info};

impl TesterApp {
    /// Register every component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing station components");

        let mut states = self.component_states.lock().await;
        for component in &self.components {
            states.insert(component.name().to_string(), ComponentState::Stopped);
        }
        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start all components in registration order
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting station for {}", self.channels.dut_id);

        for component in self.components.clone() {
            let name = component.name().to_string();
            self.set_component_state(&name, ComponentState::Starting)
                .await;

            if let Err(e) = component.start().await {
                error!("Failed to start {}: {}", name, e);
                self.set_component_state(&name, ComponentState::Failed)
                    .await;
                return Err(e);
            }

            self.set_component_state(&name, ComponentState::Running)
                .await;
            info!("{} started successfully", name);
        }

        if self.detector.is_halted() {
            // The station keeps serving alert traffic without a detector
            self.set_component_state("detector", ComponentState::Failed)
                .await;
            error!("Detector halted during start, continuing with orchestrator only");
        }

        info!("Station started successfully");
        Ok(())
    }
}
