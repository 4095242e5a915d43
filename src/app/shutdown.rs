use super::{ComponentState, TesterApp};
use crate::component::Component;
use crate::error::{DutwatchError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl TesterApp {
    /// Close every component in reverse start order
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        let mut exit_code = 0;
        for component in self.components.clone().into_iter().rev() {
            if let Err(e) = self.stop_component(component).await {
                error!("{}", e);
                exit_code = 1;
            }
        }

        // Only once every component has closed
        self.port.close();
        info!("Indicator port released");

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_component(&self, component: Arc<dyn Component>) -> Result<()> {
        let name = component.name().to_string();
        info!("Stopping {} component", name);
        self.set_component_state(&name, ComponentState::Stopping)
            .await;

        match timeout(STOP_TIMEOUT, component.close()).await {
            Ok(Ok(())) => {
                self.set_component_state(&name, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", name);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(&name, ComponentState::Failed)
                    .await;
                Err(DutwatchError::component(
                    name,
                    format!("error while stopping: {}", e),
                ))
            }
            Err(_) => {
                self.set_component_state(&name, ComponentState::Failed)
                    .await;
                Err(DutwatchError::system(format!("{} component stop timeout", name)))
            }
        }
    }
}
