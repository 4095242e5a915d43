use super::{ShutdownReason, TesterApp};
use crate::error::{DutwatchError, Result};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

impl TesterApp {
    /// Run until a shutdown signal arrives, then shut down gracefully
    pub async fn run(&mut self) -> Result<i32> {
        info!("Station is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| DutwatchError::system("Shutdown sender already taken"))?;

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| DutwatchError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers(shutdown_sender);

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| DutwatchError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("Station shutdown complete");
        Ok(exit_code)
    }

    /// Take the sender so the caller can trigger shutdown itself
    pub fn take_shutdown_sender(&mut self) -> Option<oneshot::Sender<ShutdownReason>> {
        self.shutdown_sender.take()
    }

    /// Wait for an externally triggered shutdown, then shut down
    pub async fn run_until_requested(&mut self) -> Result<i32> {
        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| DutwatchError::system("Shutdown receiver already taken"))?;

        let reason = shutdown_receiver.await.unwrap_or(ShutdownReason::UserRequest);
        info!("Shutdown initiated: {:?}", reason);
        self.shutdown().await
    }

    fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::spawn(async move {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                                let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                            }
                        }
                    });
                }
                Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
            }
        }

        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender_sigint.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
