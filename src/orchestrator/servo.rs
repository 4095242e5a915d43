use crate::indicator::{servo_duty_cycle, IndicatorPort};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs the alert flag sweep detached from the caller, one sweep at a time
pub struct ServoSweeper {
    port: Arc<dyn IndicatorPort>,
    angles: Vec<f64>,
    step: Duration,
    in_flight: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ServoSweeper {
    pub fn new(port: Arc<dyn IndicatorPort>, angles: Vec<f64>, step: Duration) -> Self {
        Self {
            port,
            angles,
            step,
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Start a sweep unless one is already running. Returns whether a sweep
    /// was started.
    pub fn trigger(&self) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Servo sweep already in flight");
            return false;
        }

        let port = Arc::clone(&self.port);
        let angles = self.angles.clone();
        let step = self.step;
        let in_flight = Arc::clone(&self.in_flight);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            info!("Servo sweep through {:?}", angles);
            for angle in angles {
                if let Err(e) = port.drive_servo(servo_duty_cycle(angle)) {
                    warn!("Servo drive to {} degrees failed: {}", angle, e);
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(step) => {}
                }
            }
            if let Err(e) = port.release_servo() {
                warn!("Servo release failed: {}", e);
            }
            in_flight.store(false, Ordering::SeqCst);
            debug!("Servo sweep finished");
        });

        *self.task.lock() = Some(handle);
        true
    }

    /// Cut a running sweep short and wait for the servo to be released
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(handle) = task {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::MemoryIndicatorPort;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_visits_each_angle_then_releases() {
        let port = Arc::new(MemoryIndicatorPort::new());
        let sweeper = ServoSweeper::new(port.clone(), vec![0.0, 90.0, 0.0], Duration::from_secs(2));

        assert!(sweeper.trigger());
        assert!(!sweeper.trigger());

        tokio::time::sleep(Duration::from_millis(6100)).await;
        assert!(!sweeper.is_sweeping());
        assert_eq!(
            port.servo_history(),
            vec![servo_duty_cycle(0.0), servo_duty_cycle(90.0), servo_duty_cycle(0.0)]
        );
        assert_eq!(port.servo_releases(), 1);

        // Free again once finished
        assert!(sweeper.trigger());
        sweeper.shutdown().await;
        assert_eq!(port.servo_releases(), 2);
    }
}
