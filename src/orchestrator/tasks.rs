use super::handler::OrchestratorCore;
use crate::bus::Subscription;
use crate::component::Component;
use crate::error::BusError;
use crate::indicator::SwitchInput;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deliver result and alert messages to the core one at a time
pub async fn run_dispatch(core: Arc<OrchestratorCore>, mut subscription: Subscription, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = subscription.recv() => match received {
                Ok(message) => core.dispatch(&message).await,
                Err(BusError::Lagged(n)) => warn!("Orchestrator dropped {} messages", n),
                Err(_) => break,
            }
        }
    }
    debug!("Orchestrator dispatch stopped");
}

/// Sample the switch on a fixed tick and act on rising edges
pub async fn run_switch_poller(
    core: Arc<OrchestratorCore>,
    switch: Arc<dyn SwitchInput>,
    poll: Duration,
    holdoff: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut was_pressed = false;
    let mut read_failing = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let pressed = match switch.is_pressed() {
            Ok(pressed) => {
                read_failing = false;
                pressed
            }
            Err(e) => {
                if !read_failing {
                    warn!("Switch read failed: {}", e);
                    read_failing = true;
                }
                continue;
            }
        };

        if pressed && !was_pressed {
            core.handle_switch_press().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(holdoff) => {}
            }
            ticker.reset();
        }
        was_pressed = pressed;
    }
    debug!("Switch poller stopped");
}

/// Publish the lamp snapshot at start and then once per `period`, checking
/// the deadline every `tick`
pub async fn run_status_broadcaster(
    core: Arc<OrchestratorCore>,
    period: Duration,
    tick: Duration,
    cancel: CancellationToken,
) {
    info!("Status update every {:?}", period);
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_update = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        if now >= next_update {
            core.publish_status().await;
            next_update = now + period;
            debug!("Next status update in {:?}", period);
        }
    }
    debug!("Status broadcaster stopped");
}

/// Invoke every collaborator's liveness hook once per `period`
pub async fn run_housekeeping(
    collaborators: Vec<Arc<dyn Component>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for collaborator in &collaborators {
            if let Err(e) = collaborator.housekeep().await {
                warn!("Housekeeping of {} failed: {}", collaborator.name(), e);
            }
        }
        debug!("Housekeeping ran for {} components", collaborators.len());
    }
    debug!("Housekeeping stopped");
}
