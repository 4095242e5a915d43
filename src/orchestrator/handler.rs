use super::actuation::{Activation, ActuationDomain, SwitchAction};
use super::servo::ServoSweeper;
use crate::bus::{Bus, BusMessage, Channels};
use crate::events::{AlertEvent, AlertOrigin, AlertStatus, Outcome, Stage, StageEvent};
use crate::indicator::{IndicatorChannel, Level};
use serde::Serialize;
use tracing::{debug, info, warn};

const BEGIN_CAPTURE_LAMPS: [(IndicatorChannel, Level); 3] = [
    (IndicatorChannel::Red, Level::Low),
    (IndicatorChannel::Amber, Level::Low),
    (IndicatorChannel::Green, Level::Low),
];

const TEST_SCREEN_LAMPS: [(IndicatorChannel, Level); 3] = [
    (IndicatorChannel::Red, Level::High),
    (IndicatorChannel::Amber, Level::Low),
    (IndicatorChannel::Green, Level::Low),
];

const POP_UP_LAMPS: [(IndicatorChannel, Level); 3] = [
    (IndicatorChannel::Red, Level::High),
    (IndicatorChannel::Amber, Level::Low),
    (IndicatorChannel::Green, Level::High),
];

const IDLE_LAMPS: [(IndicatorChannel, Level); 3] = BEGIN_CAPTURE_LAMPS;

/// Lamp map applied when the detector reports a stage as successful
pub fn stage_lamps(stage: Stage) -> Option<&'static [(IndicatorChannel, Level)]> {
    match stage {
        Stage::BeginCapture => Some(&BEGIN_CAPTURE_LAMPS),
        Stage::TestScreen => Some(&TEST_SCREEN_LAMPS),
        Stage::PopUp => Some(&POP_UP_LAMPS),
        Stage::Idle => Some(&IDLE_LAMPS),
        _ => None,
    }
}

/// Event handling shared by the dispatch task and the switch poller
pub struct OrchestratorCore {
    bus: Bus,
    channels: Channels,
    actuation: ActuationDomain,
    servo: ServoSweeper,
}

impl OrchestratorCore {
    pub fn new(bus: Bus, channels: Channels, actuation: ActuationDomain, servo: ServoSweeper) -> Self {
        Self {
            bus,
            channels,
            actuation,
            servo,
        }
    }

    pub fn actuation(&self) -> &ActuationDomain {
        &self.actuation
    }

    pub fn servo(&self) -> &ServoSweeper {
        &self.servo
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    fn publish<T: Serialize>(&self, topic: &str, message: &T) {
        if let Err(e) = self.bus.publish(topic, message) {
            warn!("Failed to publish on {}: {}", topic, e);
        }
    }

    fn respond(&self, stage: Stage, status: Outcome) {
        debug!("[{}] response: {}", stage, status);
        self.publish(&self.channels.response, &StageEvent::new(stage, status));
    }

    fn respond_alert(&self, stage: Stage, status: Outcome) {
        debug!("[{}] alert response: {}", stage, status);
        self.publish(&self.channels.alert_response, &StageEvent::new(stage, status));
    }

    /// Publish the full lamp state on the status channel
    pub async fn publish_status(&self) {
        let snapshot = self.actuation.snapshot().await;
        debug!("Status message: {:?}", snapshot);
        self.publish(&self.channels.status, &snapshot);
    }

    /// Turn the power lamp on and report the `init` stage
    pub async fn init_power(&self) -> Outcome {
        let outcome = self.actuation.init_power().await;
        info!("Init power {}", outcome);
        self.respond(Stage::Init, outcome);
        self.publish_status().await;
        outcome
    }

    /// Route one message from the result or alert channel
    pub async fn dispatch(&self, message: &BusMessage) {
        if *message.topic == *self.channels.result {
            match StageEvent::decode(&message.topic, &message.payload) {
                Ok(event) => self.handle_result(event).await,
                Err(e) => warn!("Dropping result message: {}", e),
            }
        } else if *message.topic == *self.channels.alert {
            match AlertEvent::decode(&message.topic, &message.payload) {
                Ok(event) => self.handle_alert(event).await,
                Err(e) => warn!("Dropping alert message: {}", e),
            }
        } else {
            debug!("Ignoring message on {}", message.topic);
        }
    }

    pub async fn handle_result(&self, event: StageEvent) {
        let Some(lamps) = stage_lamps(event.stage) else {
            debug!("No lamp map for {} result", event.stage);
            return;
        };
        if event.status != Outcome::Success {
            debug!("Ignoring unsuccessful {} result", event.stage);
            return;
        }

        let report = self.actuation.stage_write(lamps).await;
        self.respond(event.stage, report.outcome);
        self.publish_status().await;
    }

    pub async fn handle_alert(&self, event: AlertEvent) {
        match event.status {
            AlertStatus::Activated => {
                let activation = self.actuation.activate_alert(event.origin).await;
                self.finish_activation(event.origin, activation).await;
            }
            AlertStatus::Deactivated => {
                let outcome = self.actuation.reset_alert().await;
                self.finish_reset(outcome).await;
            }
        }
    }

    /// A rising edge on the physical switch
    pub async fn handle_switch_press(&self) {
        match self.actuation.press_switch().await {
            SwitchAction::Reset(outcome) => {
                info!("Switch pressed to reset alert");
                self.finish_reset(outcome).await;
            }
            SwitchAction::Activate(activation) => {
                info!("Switch pressed to enable alert");
                self.finish_activation(AlertOrigin::Switch, activation).await;
            }
        }
    }

    async fn finish_activation(&self, origin: AlertOrigin, activation: Activation) {
        // Detached so the response is not held up by the physical motion
        if activation.sweep {
            self.servo.trigger();
        }
        self.respond_alert(origin.response_stage(), activation.outcome);
        self.publish_status().await;
    }

    async fn finish_reset(&self, outcome: Outcome) {
        self.respond_alert(Stage::AlertReset, outcome);
        self.publish_status().await;
    }
}
