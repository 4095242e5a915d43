use crate::events::{AlertOrigin, IndicatorSnapshot, Outcome};
use crate::indicator::{IndicatorChannel, IndicatorPort, Level};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Alert latch owned by the orchestrator. Armed by a verified stage write or
/// a verified alert activation, cleared only by a verified reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertLatch {
    active: bool,
}

impl AlertLatch {
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// One channel whose read-back disagreed with the requested level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub channel: IndicatorChannel,
    pub requested: Level,
    /// `None` when the channel could not be written or read at all
    pub observed: Option<Level>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupWriteReport {
    pub outcome: Outcome,
    pub mismatches: Vec<Mismatch>,
}

/// Result of an alert activation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub outcome: Outcome,
    /// No alert was outstanding, so the servo should sweep
    pub sweep: bool,
}

/// What a switch press turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAction {
    Reset(Outcome),
    Activate(Activation),
}

#[derive(Debug, Default)]
struct ActuationState {
    latch: AlertLatch,
    /// An activation happened and no verified reset followed yet
    alert_outstanding: bool,
}

/// Single mutual-exclusion domain for indicator actuation.
///
/// Every operation holds the lock across write, read-back, outcome decision
/// and latch update, so message dispatch and switch polling never observe
/// each other's partial writes.
pub struct ActuationDomain {
    port: Arc<dyn IndicatorPort>,
    state: Mutex<ActuationState>,
}

impl ActuationDomain {
    pub fn new(port: Arc<dyn IndicatorPort>) -> Self {
        Self {
            port,
            state: Mutex::new(ActuationState::default()),
        }
    }

    pub async fn latch(&self) -> AlertLatch {
        self.state.lock().await.latch
    }

    pub async fn alert_outstanding(&self) -> bool {
        self.state.lock().await.alert_outstanding
    }

    /// Drive the power lamp on. The lamp is wired active-low.
    pub async fn init_power(&self) -> Outcome {
        let _guard = self.state.lock().await;
        let report = verified_group_write(self.port.as_ref(), &[(IndicatorChannel::Power, Level::Low)]);
        report.outcome
    }

    /// Apply a stage's lamp map and arm the latch when every channel verified
    pub async fn stage_write(&self, levels: &[(IndicatorChannel, Level)]) -> GroupWriteReport {
        let mut state = self.state.lock().await;
        let report = verified_group_write(self.port.as_ref(), levels);
        arm_latch_after_stage(&mut state, &report);
        report
    }

    pub async fn activate_alert(&self, origin: AlertOrigin) -> Activation {
        let mut state = self.state.lock().await;
        self.activate_locked(&mut state, origin)
    }

    /// Turn amber off. Rejected without touching amber when the latch is not
    /// armed.
    pub async fn reset_alert(&self) -> Outcome {
        let mut state = self.state.lock().await;
        self.reset_locked(&mut state)
    }

    /// The switch is one button whose effect depends on the latch: reset when
    /// armed, activate otherwise. Decided and applied under one lock.
    pub async fn press_switch(&self) -> SwitchAction {
        let mut state = self.state.lock().await;
        if state.latch.active {
            SwitchAction::Reset(self.reset_locked(&mut state))
        } else {
            SwitchAction::Activate(self.activate_locked(&mut state, AlertOrigin::Switch))
        }
    }

    /// Read every lamp. Channels that cannot be read are left out.
    pub async fn snapshot(&self) -> IndicatorSnapshot {
        let _guard = self.state.lock().await;
        let mut snapshot = IndicatorSnapshot::default();
        for channel in IndicatorChannel::ALL {
            match self.port.get(channel) {
                Ok(level) => snapshot.insert(channel, level),
                Err(e) => warn!("Snapshot could not read {}: {}", channel, e),
            }
        }
        snapshot
    }

    fn activate_locked(&self, state: &mut ActuationState, origin: AlertOrigin) -> Activation {
        let report = verified_group_write(self.port.as_ref(), &[(IndicatorChannel::Amber, Level::High)]);
        let sweep = !state.alert_outstanding;
        state.alert_outstanding = true;
        if report.outcome.is_success() {
            state.latch.active = true;
        }
        debug!(
            "Alert activation by {:?}: {}, sweep: {}",
            origin, report.outcome, sweep
        );
        Activation {
            outcome: report.outcome,
            sweep,
        }
    }

    fn reset_locked(&self, state: &mut ActuationState) -> Outcome {
        if !state.latch.active {
            warn!("Alert reset rejected: latch is not armed");
            return Outcome::Failed;
        }
        let report = verified_group_write(self.port.as_ref(), &[(IndicatorChannel::Amber, Level::Low)]);
        if report.outcome.is_success() {
            state.latch.active = false;
            state.alert_outstanding = false;
        }
        report.outcome
    }
}

/// Couples "stage lamps verified" to "alert armed".
fn arm_latch_after_stage(state: &mut ActuationState, report: &GroupWriteReport) {
    if report.outcome.is_success() {
        state.latch.active = true;
    }
}

/// Write each channel and read it back. Success only if every channel reads
/// back its requested level; hardware errors count as mismatches.
pub fn verified_group_write(
    port: &dyn IndicatorPort,
    levels: &[(IndicatorChannel, Level)],
) -> GroupWriteReport {
    let mut mismatches = Vec::new();

    for &(channel, requested) in levels {
        let observed = match port.set(channel, requested) {
            Ok(()) => match port.get(channel) {
                Ok(level) => Some(level),
                Err(e) => {
                    warn!("Read-back of {} failed: {}", channel, e);
                    None
                }
            },
            Err(e) => {
                warn!("Write of {} failed: {}", channel, e);
                None
            }
        };

        let verified = observed == Some(requested);
        debug!("LED {} set to {}: {}", channel, requested, verified);
        if !verified {
            mismatches.push(Mismatch {
                channel,
                requested,
                observed,
            });
        }
    }

    if !mismatches.is_empty() {
        warn!("Verification mismatch: {:?}", mismatches);
    }

    GroupWriteReport {
        outcome: Outcome::from_bool(mismatches.is_empty()),
        mismatches,
    }
}
