use crate::error::MessageError;
use crate::indicator::{IndicatorChannel, Level};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Named phase of the DUT test sequence, as carried in the `stage` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "beginCapture")]
    BeginCapture,
    #[serde(rename = "testScreen")]
    TestScreen,
    #[serde(rename = "popUp")]
    PopUp,
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "alert")]
    Alert,
    #[serde(rename = "alert-reset", alias = "alert_reset")]
    AlertReset,
    /// Alert raised by the physical switch
    #[serde(rename = "alert-switch")]
    AlertBySwitch,
    /// Alert raised by a bus message
    #[serde(rename = "alert-msg")]
    AlertByMessage,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::BeginCapture => "beginCapture",
            Stage::TestScreen => "testScreen",
            Stage::PopUp => "popUp",
            Stage::Idle => "idle",
            Stage::Alert => "alert",
            Stage::AlertReset => "alert-reset",
            Stage::AlertBySwitch => "alert-switch",
            Stage::AlertByMessage => "alert-msg",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| MessageError::UnresolvableStage(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Outcome::Success
        } else {
            Outcome::Failed
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Activated,
    Deactivated,
}

/// Where an alert request came from. Never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOrigin {
    Switch,
    Message,
}

impl AlertOrigin {
    /// Stage tag used when answering an activation from this origin
    pub fn response_stage(&self) -> Stage {
        match self {
            AlertOrigin::Switch => Stage::AlertBySwitch,
            AlertOrigin::Message => Stage::AlertByMessage,
        }
    }
}

/// `{stage, status}` envelope shared by the result and response channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub status: Outcome,
}

impl StageEvent {
    pub fn new(stage: Stage, status: Outcome) -> Self {
        Self { stage, status }
    }

    pub fn success(stage: Stage) -> Self {
        Self::new(stage, Outcome::Success)
    }

    pub fn failed(stage: Stage) -> Self {
        Self::new(stage, Outcome::Failed)
    }

    /// Decode a stage envelope, failing fast on an unknown stage tag
    pub fn decode(topic: &str, payload: &str) -> Result<Self, MessageError> {
        let raw = RawEnvelope::parse(topic, payload)?;
        let stage = raw.stage()?;
        let status = match raw.status.as_deref() {
            Some("success") => Outcome::Success,
            Some("failed") => Outcome::Failed,
            Some(other) => return Err(MessageError::UnknownStatus(other.to_string())),
            // Missing status is treated as a failure, never as success
            None => Outcome::Failed,
        };
        Ok(Self { stage, status })
    }
}

/// Alert request delivered on the alert channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub stage: Stage,
    pub status: AlertStatus,
    #[serde(skip, default = "default_alert_origin")]
    pub origin: AlertOrigin,
}

fn default_alert_origin() -> AlertOrigin {
    AlertOrigin::Message
}

impl AlertEvent {
    pub fn activated(origin: AlertOrigin) -> Self {
        Self {
            stage: Stage::Alert,
            status: AlertStatus::Activated,
            origin,
        }
    }

    pub fn deactivated(origin: AlertOrigin) -> Self {
        Self {
            stage: Stage::AlertReset,
            status: AlertStatus::Deactivated,
            origin,
        }
    }

    /// Decode an alert request received from the bus. Bus alerts are always
    /// message-originated.
    pub fn decode(topic: &str, payload: &str) -> Result<Self, MessageError> {
        let raw = RawEnvelope::parse(topic, payload)?;
        let stage = raw.stage()?;
        let status = match raw.status.as_deref() {
            Some("activated") => AlertStatus::Activated,
            Some("deactivated") => AlertStatus::Deactivated,
            Some(other) => return Err(MessageError::UnknownStatus(other.to_string())),
            None => return Err(MessageError::UnknownStatus(String::new())),
        };
        Ok(Self {
            stage,
            status,
            origin: AlertOrigin::Message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    stage: Option<String>,
    status: Option<String>,
}

impl RawEnvelope {
    fn parse(topic: &str, payload: &str) -> Result<Self, MessageError> {
        serde_json::from_str(payload).map_err(|e| MessageError::Malformed {
            topic: topic.to_string(),
            details: e.to_string(),
        })
    }

    fn stage(&self) -> Result<Stage, MessageError> {
        match self.stage.as_deref() {
            Some(stage) => stage.parse(),
            None => Err(MessageError::UnresolvableStage("<missing>".to_string())),
        }
    }
}

/// Lamp state as reported outside the station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lamp {
    On,
    Off,
}

impl From<Level> for Lamp {
    fn from(level: Level) -> Self {
        match level {
            Level::High => Lamp::On,
            Level::Low => Lamp::Off,
        }
    }
}

/// Full indicator state published on the status channel.
///
/// `on`/`off` is the raw drive level (`high`/`low`), not whether the lamp is
/// lit: the active-low power lamp reads `off` while it is lit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorSnapshot {
    pub lamps: BTreeMap<IndicatorChannel, Lamp>,
}

impl IndicatorSnapshot {
    pub fn insert(&mut self, channel: IndicatorChannel, level: Level) {
        self.lamps.insert(channel, level.into());
    }

    pub fn get(&self, channel: IndicatorChannel) -> Option<Lamp> {
        self.lamps.get(&channel).copied()
    }
}
