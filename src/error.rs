use thiserror::Error;

#[derive(Error, Debug)]
pub enum DutwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Indicator error: {0}")]
    Indicator(#[from] IndicatorError),

    #[error("Switch error: {0}")]
    Switch(#[from] SwitchError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl DutwatchError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Errors that stop the owning component instead of being reported as a
    /// failed status.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DutwatchError::Detector(DetectorError::SourceUnavailable { .. })
                | DutwatchError::Detector(DetectorError::ConfigurationInvalid { .. })
        )
    }
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Video source unavailable: {source_name}: {details}")]
    SourceUnavailable {
        source_name: String,
        details: String,
    },

    #[error("Invalid detector configuration: {details}")]
    ConfigurationInvalid { details: String },

    #[error("Frame processing failed: {details}")]
    FrameProcessing { details: String },

    #[error("Detector is not configured")]
    NotConfigured,
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Failed to publish on {topic}: {details}")]
    PublishFailed { topic: String, details: String },

    #[error("Bus channel closed")]
    ChannelClosed,

    #[error("Subscriber lagged behind by {0} messages")]
    Lagged(u64),
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Unresolvable stage: {0}")]
    UnresolvableStage(String),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Malformed message on {topic}: {details}")]
    Malformed { topic: String, details: String },
}

#[derive(Error, Debug)]
pub enum IndicatorError {
    #[error("Failed to drive {channel}: {details}")]
    WriteFailed { channel: String, details: String },

    #[error("Failed to read {channel}: {details}")]
    ReadFailed { channel: String, details: String },

    #[error("Indicator hardware unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("Failed to open switch device {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Failed to read switch: {details}")]
    DeviceRead { details: String },
}

pub type Result<T> = std::result::Result<T, DutwatchError>;
