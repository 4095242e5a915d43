pub mod app;
pub mod bus;
pub mod component;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod forwarder;
pub mod frame;
pub mod indicator;
pub mod orchestrator;
pub mod source;

pub use app::{ComponentState, ShutdownReason, StationParts, TesterApp};
pub use bus::{Bus, BusMessage, Channels, Subscription, TopicFilter};
pub use component::Component;
pub use config::DutwatchConfig;
pub use detector::{DetectionPhase, DetectionState, DetectorComponent};
pub use error::{DutwatchError, Result};
pub use events::{AlertEvent, AlertOrigin, AlertStatus, IndicatorSnapshot, Lamp, Outcome, Stage, StageEvent};
pub use forwarder::{BusRelay, Downstream, Forwarder, LogDownstream};
pub use frame::{FrameData, FrameFormat};
pub use indicator::{IndicatorChannel, IndicatorPort, Level, MemoryIndicatorPort, MemorySwitch, SwitchInput};
pub use orchestrator::StageOrchestrator;
pub use source::{FrameSource, SourceInfo};
