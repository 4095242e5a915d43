mod memory;
mod switch;

pub use memory::MemoryIndicatorPort;
#[cfg(all(feature = "switch_evdev", target_os = "linux"))]
pub use switch::EvdevSwitch;
pub use switch::{MemorySwitch, SwitchInput};

use crate::error::IndicatorError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named lamp outputs wired to the station
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorChannel {
    Power,
    Red,
    Green,
    Amber,
}

impl IndicatorChannel {
    pub const ALL: [IndicatorChannel; 4] = [
        IndicatorChannel::Power,
        IndicatorChannel::Red,
        IndicatorChannel::Green,
        IndicatorChannel::Amber,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorChannel::Power => "power",
            IndicatorChannel::Red => "red",
            IndicatorChannel::Green => "green",
            IndicatorChannel::Amber => "amber",
        }
    }
}

impl fmt::Display for IndicatorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drive level at the actuator boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::High => "high",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output capability driving the station lamps and the alert servo.
///
/// Implementations must report the level actually present on the output from
/// `get`, not the last requested one; callers rely on the read-back to verify
/// every write.
pub trait IndicatorPort: Send + Sync {
    /// Drive a lamp channel to the given level
    fn set(&self, channel: IndicatorChannel, level: Level) -> Result<(), IndicatorError>;

    /// Read the level currently present on a lamp channel
    fn get(&self, channel: IndicatorChannel) -> Result<Level, IndicatorError>;

    /// Start or update the servo PWM output at the given duty cycle (percent)
    fn drive_servo(&self, duty_cycle: f64) -> Result<(), IndicatorError>;

    /// Stop the servo PWM output
    fn release_servo(&self) -> Result<(), IndicatorError>;

    /// Release hardware handles
    fn close(&self) {}
}

/// PWM frequency the servo expects
pub const SERVO_PWM_HZ: f64 = 50.0;

/// Convert a servo angle (degrees, -90..=90) into the inverted PWM duty cycle
/// used by the alert flag servo.
pub fn servo_duty_cycle(angle: f64) -> f64 {
    let angle = angle.clamp(-90.0, 90.0);
    100.0 - (2.5 + (12.0 - 2.5) / 180.0 * (angle + 90.0))
}
