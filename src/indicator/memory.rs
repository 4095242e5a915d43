use super::{IndicatorChannel, IndicatorPort, Level};
use crate::error::IndicatorError;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
struct MirrorState {
    levels: HashMap<IndicatorChannel, Level>,
    stuck: HashMap<IndicatorChannel, Level>,
    servo_duty: Option<f64>,
    servo_history: Vec<f64>,
    servo_releases: u32,
    writes: Vec<(IndicatorChannel, Level)>,
    closed: bool,
}

/// In-memory indicator mirror used when no lamp hardware is attached.
///
/// Channels can be stuck at a fixed level to emulate a faulty output: writes
/// are accepted but the read-back keeps reporting the stuck level.
#[derive(Debug)]
pub struct MemoryIndicatorPort {
    state: Mutex<MirrorState>,
}

impl MemoryIndicatorPort {
    /// Create a mirror with every channel driven low
    pub fn new() -> Self {
        let levels = IndicatorChannel::ALL
            .iter()
            .map(|channel| (*channel, Level::Low))
            .collect();
        Self {
            state: Mutex::new(MirrorState {
                levels,
                ..MirrorState::default()
            }),
        }
    }

    /// Create a mirror with the given initial levels (others low)
    pub fn with_levels(initial: &[(IndicatorChannel, Level)]) -> Self {
        let port = Self::new();
        {
            let mut state = port.state.lock();
            for (channel, level) in initial {
                state.levels.insert(*channel, *level);
            }
        }
        port
    }

    /// Make a channel read back `level` regardless of what is written
    pub fn stick(&self, channel: IndicatorChannel, level: Level) {
        self.state.lock().stuck.insert(channel, level);
    }

    pub fn unstick(&self, channel: IndicatorChannel) {
        self.state.lock().stuck.remove(&channel);
    }

    /// Every lamp write seen so far, in order
    pub fn writes(&self) -> Vec<(IndicatorChannel, Level)> {
        self.state.lock().writes.clone()
    }

    /// Duty cycles the servo was driven to, in order
    pub fn servo_history(&self) -> Vec<f64> {
        self.state.lock().servo_history.clone()
    }

    pub fn servo_releases(&self) -> u32 {
        self.state.lock().servo_releases
    }

    pub fn servo_duty(&self) -> Option<f64> {
        self.state.lock().servo_duty
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for MemoryIndicatorPort {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorPort for MemoryIndicatorPort {
    fn set(&self, channel: IndicatorChannel, level: Level) -> Result<(), IndicatorError> {
        let mut state = self.state.lock();
        state.levels.insert(channel, level);
        state.writes.push((channel, level));
        debug!("Mirror {} set to {}", channel, level);
        Ok(())
    }

    fn get(&self, channel: IndicatorChannel) -> Result<Level, IndicatorError> {
        let state = self.state.lock();
        if let Some(level) = state.stuck.get(&channel) {
            return Ok(*level);
        }
        state
            .levels
            .get(&channel)
            .copied()
            .ok_or_else(|| IndicatorError::ReadFailed {
                channel: channel.to_string(),
                details: "channel not present in mirror".to_string(),
            })
    }

    fn drive_servo(&self, duty_cycle: f64) -> Result<(), IndicatorError> {
        let mut state = self.state.lock();
        state.servo_duty = Some(duty_cycle);
        state.servo_history.push(duty_cycle);
        debug!("Mirror servo duty cycle {:.2}%", duty_cycle);
        Ok(())
    }

    fn release_servo(&self) -> Result<(), IndicatorError> {
        let mut state = self.state.lock();
        state.servo_duty = None;
        state.servo_releases += 1;
        Ok(())
    }

    fn close(&self) {
        self.state.lock().closed = true;
        debug!("Mirror closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_round_trip() {
        let port = MemoryIndicatorPort::new();
        assert_eq!(port.get(IndicatorChannel::Red).unwrap(), Level::Low);

        port.set(IndicatorChannel::Red, Level::High).unwrap();
        assert_eq!(port.get(IndicatorChannel::Red).unwrap(), Level::High);
        assert_eq!(port.writes(), vec![(IndicatorChannel::Red, Level::High)]);
    }

    #[test]
    fn test_stuck_channel_ignores_writes() {
        let port = MemoryIndicatorPort::new();
        port.stick(IndicatorChannel::Amber, Level::High);

        port.set(IndicatorChannel::Amber, Level::Low).unwrap();
        assert_eq!(port.get(IndicatorChannel::Amber).unwrap(), Level::High);

        port.unstick(IndicatorChannel::Amber);
        assert_eq!(port.get(IndicatorChannel::Amber).unwrap(), Level::Low);
    }

    #[test]
    fn test_servo_tracking() {
        let port = MemoryIndicatorPort::new();
        port.drive_servo(92.75).unwrap();
        port.drive_servo(88.0).unwrap();
        port.release_servo().unwrap();

        assert_eq!(port.servo_history(), vec![92.75, 88.0]);
        assert_eq!(port.servo_duty(), None);
        assert_eq!(port.servo_releases(), 1);
    }
}
