use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DutwatchConfig {
    pub dut: DutConfig,
    pub detector: DetectorConfig,
    pub orchestrator: OrchestratorConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DutConfig {
    /// Identifier used to namespace every bus channel (`tester.<id>.*`)
    #[serde(default = "default_dut_id")]
    pub id: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectorConfig {
    /// Seconds a candidate change must persist before it becomes an alarm
    #[serde(default = "default_frame_threshold_seconds")]
    pub frame_threshold_seconds: f64,

    /// Difference-mask binarization cutoff (0-255)
    #[serde(default = "default_binarization_threshold")]
    pub binarization_threshold: f64,

    /// Minimum contour area for a localized change
    #[serde(default = "default_min_contour_area")]
    pub min_contour_area: f64,

    /// Directory of images or a video file
    #[serde(default)]
    pub source: Option<PathBuf>,

    /// Frame rate assumed for image-sequence sources
    #[serde(default = "default_source_fps")]
    pub source_fps: f64,

    /// Seconds of video skipped right after the source is opened
    #[serde(default)]
    pub start_offset_seconds: f64,

    /// Sleep between frames so files replay in real time
    #[serde(default = "default_true")]
    pub pace_to_source_fps: bool,

    /// Skip the test-screen exit check and start in Idle
    #[serde(default)]
    pub start_in_test_screen: bool,

    /// Wait for the orchestrator's init/beginCapture/testScreen responses
    /// before configuring, opening and starting
    #[serde(default = "default_true")]
    pub await_handshake: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OrchestratorConfig {
    #[serde(default = "default_status_interval_seconds")]
    pub status_interval_seconds: u64,

    /// Granularity of the status broadcaster's deadline check
    #[serde(default = "default_status_tick_millis")]
    pub status_tick_millis: u64,

    #[serde(default = "default_housekeep_period_seconds")]
    pub housekeep_period_seconds: u64,

    #[serde(default = "default_switch_poll_millis")]
    pub switch_poll_millis: u64,

    /// Dead time after a detected press
    #[serde(default = "default_switch_holdoff_millis")]
    pub switch_holdoff_millis: u64,

    /// How long the servo holds each angle of the sweep
    #[serde(default = "default_servo_step_millis")]
    pub servo_step_millis: u64,

    #[serde(default = "default_servo_angles")]
    pub servo_angles: Vec<f64>,

    /// Input device of the physical reset switch (Linux evdev)
    #[serde(default)]
    pub switch_device: Option<String>,

    /// Key code reported by the switch device
    #[serde(default = "default_switch_key")]
    pub switch_key: u16,
}

impl OrchestratorConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_seconds)
    }

    pub fn status_tick(&self) -> Duration {
        Duration::from_millis(self.status_tick_millis)
    }

    pub fn housekeep_period(&self) -> Duration {
        Duration::from_secs(self.housekeep_period_seconds)
    }

    pub fn switch_poll(&self) -> Duration {
        Duration::from_millis(self.switch_poll_millis)
    }

    pub fn switch_holdoff(&self) -> Duration {
        Duration::from_millis(self.switch_holdoff_millis)
    }

    pub fn servo_step(&self) -> Duration {
        Duration::from_millis(self.servo_step_millis)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Capacity of the in-process bus
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl DutwatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("dutwatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("dut.id", default_dut_id())?
            .set_default(
                "detector.frame_threshold_seconds",
                default_frame_threshold_seconds(),
            )?
            .set_default(
                "detector.binarization_threshold",
                default_binarization_threshold(),
            )?
            .set_default("detector.min_contour_area", default_min_contour_area())?
            .set_default("detector.source_fps", default_source_fps())?
            .set_default("detector.start_offset_seconds", 0.0)?
            .set_default("detector.pace_to_source_fps", true)?
            .set_default("detector.start_in_test_screen", false)?
            .set_default("detector.await_handshake", true)?
            .set_default(
                "orchestrator.status_interval_seconds",
                default_status_interval_seconds() as i64,
            )?
            .set_default(
                "orchestrator.status_tick_millis",
                default_status_tick_millis() as i64,
            )?
            .set_default(
                "orchestrator.housekeep_period_seconds",
                default_housekeep_period_seconds() as i64,
            )?
            .set_default(
                "orchestrator.switch_poll_millis",
                default_switch_poll_millis() as i64,
            )?
            .set_default(
                "orchestrator.switch_holdoff_millis",
                default_switch_holdoff_millis() as i64,
            )?
            .set_default(
                "orchestrator.servo_step_millis",
                default_servo_step_millis() as i64,
            )?
            .set_default("orchestrator.servo_angles", default_servo_angles())?
            .set_default("orchestrator.switch_key", default_switch_key() as i64)?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // DUTWATCH_DETECTOR__BINARIZATION_THRESHOLD=50
            .add_source(
                Environment::with_prefix("DUTWATCH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: DutwatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dut.id.trim().is_empty() {
            return Err(ConfigError::Message("DUT id must not be empty".to_string()));
        }

        if !(self.detector.frame_threshold_seconds > 0.0) {
            return Err(ConfigError::Message(
                "Detector frame_threshold_seconds must be greater than 0".to_string(),
            ));
        }

        if !(self.detector.binarization_threshold > 0.0) {
            return Err(ConfigError::Message(
                "Detector binarization_threshold must be greater than 0".to_string(),
            ));
        }

        if self.detector.min_contour_area < 0.0 {
            return Err(ConfigError::Message(
                "Detector min_contour_area must not be negative".to_string(),
            ));
        }

        if !(self.detector.source_fps > 0.0) {
            return Err(ConfigError::Message(
                "Detector source_fps must be greater than 0".to_string(),
            ));
        }

        if self.detector.start_offset_seconds < 0.0 {
            return Err(ConfigError::Message(
                "Detector start_offset_seconds must not be negative".to_string(),
            ));
        }

        let orchestrator = &self.orchestrator;
        for (name, value) in [
            ("status_interval_seconds", orchestrator.status_interval_seconds),
            ("status_tick_millis", orchestrator.status_tick_millis),
            ("housekeep_period_seconds", orchestrator.housekeep_period_seconds),
            ("switch_poll_millis", orchestrator.switch_poll_millis),
        ] {
            if value == 0 {
                return Err(ConfigError::Message(format!(
                    "Orchestrator {} must be greater than 0",
                    name
                )));
            }
        }

        if orchestrator.servo_angles.is_empty() {
            return Err(ConfigError::Message(
                "Orchestrator servo_angles must not be empty".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DutwatchConfig {
    fn default() -> Self {
        Self {
            dut: DutConfig {
                id: default_dut_id(),
            },
            detector: DetectorConfig {
                frame_threshold_seconds: default_frame_threshold_seconds(),
                binarization_threshold: default_binarization_threshold(),
                min_contour_area: default_min_contour_area(),
                source: None,
                source_fps: default_source_fps(),
                start_offset_seconds: 0.0,
                pace_to_source_fps: true,
                start_in_test_screen: false,
                await_handshake: true,
            },
            orchestrator: OrchestratorConfig {
                status_interval_seconds: default_status_interval_seconds(),
                status_tick_millis: default_status_tick_millis(),
                housekeep_period_seconds: default_housekeep_period_seconds(),
                switch_poll_millis: default_switch_poll_millis(),
                switch_holdoff_millis: default_switch_holdoff_millis(),
                servo_step_millis: default_servo_step_millis(),
                servo_angles: default_servo_angles(),
                switch_device: None,
                switch_key: default_switch_key(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_dut_id() -> String {
    "vid1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_frame_threshold_seconds() -> f64 {
    5.0
}
fn default_binarization_threshold() -> f64 {
    150.0
}
fn default_min_contour_area() -> f64 {
    2000.0
}
fn default_source_fps() -> f64 {
    30.0
}

fn default_status_interval_seconds() -> u64 {
    300
}
fn default_status_tick_millis() -> u64 {
    1000
}
fn default_housekeep_period_seconds() -> u64 {
    150
}
fn default_switch_poll_millis() -> u64 {
    50
}
fn default_switch_holdoff_millis() -> u64 {
    500
}
fn default_servo_step_millis() -> u64 {
    2000
}
fn default_servo_angles() -> Vec<f64> {
    vec![0.0, 90.0, 0.0]
}
// BTN_0
fn default_switch_key() -> u16 {
    0x100
}

fn default_event_bus_capacity() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DutwatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dut.id, "vid1");
        assert_eq!(config.orchestrator.status_interval(), Duration::from_secs(300));
        assert_eq!(config.orchestrator.housekeep_period(), Duration::from_secs(150));
        assert_eq!(config.orchestrator.servo_angles, vec![0.0, 90.0, 0.0]);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DutwatchConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.detector.frame_threshold_seconds, 5.0);
        assert_eq!(config.detector.binarization_threshold, 150.0);
        assert!(config.detector.await_handshake);
        assert_eq!(config.system.event_bus_capacity, 1024);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[dut]
id = "vid7"

[detector]
frame_threshold_seconds = 30.0
binarization_threshold = 50.0
source = "/var/lib/dutwatch/frames"

[orchestrator]
status_interval_seconds = 60
servo_angles = [0.0, 45.0]
"#
        )
        .unwrap();

        let config = DutwatchConfig::load_from_file(&path).unwrap();
        assert_eq!(config.dut.id, "vid7");
        assert_eq!(config.detector.frame_threshold_seconds, 30.0);
        assert_eq!(config.detector.binarization_threshold, 50.0);
        assert_eq!(
            config.detector.source,
            Some(PathBuf::from("/var/lib/dutwatch/frames"))
        );
        assert_eq!(config.orchestrator.status_interval_seconds, 60);
        assert_eq!(config.orchestrator.servo_angles, vec![0.0, 45.0]);
        // Untouched keys keep their defaults
        assert_eq!(config.orchestrator.housekeep_period_seconds, 150);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = DutwatchConfig::default();

        config.detector.frame_threshold_seconds = 0.0;
        assert!(config.validate().is_err());
        config.detector.frame_threshold_seconds = 5.0;

        config.detector.binarization_threshold = -1.0;
        assert!(config.validate().is_err());
        config.detector.binarization_threshold = 150.0;

        config.orchestrator.switch_poll_millis = 0;
        assert!(config.validate().is_err());
        config.orchestrator.switch_poll_millis = 50;

        config.dut.id = " ".to_string();
        assert!(config.validate().is_err());
        config.dut.id = "vid1".to_string();

        assert!(config.validate().is_ok());
    }
}
