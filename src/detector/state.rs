use serde::{Deserialize, Serialize};

/// Coarse screen state tracked by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionPhase {
    /// DUT is showing something other than the test screen
    NotInTestScreen,
    Idle,
    Alarm,
}

/// Pixel-count thresholds derived from the frame area
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub significant_change: f64,
    pub full_screen_change: f64,
    pub minor_change: f64,
    pub mouse_change: f64,
}

impl Thresholds {
    pub const SIGNIFICANT_FRACTION: f64 = 0.001;
    pub const FULL_SCREEN_FRACTION: f64 = 0.5;
    pub const MINOR_FRACTION: f64 = 0.0001;
    pub const MOUSE_FRACTION: f64 = 0.0005;

    pub fn for_area(area: f64) -> Self {
        Self {
            significant_change: area * Self::SIGNIFICANT_FRACTION,
            full_screen_change: area * Self::FULL_SCREEN_FRACTION,
            minor_change: area * Self::MINOR_FRACTION,
            mouse_change: area * Self::MOUSE_FRACTION,
        }
    }
}

/// Change measurements for one frame pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMetrics {
    /// Pixels set in the binarized difference mask
    pub nonzero_pixels: u64,
    /// At least one external contour exceeds the minimum contour area
    pub significant_change: bool,
}

/// What the classifier decided for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClassification {
    /// The test-screen exit check ran on this frame
    pub test_screen_checked: bool,
    /// The test-screen exit check fired on this frame
    pub test_screen_exited: bool,
    /// The alarm trigger condition held on this frame
    pub alarm_triggered: bool,
    /// The hysteresis reset fired on this frame
    pub reset_fired: bool,
    /// Phase moved into `Alarm` on this frame
    pub entered_alarm: bool,
    pub phase: DetectionPhase,
}

/// Per-frame debounce and hysteresis state machine.
///
/// Owned by the frame loop only. The candidate flag toggles on each frame that
/// meets the trigger condition, so a second qualifying frame cancels the
/// candidate instead of confirming it. While the flag is up the counter
/// advances every frame and the phase becomes `Alarm` once it reaches
/// `fps_stop`.
#[derive(Debug, Clone)]
pub struct DetectionState {
    phase: DetectionPhase,
    flag: bool,
    frame_counter: u64,
    fps_stop: u64,
    thresholds: Thresholds,
}

impl DetectionState {
    pub fn new(fps_stop: u64, thresholds: Thresholds, initial: DetectionPhase) -> Self {
        Self {
            phase: initial,
            flag: false,
            frame_counter: 0,
            fps_stop: fps_stop.max(1),
            thresholds,
        }
    }

    pub fn phase(&self) -> DetectionPhase {
        self.phase
    }

    pub fn flag(&self) -> bool {
        self.flag
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn fps_stop(&self) -> u64 {
        self.fps_stop
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Advance the state machine by one frame
    pub fn classify(&mut self, metrics: FrameMetrics) -> FrameClassification {
        let previous = self.phase;
        let pixels = metrics.nonzero_pixels as f64;

        let test_screen_checked = self.phase == DetectionPhase::NotInTestScreen;
        let mut test_screen_exited = false;
        if test_screen_checked && pixels > self.thresholds.full_screen_change {
            self.phase = DetectionPhase::Idle;
            test_screen_exited = true;
        }

        let alarm_triggered =
            pixels > self.thresholds.significant_change && metrics.significant_change;
        if alarm_triggered {
            if self.flag {
                self.flag = false;
                self.phase = DetectionPhase::Idle;
            } else {
                self.flag = true;
                self.frame_counter = 0;
            }
        }

        if self.flag {
            self.frame_counter += 1;
            if self.frame_counter >= self.fps_stop {
                self.phase = DetectionPhase::Alarm;
            }
        }

        let mut reset_fired = false;
        if self.flag
            && pixels > self.thresholds.minor_change
            && pixels < self.thresholds.mouse_change
        {
            self.flag = false;
            self.phase = DetectionPhase::Idle;
            reset_fired = true;
        }

        FrameClassification {
            test_screen_checked,
            test_screen_exited,
            alarm_triggered,
            reset_fired,
            entered_alarm: previous != DetectionPhase::Alarm && self.phase == DetectionPhase::Alarm,
            phase: self.phase,
        }
    }
}
