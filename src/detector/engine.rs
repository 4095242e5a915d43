use super::analysis::FrameAnalyzer;
use super::state::{DetectionPhase, DetectionState, FrameClassification, Thresholds};
use crate::bus::{Bus, Channels};
use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::events::{AlertEvent, AlertOrigin, Outcome, Stage, StageEvent};
use crate::source::{FrameSource, SourceInfo};
use image::GrayImage;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Give up on a source that keeps failing to produce decodable frames
const MAX_CONSECUTIVE_FRAME_ERRORS: u32 = 25;

/// Operator tunables accepted by `configure`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tunables {
    pub frame_threshold_seconds: f64,
    pub binarization_threshold: f64,
}

/// Counters reported when the frame loop ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionSummary {
    pub frames_processed: u64,
    pub frame_errors: u64,
    pub test_screen_exits: u64,
    pub alarms_raised: u64,
    pub resets: u64,
    pub final_phase: Option<DetectionPhase>,
    pub cancelled: bool,
}

struct OpenedSource {
    source: Box<dyn FrameSource>,
    info: SourceInfo,
    fps_stop: u64,
}

/// Frame-difference stage and alarm classifier.
///
/// Lifecycle: `configure` → `open_source` → `start`. The frame loop runs on a
/// blocking worker, owns all detection state, and talks to the rest of the
/// station only by publishing on the bus.
pub struct DetectionEngine {
    settings: DetectorConfig,
    bus: Bus,
    channels: Channels,
    tunables: Option<Tunables>,
    opened: Option<OpenedSource>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<DetectionSummary, DetectorError>>>,
}

impl DetectionEngine {
    pub fn new(settings: DetectorConfig, bus: Bus, channels: Channels) -> Self {
        Self {
            settings,
            bus,
            channels,
            tunables: None,
            opened: None,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Accept the two operator tunables. Both must be positive.
    pub fn configure(
        &mut self,
        frame_threshold_seconds: f64,
        binarization_threshold: f64,
    ) -> Result<Tunables, DetectorError> {
        if !(frame_threshold_seconds > 0.0) {
            return Err(DetectorError::ConfigurationInvalid {
                details: format!(
                    "frame threshold must be positive, got {}",
                    frame_threshold_seconds
                ),
            });
        }
        if !(binarization_threshold > 0.0) {
            return Err(DetectorError::ConfigurationInvalid {
                details: format!(
                    "binarization threshold must be positive, got {}",
                    binarization_threshold
                ),
            });
        }

        let tunables = Tunables {
            frame_threshold_seconds,
            binarization_threshold,
        };
        info!(
            "Detector configured: frame threshold {}s, binarization threshold {}",
            frame_threshold_seconds, binarization_threshold
        );
        self.tunables = Some(tunables);
        Ok(tunables)
    }

    pub fn is_configured(&self) -> bool {
        self.tunables.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    /// Open the video feed and derive the debounce length from its frame rate
    pub fn open_source(&mut self, mut source: Box<dyn FrameSource>) -> Result<SourceInfo, DetectorError> {
        let tunables = self.tunables.ok_or(DetectorError::NotConfigured)?;

        let info = match source.open() {
            Ok(info) => info,
            Err(e) => {
                source.release();
                return Err(match e {
                    DetectorError::SourceUnavailable { .. } => e,
                    other => DetectorError::SourceUnavailable {
                        source_name: source.name().to_string(),
                        details: other.to_string(),
                    },
                });
            }
        };

        if !(info.fps > 0.0) || info.width == 0 || info.height == 0 {
            source.release();
            return Err(DetectorError::SourceUnavailable {
                source_name: source.name().to_string(),
                details: format!(
                    "unusable stream geometry {}x{} @ {}fps",
                    info.width, info.height, info.fps
                ),
            });
        }

        let fps_stop = ((info.fps * tunables.frame_threshold_seconds).round() as u64).max(1);

        let offset_frames = (info.fps * self.settings.start_offset_seconds).round() as u64;
        if offset_frames > 0 {
            let skipped = source.skip(offset_frames)?;
            info!(
                "Skipped {} of {} start-offset frames on {}",
                skipped,
                offset_frames,
                source.name()
            );
        }

        info!(
            "Opened {} ({}x{} @ {:.2}fps), alarm after {} frames",
            source.name(),
            info.width,
            info.height,
            info.fps,
            fps_stop
        );

        self.opened = Some(OpenedSource {
            source,
            info,
            fps_stop,
        });
        Ok(info)
    }

    /// Frames a candidate change must persist for, once a source is open
    pub fn fps_stop(&self) -> Option<u64> {
        self.opened.as_ref().map(|o| o.fps_stop)
    }

    /// Spawn the frame loop on a blocking worker
    pub fn start(&mut self) -> Result<(), DetectorError> {
        if self.task.is_some() {
            debug!("Detection loop already started");
            return Ok(());
        }
        let tunables = self.tunables.ok_or(DetectorError::NotConfigured)?;
        let opened = self.opened.take().ok_or(DetectorError::NotConfigured)?;

        let initial_phase = if self.settings.start_in_test_screen {
            DetectionPhase::Idle
        } else {
            DetectionPhase::NotInTestScreen
        };
        let state = DetectionState::new(
            opened.fps_stop,
            Thresholds::for_area(opened.info.area()),
            initial_phase,
        );
        let analyzer = FrameAnalyzer::new(
            tunables.binarization_threshold,
            self.settings.min_contour_area,
        );
        let frame_budget = self
            .settings
            .pace_to_source_fps
            .then(|| Duration::from_secs_f64(1.0 / opened.info.fps));

        let frame_loop = FrameLoop {
            source: opened.source,
            state,
            analyzer,
            bus: self.bus.clone(),
            channels: self.channels.clone(),
            cancel: self.cancel.clone(),
            frame_budget,
        };

        self.task = Some(tokio::task::spawn_blocking(move || frame_loop.run()));
        info!("Detection loop started for {}", self.channels.dut_id);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Ask the frame loop to stop after the current frame
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the frame loop to finish and collect its summary
    pub async fn wait(&mut self) -> Option<Result<DetectionSummary, DetectorError>> {
        let task = self.task.take()?;
        match task.await {
            Ok(result) => Some(result),
            Err(e) => Some(Err(DetectorError::FrameProcessing {
                details: format!("detection worker panicked: {}", e),
            })),
        }
    }

    /// Stop the loop and release an opened but never started source
    pub async fn shutdown(&mut self) -> Option<Result<DetectionSummary, DetectorError>> {
        self.stop();
        if let Some(mut opened) = self.opened.take() {
            opened.source.release();
        }
        self.wait().await
    }
}

struct FrameLoop {
    source: Box<dyn FrameSource>,
    state: DetectionState,
    analyzer: FrameAnalyzer,
    bus: Bus,
    channels: Channels,
    cancel: CancellationToken,
    frame_budget: Option<Duration>,
}

impl FrameLoop {
    fn run(mut self) -> Result<DetectionSummary, DetectorError> {
        let result = self.process_frames();
        self.source.release();

        match &result {
            Ok(summary) => info!(
                "Detection loop finished for {}: {} frames, {} alarms, {} resets, cancelled: {}",
                self.channels.dut_id,
                summary.frames_processed,
                summary.alarms_raised,
                summary.resets,
                summary.cancelled
            ),
            Err(e) => error!("Detection loop for {} halted: {}", self.channels.dut_id, e),
        }
        result
    }

    fn process_frames(&mut self) -> Result<DetectionSummary, DetectorError> {
        let mut summary = DetectionSummary::default();

        let mut previous = match self.next_gray(&mut summary)? {
            Some(gray) => gray,
            None => {
                warn!("{} produced no frames", self.source.name());
                return Ok(summary);
            }
        };

        loop {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let frame_started = Instant::now();

            let current = match self.next_gray(&mut summary)? {
                Some(gray) => gray,
                None => break,
            };

            match self.analyzer.measure(&previous, &current) {
                Ok(metrics) => {
                    let classification = self.state.classify(metrics);
                    self.publish(&classification);
                    summary.frames_processed += 1;
                    summary.test_screen_exits += classification.test_screen_exited as u64;
                    summary.alarms_raised += classification.entered_alarm as u64;
                    summary.resets += classification.reset_fired as u64;
                }
                Err(e) => {
                    warn!("Skipping frame on {}: {}", self.source.name(), e);
                    summary.frame_errors += 1;
                }
            }
            previous = current;

            if let Some(budget) = self.frame_budget {
                let elapsed = frame_started.elapsed();
                if elapsed < budget {
                    std::thread::sleep(budget - elapsed);
                }
            }
        }

        summary.final_phase = Some(self.state.phase());
        Ok(summary)
    }

    /// Next decodable frame, tolerating isolated decode failures
    fn next_gray(&mut self, summary: &mut DetectionSummary) -> Result<Option<GrayImage>, DetectorError> {
        let mut consecutive_errors = 0;
        loop {
            let result = self
                .source
                .next_frame()
                .and_then(|frame| frame.map(|f| f.to_gray()).transpose());
            match result {
                Ok(gray) => return Ok(gray),
                Err(e) => {
                    summary.frame_errors += 1;
                    consecutive_errors += 1;
                    warn!("Frame read failed on {}: {}", self.source.name(), e);
                    if consecutive_errors >= MAX_CONSECUTIVE_FRAME_ERRORS {
                        return Err(e);
                    }
                }
            }
        }
    }

    fn publish(&self, classification: &FrameClassification) {
        if classification.test_screen_checked {
            self.publish_result(Stage::TestScreen, Outcome::from_bool(classification.test_screen_exited));
        }
        self.publish_result(
            Stage::Alert,
            Outcome::from_bool(classification.phase == DetectionPhase::Alarm),
        );
        self.publish_result(Stage::AlertReset, Outcome::from_bool(classification.reset_fired));

        if classification.test_screen_exited {
            info!("{} left the non-test screen", self.channels.dut_id);
        }
        if classification.reset_fired {
            info!("Alarm candidate on {} acknowledged by user interaction", self.channels.dut_id);
        }
        if classification.entered_alarm {
            warn!("Alarm raised on {}", self.channels.dut_id);
            if let Err(e) = self
                .bus
                .publish(&self.channels.alert, &AlertEvent::activated(AlertOrigin::Message))
            {
                warn!("Failed to publish alarm activation: {}", e);
            }
        }
    }

    fn publish_result(&self, stage: Stage, status: Outcome) {
        if let Err(e) = self
            .bus
            .publish(&self.channels.result, &StageEvent::new(stage, status))
        {
            warn!("Failed to publish {} result: {}", stage, e);
        }
    }
}
