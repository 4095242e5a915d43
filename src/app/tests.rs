use super::*;
use crate::bus::{Bus, TopicFilter};
use crate::config::DutwatchConfig;
use crate::events::{Stage, StageEvent};
use crate::forwarder::{BusRelay, LogDownstream};
use crate::indicator::{IndicatorChannel, IndicatorPort, Level, MemoryIndicatorPort};
use image::{GrayImage, Luma};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

fn create_test_config() -> DutwatchConfig {
    let mut config = DutwatchConfig::default();
    config.dut.id = "vid3".to_string();
    config.detector.source_fps = 10.0;
    config.detector.pace_to_source_fps = false;
    config
}

fn memory_parts(port: Arc<MemoryIndicatorPort>) -> StationParts {
    StationParts {
        port,
        switch: None,
        downstream: Arc::new(LogDownstream),
    }
}

fn write_frames(dir: &TempDir, count: usize) {
    for i in 0..count {
        let frame = GrayImage::from_pixel(64, 48, Luma([20u8]));
        frame
            .save(dir.path().join(format!("frame_{:03}.png", i)))
            .unwrap();
    }
}

#[tokio::test]
async fn test_app_creation() {
    let app = TesterApp::with_parts(
        create_test_config(),
        memory_parts(Arc::new(MemoryIndicatorPort::new())),
    )
    .unwrap();

    assert_eq!(app.channels().result, "tester.vid3.result");
    assert_eq!(
        app.component_names(),
        vec!["forwarder", "detector", "orchestrator"]
    );

    // No components started yet
    let states = app.get_all_component_states().await;
    assert!(states.is_empty());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let mut config = create_test_config();
    config.dut.id = String::new();
    let result = TesterApp::with_parts(config, memory_parts(Arc::new(MemoryIndicatorPort::new())));
    assert!(result.is_err());
}

#[tokio::test]
async fn test_component_state_management() {
    let app = TesterApp::with_parts(
        create_test_config(),
        memory_parts(Arc::new(MemoryIndicatorPort::new())),
    )
    .unwrap();

    app.set_component_state("detector", ComponentState::Starting)
        .await;
    assert_eq!(
        app.get_component_state("detector").await,
        Some(ComponentState::Starting)
    );

    app.set_component_state("detector", ComponentState::Running)
        .await;
    app.set_component_state("forwarder", ComponentState::Failed)
        .await;

    let all_states = app.get_all_component_states().await;
    assert_eq!(all_states.len(), 2);
    assert_eq!(all_states.get("detector"), Some(&ComponentState::Running));
    assert_eq!(all_states.get("forwarder"), Some(&ComponentState::Failed));
    assert_eq!(app.get_component_state("orchestrator").await, None);
}

#[tokio::test]
async fn test_lifecycle_start_and_shutdown() {
    let port = Arc::new(MemoryIndicatorPort::new());
    let mut app = TesterApp::with_parts(create_test_config(), memory_parts(port.clone())).unwrap();

    app.initialize().await.unwrap();
    let states = app.get_all_component_states().await;
    assert_eq!(states.len(), 3);
    assert!(states.values().all(|state| *state == ComponentState::Stopped));

    app.start().await.unwrap();
    assert_eq!(
        app.get_component_state("orchestrator").await,
        Some(ComponentState::Running)
    );
    assert_eq!(port.get(IndicatorChannel::Power).unwrap(), Level::Low);

    assert!(!port.is_closed());
    let exit_code = app.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
    let states = app.get_all_component_states().await;
    assert!(states.values().all(|state| *state == ComponentState::Stopped));
    assert!(port.is_closed());
}

#[tokio::test]
async fn test_handshake_runs_detector_over_image_sequence() {
    let dir = TempDir::new().unwrap();
    write_frames(&dir, 8);

    let mut config = create_test_config();
    config.detector.source = Some(dir.path().to_path_buf());

    let uplink = Bus::new(256);
    let mut relayed = uplink.subscribe(TopicFilter::Pattern("tester.vid3.response".into()), "uplink");

    let port = Arc::new(MemoryIndicatorPort::with_levels(&[
        (IndicatorChannel::Red, Level::High),
        (IndicatorChannel::Green, Level::High),
    ]));
    let parts = StationParts {
        port: port.clone(),
        switch: None,
        downstream: Arc::new(BusRelay::new(uplink.clone())),
    };
    let mut app = TesterApp::with_parts(config, parts).unwrap();
    app.initialize().await.unwrap();
    app.start().await.unwrap();

    let mut stages = Vec::new();
    while stages.len() < 3 {
        let message = timeout(Duration::from_secs(5), relayed.recv())
            .await
            .expect("handshake stalled")
            .unwrap();
        let event: StageEvent = message.decode().unwrap();
        stages.push(event);
    }
    assert_eq!(
        stages,
        vec![
            StageEvent::success(Stage::Init),
            StageEvent::success(Stage::BeginCapture),
            StageEvent::success(Stage::TestScreen),
        ]
    );

    // The frame loop starts once the detector sees the testScreen response
    let mut summary = None;
    for _ in 0..500 {
        if let Some(result) = app.detector().wait_for_completion().await {
            summary = Some(result.unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let summary = summary.expect("frame loop never ran");
    assert!(!port.is_closed());
    assert_eq!(summary.frames_processed, 7);
    assert_eq!(summary.alarms_raised, 0);

    // testScreen was the last stage written: red on, green off
    assert_eq!(port.get(IndicatorChannel::Red).unwrap(), Level::High);
    assert_eq!(port.get(IndicatorChannel::Green).unwrap(), Level::Low);

    assert_eq!(app.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_source_keeps_orchestrator_serving() {
    let mut config = create_test_config();
    config.detector.await_handshake = false;
    let port = Arc::new(MemoryIndicatorPort::new());
    let mut app = TesterApp::with_parts(config, memory_parts(port)).unwrap();

    app.initialize().await.unwrap();
    app.start().await.unwrap();

    assert!(app.detector().is_halted());
    assert_eq!(
        app.get_component_state("detector").await,
        Some(ComponentState::Failed)
    );
    assert_eq!(
        app.get_component_state("orchestrator").await,
        Some(ComponentState::Running)
    );

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_requested_shutdown() {
    let mut app = TesterApp::with_parts(
        create_test_config(),
        memory_parts(Arc::new(MemoryIndicatorPort::new())),
    )
    .unwrap();
    app.initialize().await.unwrap();
    app.start().await.unwrap();

    let sender = app.take_shutdown_sender().unwrap();
    sender.send(ShutdownReason::UserRequest).unwrap();
    assert_eq!(app.run_until_requested().await.unwrap(), 0);
    assert!(app.take_shutdown_sender().is_none());
}
