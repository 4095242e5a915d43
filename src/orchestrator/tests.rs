use super::*;
use crate::bus::{BusMessage, Subscription};
use crate::config::DutwatchConfig;
use crate::events::{AlertEvent, AlertOrigin, IndicatorSnapshot, Lamp, Stage, StageEvent};
use crate::indicator::{IndicatorChannel, Level, MemoryIndicatorPort, MemorySwitch};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{sleep, timeout};

struct Station {
    bus: Bus,
    channels: Channels,
    port: Arc<MemoryIndicatorPort>,
    orchestrator: StageOrchestrator,
}

fn station(port: MemoryIndicatorPort, switch: Option<Arc<MemorySwitch>>) -> Station {
    let bus = Bus::new(1024);
    let channels = Channels::for_dut("vid1");
    let port = Arc::new(port);
    let mut settings = DutwatchConfig::default().orchestrator;
    settings.switch_poll_millis = 10;
    settings.switch_holdoff_millis = 100;
    let orchestrator = StageOrchestrator::new(
        settings,
        bus.clone(),
        channels.clone(),
        port.clone(),
        switch.map(|s| s as Arc<dyn SwitchInput>),
    );
    Station {
        bus,
        channels,
        port,
        orchestrator,
    }
}

fn subscribe(station: &Station, topic: &str) -> Subscription {
    station
        .bus
        .subscribe(TopicFilter::Exact(topic.to_string()), "test")
}

async fn next_message(subscription: &mut Subscription) -> BusMessage {
    timeout(Duration::from_secs(10), subscription.recv())
        .await
        .expect("timed out waiting for bus message")
        .expect("bus receive failed")
}

async fn next_event(subscription: &mut Subscription) -> StageEvent {
    next_message(subscription)
        .await
        .decode()
        .expect("undecodable stage event")
}

fn drain_count(subscription: &mut Subscription) -> usize {
    let mut count = 0;
    while let Ok(Some(_)) = subscription.try_recv() {
        count += 1;
    }
    count
}

fn lamp(port: &MemoryIndicatorPort, channel: IndicatorChannel) -> Level {
    port.get(channel).unwrap()
}

#[tokio::test]
async fn test_begin_capture_clears_lamps_and_arms_latch() {
    let station = station(
        MemoryIndicatorPort::with_levels(&[
            (IndicatorChannel::Red, Level::High),
            (IndicatorChannel::Amber, Level::High),
            (IndicatorChannel::Green, Level::High),
        ]),
        None,
    );
    let mut responses = subscribe(&station, &station.channels.response);
    station.orchestrator.start().await.unwrap();

    assert_eq!(next_event(&mut responses).await, StageEvent::success(Stage::Init));
    assert_eq!(lamp(&station.port, IndicatorChannel::Power), Level::Low);

    station.bus.publish_raw(
        &station.channels.result,
        r#"{"stage":"beginCapture","status":"success"}"#,
    );
    let response = next_message(&mut responses).await;
    assert_eq!(
        &*response.payload,
        r#"{"stage":"beginCapture","status":"success"}"#
    );

    for channel in [IndicatorChannel::Red, IndicatorChannel::Amber, IndicatorChannel::Green] {
        assert_eq!(lamp(&station.port, channel), Level::Low);
    }
    assert!(station.orchestrator.latch_active().await);
    station.orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_stage_lamp_maps() {
    let station = station(MemoryIndicatorPort::new(), None);
    let mut responses = subscribe(&station, &station.channels.response);
    station.orchestrator.start().await.unwrap();
    next_event(&mut responses).await;

    let expectations = [
        (Stage::TestScreen, Level::High, Level::Low, Level::Low),
        (Stage::PopUp, Level::High, Level::Low, Level::High),
        (Stage::Idle, Level::Low, Level::Low, Level::Low),
    ];
    for (stage, red, amber, green) in expectations {
        station
            .bus
            .publish(&station.channels.result, &StageEvent::success(stage))
            .unwrap();
        assert_eq!(next_event(&mut responses).await, StageEvent::success(stage));
        assert_eq!(lamp(&station.port, IndicatorChannel::Red), red, "{}", stage);
        assert_eq!(lamp(&station.port, IndicatorChannel::Amber), amber, "{}", stage);
        assert_eq!(lamp(&station.port, IndicatorChannel::Green), green, "{}", stage);
    }
    station.orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_and_unmapped_results_are_ignored() {
    let station = station(MemoryIndicatorPort::new(), None);
    let mut responses = subscribe(&station, &station.channels.response);
    station.orchestrator.start().await.unwrap();
    next_event(&mut responses).await;

    let result = &station.channels.result;
    station.bus.publish(result, &StageEvent::failed(Stage::TestScreen)).unwrap();
    station.bus.publish(result, &StageEvent::success(Stage::Alert)).unwrap();
    station.bus.publish(result, &StageEvent::success(Stage::AlertReset)).unwrap();
    station.bus.publish_raw(result, r#"{"stage":"bogus","status":"success"}"#);
    station.bus.publish(result, &StageEvent::success(Stage::PopUp)).unwrap();

    // The first response is the one for popUp
    assert_eq!(next_event(&mut responses).await, StageEvent::success(Stage::PopUp));
    station.orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_partial_mismatch_fails_whole_stage() {
    let port = MemoryIndicatorPort::new();
    port.stick(IndicatorChannel::Green, Level::Low);
    let station = station(port, None);
    let mut responses = subscribe(&station, &station.channels.response);
    station.orchestrator.start().await.unwrap();
    next_event(&mut responses).await;

    station
        .bus
        .publish(&station.channels.result, &StageEvent::success(Stage::PopUp))
        .unwrap();
    assert_eq!(next_event(&mut responses).await, StageEvent::failed(Stage::PopUp));
    // Red was still driven
    assert_eq!(lamp(&station.port, IndicatorChannel::Red), Level::High);
    assert!(!station.orchestrator.latch_active().await);
    station.orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_init_reports_power_failure() {
    let port = MemoryIndicatorPort::new();
    port.stick(IndicatorChannel::Power, Level::High);
    let station = station(port, None);
    let mut responses = subscribe(&station, &station.channels.response);
    station.orchestrator.start().await.unwrap();

    assert_eq!(next_event(&mut responses).await, StageEvent::failed(Stage::Init));
    station.orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_message_activation_with_amber_stuck_off_fails() {
    let port = MemoryIndicatorPort::new();
    port.stick(IndicatorChannel::Amber, Level::Low);
    let station = station(port, None);
    let mut alert_responses = subscribe(&station, &station.channels.alert_response);
    station.orchestrator.start().await.unwrap();

    station.bus.publish_raw(
        &station.channels.alert,
        r#"{"stage":"alert","status":"activated"}"#,
    );
    let response = next_message(&mut alert_responses).await;
    assert_eq!(&*response.payload, r#"{"stage":"alert-msg","status":"failed"}"#);
    assert!(!station.orchestrator.latch_active().await);
    station.orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_reset_rejected_until_amber_observably_off() {
    let station = station(MemoryIndicatorPort::new(), None);
    let mut alert_responses = subscribe(&station, &station.channels.alert_response);
    station.orchestrator.start().await.unwrap();

    station
        .bus
        .publish(&station.channels.alert, &AlertEvent::activated(AlertOrigin::Message))
        .unwrap();
    assert_eq!(
        next_event(&mut alert_responses).await,
        StageEvent::success(Stage::AlertByMessage)
    );
    assert!(station.orchestrator.latch_active().await);

    station.port.stick(IndicatorChannel::Amber, Level::High);
    station
        .bus
        .publish(&station.channels.alert, &AlertEvent::deactivated(AlertOrigin::Message))
        .unwrap();
    assert_eq!(
        next_event(&mut alert_responses).await,
        StageEvent::failed(Stage::AlertReset)
    );
    assert!(station.orchestrator.latch_active().await);

    station.port.unstick(IndicatorChannel::Amber);
    station
        .bus
        .publish(&station.channels.alert, &AlertEvent::deactivated(AlertOrigin::Message))
        .unwrap();
    assert_eq!(
        next_event(&mut alert_responses).await,
        StageEvent::success(Stage::AlertReset)
    );
    assert!(!station.orchestrator.latch_active().await);
    assert_eq!(lamp(&station.port, IndicatorChannel::Amber), Level::Low);
    station.orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_reset_without_latch_leaves_amber_alone() {
    let station = station(
        MemoryIndicatorPort::with_levels(&[(IndicatorChannel::Amber, Level::High)]),
        None,
    );
    let mut alert_responses = subscribe(&station, &station.channels.alert_response);
    station.orchestrator.start().await.unwrap();

    station.bus.publish_raw(
        &station.channels.alert,
        r#"{"stage":"alert-reset","status":"deactivated"}"#,
    );
    assert_eq!(
        next_event(&mut alert_responses).await,
        StageEvent::failed(Stage::AlertReset)
    );
    assert_eq!(lamp(&station.port, IndicatorChannel::Amber), Level::High);
    assert!(station
        .port
        .writes()
        .iter()
        .all(|(channel, _)| *channel != IndicatorChannel::Amber));
    station.orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_unresolvable_alert_stage_is_dropped() {
    let station = station(MemoryIndicatorPort::new(), None);
    let mut alert_responses = subscribe(&station, &station.channels.alert_response);
    station.orchestrator.start().await.unwrap();

    station
        .bus
        .publish_raw(&station.channels.alert, r#"{"status":"activated"}"#);
    station
        .bus
        .publish_raw(&station.channels.alert, r#"{"stage":"error","status":"activated"}"#);
    station.bus.publish_raw(
        &station.channels.alert,
        r#"{"stage":"alert-reset","status":"deactivated"}"#,
    );

    // Only the well-formed reset produced a response
    assert_eq!(
        next_event(&mut alert_responses).await,
        StageEvent::failed(Stage::AlertReset)
    );
    assert_eq!(lamp(&station.port, IndicatorChannel::Amber), Level::Low);
    assert!(station.port.servo_history().is_empty());
    station.orchestrator.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_repeated_activation_sweeps_once() {
    let station = station(MemoryIndicatorPort::new(), None);
    let mut alert_responses = subscribe(&station, &station.channels.alert_response);
    station.orchestrator.start().await.unwrap();

    for _ in 0..2 {
        station
            .bus
            .publish(&station.channels.alert, &AlertEvent::activated(AlertOrigin::Message))
            .unwrap();
        assert_eq!(
            next_event(&mut alert_responses).await,
            StageEvent::success(Stage::AlertByMessage)
        );
    }

    sleep(Duration::from_secs(10)).await;
    assert_eq!(station.port.servo_history().len(), 3);
    assert_eq!(station.port.servo_releases(), 1);

    // Still outstanding after the sweep finished: no second sweep
    station
        .bus
        .publish(&station.channels.alert, &AlertEvent::activated(AlertOrigin::Message))
        .unwrap();
    next_event(&mut alert_responses).await;
    sleep(Duration::from_secs(10)).await;
    assert_eq!(station.port.servo_history().len(), 3);
    station.orchestrator.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_alert_response_not_delayed_by_sweep() {
    let station = station(MemoryIndicatorPort::new(), None);
    let mut alert_responses = subscribe(&station, &station.channels.alert_response);
    station.orchestrator.start().await.unwrap();

    let started = tokio::time::Instant::now();
    station
        .bus
        .publish(&station.channels.alert, &AlertEvent::activated(AlertOrigin::Message))
        .unwrap();
    next_event(&mut alert_responses).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(station.orchestrator.core().servo().is_sweeping());
    station.orchestrator.close().await.unwrap();
    assert!(!station.orchestrator.core().servo().is_sweeping());
}

#[tokio::test(start_paused = true)]
async fn test_switch_toggles_between_activation_and_reset() {
    let switch = Arc::new(MemorySwitch::new());
    let station = station(MemoryIndicatorPort::new(), Some(switch.clone()));
    let mut alert_responses = subscribe(&station, &station.channels.alert_response);
    station.orchestrator.start().await.unwrap();

    switch.press();
    let response = next_message(&mut alert_responses).await;
    assert_eq!(&*response.payload, r#"{"stage":"alert-switch","status":"success"}"#);
    assert_eq!(lamp(&station.port, IndicatorChannel::Amber), Level::High);

    // Holding the button does not repeat the action
    sleep(Duration::from_secs(1)).await;
    assert_eq!(drain_count(&mut alert_responses), 0);

    switch.release();
    sleep(Duration::from_millis(50)).await;
    switch.press();
    assert_eq!(
        next_event(&mut alert_responses).await,
        StageEvent::success(Stage::AlertReset)
    );
    assert_eq!(lamp(&station.port, IndicatorChannel::Amber), Level::Low);
    assert!(!station.orchestrator.latch_active().await);
    station.orchestrator.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_switch_resets_latch_armed_by_stage() {
    let switch = Arc::new(MemorySwitch::new());
    let station = station(
        MemoryIndicatorPort::with_levels(&[(IndicatorChannel::Amber, Level::High)]),
        Some(switch.clone()),
    );
    let mut responses = subscribe(&station, &station.channels.response);
    let mut alert_responses = subscribe(&station, &station.channels.alert_response);
    station.orchestrator.start().await.unwrap();
    next_event(&mut responses).await;

    station
        .bus
        .publish(&station.channels.result, &StageEvent::success(Stage::TestScreen))
        .unwrap();
    next_event(&mut responses).await;
    assert!(station.orchestrator.latch_active().await);

    switch.press();
    assert_eq!(
        next_event(&mut alert_responses).await,
        StageEvent::success(Stage::AlertReset)
    );
    assert!(station.port.servo_history().is_empty());
    station.orchestrator.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_status_broadcast_period() {
    let station = station(MemoryIndicatorPort::new(), None);
    let mut status = subscribe(&station, &station.channels.status);
    station.orchestrator.start().await.unwrap();

    // Snapshot after init plus the broadcaster's immediate first update
    let first = next_message(&mut status).await;
    let snapshot: IndicatorSnapshot = first.decode().unwrap();
    assert_eq!(snapshot.get(IndicatorChannel::Power), Some(Lamp::Off));
    sleep(Duration::from_millis(10)).await;
    drain_count(&mut status);

    sleep(Duration::from_millis(299_500)).await;
    assert_eq!(drain_count(&mut status), 0);

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(drain_count(&mut status), 1);
    station.orchestrator.close().await.unwrap();
}

struct CountingComponent {
    heartbeats: AtomicUsize,
}

#[async_trait]
impl Component for CountingComponent {
    fn name(&self) -> &str {
        "counting"
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn housekeep(&self) -> Result<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_housekeeping_calls_collaborators() {
    let station = station(MemoryIndicatorPort::new(), None);
    let collaborator = Arc::new(CountingComponent {
        heartbeats: AtomicUsize::new(0),
    });
    station.orchestrator.attach(collaborator.clone());
    station.orchestrator.start().await.unwrap();

    sleep(Duration::from_secs(149)).await;
    assert_eq!(collaborator.heartbeats.load(Ordering::SeqCst), 0);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(collaborator.heartbeats.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(150)).await;
    assert_eq!(collaborator.heartbeats.load(Ordering::SeqCst), 2);

    station.orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_close_stops_all_activities() {
    let switch = Arc::new(MemorySwitch::new());
    let station = station(MemoryIndicatorPort::new(), Some(switch.clone()));
    station.orchestrator.start().await.unwrap();
    station.orchestrator.close().await.unwrap();

    let writes_before = station.port.writes().len();
    station
        .bus
        .publish(&station.channels.result, &StageEvent::success(Stage::PopUp))
        .unwrap();
    switch.press();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(station.port.writes().len(), writes_before);
    // The port outlives the orchestrator; the app releases it
    assert!(!station.port.is_closed());
}
