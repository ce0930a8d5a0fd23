//! End-to-end sweep runs against fake devices.

mod common;

use common::{device_yaml, measurement_yaml, EventLog, FakeBoard, FakeStimulator};
use measure_sync::config::ExperimentConfig;
use measure_sync::orchestrator::{ExperimentOrchestrator, ExperimentTiming};
use measure_sync::SyncError;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

fn vhp_defaults() -> Vec<String> {
    ["D8000", "Y64000", "P1", "Q0", "J0", "M1", "S", "X"]
        .iter()
        .map(|c| format!("vhp {}", c))
        .collect()
}

fn condition_events(file: &str, frequency: i64, cycles: u32) -> Vec<String> {
    let mut events = vec![
        "vhp C1".to_string(),
        "vhp V50".to_string(),
        format!("vhp F{}", frequency),
        format!("add_streamer {}", file),
    ];
    for _ in 0..cycles {
        events.push("marker 1".to_string());
        events.push("vhp 1".to_string());
        events.push("marker 11".to_string());
        events.push("vhp 0".to_string());
    }
    events.push(format!("delete_streamer {}", file));
    events
}

#[tokio::test(start_paused = true)]
async fn test_two_condition_sweep_interleaves_markers_and_commands() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig::from_documents(&measurement_yaml(2, 0), &device_yaml(false))
        .unwrap();
    let ts = config.timestamp();
    let events = EventLog::default();

    let orchestrator = ExperimentOrchestrator::new(
        config,
        FakeBoard::new(events.clone()),
        FakeStimulator::new(events.clone(), 1),
        dir.path(),
    );

    let start = Instant::now();
    let summary = orchestrator.run().await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(6));

    let f10 = format!("{}_SYNTHETIC_BOARD_c1_f10_v50.csv", ts);
    let f20 = format!("{}_SYNTHETIC_BOARD_c1_f20_v50.csv", ts);

    let mut expected = vec![
        "prepare".to_string(),
        "start_stream".to_string(),
        "link open".to_string(),
    ];
    expected.extend(vhp_defaults());
    expected.extend(condition_events(&f10, 10, 2));
    expected.extend(condition_events(&f20, 20, 2));
    expected.extend(["vhp close", "stop_stream", "release"].map(String::from));
    assert_eq!(events.snapshot(), expected);

    assert_eq!(summary.conditions.len(), 2);
    assert_eq!(summary.markers, 8);
    assert_eq!(summary.baseline, None);
    assert_eq!(summary.recordings[0], dir.path().join(&f10));
    assert_eq!(summary.recordings[1], dir.path().join(&f20));

    let metadata = std::fs::read_to_string(&summary.metadata).unwrap();
    assert!(metadata.contains("*** Contents of Measure Configuration ***"));
    assert!(metadata.contains("Serial: /dev/fake-vhp"));
    assert!(!metadata.contains("Run aborted"));
}

#[tokio::test(start_paused = true)]
async fn test_baseline_recorded_until_stimulator_appears() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig::from_documents(&measurement_yaml(1, 5), &device_yaml(false))
        .unwrap();
    let ts = config.timestamp();
    let events = EventLog::default();
    let stimulator = FakeStimulator::new(events.clone(), 3);
    let probes = stimulator.probes();

    let summary = ExperimentOrchestrator::new(
        config,
        FakeBoard::new(events.clone()),
        stimulator,
        dir.path(),
    )
    .run()
    .await
    .unwrap();

    let baseline = format!("{}_SYNTHETIC_BOARD_baseline_with_VHP_powered_OFF.csv", ts);
    assert_eq!(summary.baseline, Some(dir.path().join(&baseline)));
    assert_eq!(probes.load(Ordering::SeqCst), 3);

    let log = events.snapshot();
    assert_eq!(
        &log[2..6],
        &[
            format!("add_streamer {}", baseline),
            "marker 333".to_string(),
            "marker 33".to_string(),
            format!("delete_streamer {}", baseline),
        ]
    );
    assert_eq!(log[6], "link open");

    // baseline 333 + 33, then per condition: pre-start 3 + one ON/OFF pair
    assert_eq!(summary.markers, 2 + 2 * 3);
    assert_eq!(events.count("marker 3"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_absent_stimulator_polls_until_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig::from_documents(&measurement_yaml(1, 0), &device_yaml(false))
        .unwrap();
    let events = EventLog::default();
    let stimulator = FakeStimulator::new(events.clone(), 0);
    let probes = stimulator.probes();

    let orchestrator = ExperimentOrchestrator::new(
        config,
        FakeBoard::new(events.clone()),
        stimulator,
        dir.path(),
    );
    let metadata_path = orchestrator.layout().metadata_path();
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
    });

    let result = orchestrator.run().await;
    assert!(matches!(result, Err(SyncError::Cancelled)));
    // first probe at t=0 plus one every 2 s in the watcher
    assert!(probes.load(Ordering::SeqCst) >= 15);

    assert_eq!(events.count("link open"), 0);
    assert_eq!(events.count("release"), 1);
    assert_eq!(events.count("stop_stream"), 1);

    let metadata = std::fs::read_to_string(metadata_path).unwrap();
    assert!(metadata.contains("Run aborted: Operation cancelled"));
}

#[tokio::test(start_paused = true)]
async fn test_connect_deadline_gives_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig::from_documents(&measurement_yaml(1, 0), &device_yaml(false))
        .unwrap();
    let events = EventLog::default();

    let result = ExperimentOrchestrator::new(
        config,
        FakeBoard::new(events.clone()),
        FakeStimulator::new(events.clone(), 0),
        dir.path(),
    )
    .with_timing(ExperimentTiming {
        connect_deadline: Some(Duration::from_secs(5)),
        ..ExperimentTiming::default()
    })
    .run()
    .await;

    let err = result.unwrap_err();
    assert!(matches!(err, SyncError::DeviceNotReady(_)));
    assert!(err.is_retryable());
    assert_eq!(events.count("release"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_mid_cycle_stops_stimulator_and_releases_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig::from_documents(&measurement_yaml(2, 0), &device_yaml(false))
        .unwrap();
    let ts = config.timestamp();
    let events = EventLog::default();

    let orchestrator = ExperimentOrchestrator::new(
        config,
        // the OFF marker of the first cycle fails while the stimulator runs
        FakeBoard::new(events.clone()).failing_on_marker(2),
        FakeStimulator::new(events.clone(), 1),
        dir.path(),
    );
    let metadata_path = orchestrator.layout().metadata_path();

    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(err, SyncError::Session(_)));

    let f10 = format!("{}_SYNTHETIC_BOARD_c1_f10_v50.csv", ts);
    let log = events.snapshot();
    let tail: Vec<String> = log[log.len() - 7..].to_vec();
    assert_eq!(
        tail,
        vec![
            "marker 1".to_string(),
            "vhp 1".to_string(),
            "vhp 0".to_string(),
            "vhp close".to_string(),
            "stop_stream".to_string(),
            format!("delete_streamer {}", f10),
            "release".to_string(),
        ]
    );
    assert_eq!(events.count("release"), 1);

    let metadata = std::fs::read_to_string(metadata_path).unwrap();
    assert!(metadata.contains("Run aborted: Acquisition session error: board disconnected"));
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_polls_during_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig::from_documents(&measurement_yaml(2, 0), &device_yaml(true))
        .unwrap();
    let events = EventLog::default();
    let board = FakeBoard::new(events.clone());
    let polls = board.polls();

    ExperimentOrchestrator::new(config, board, FakeStimulator::new(events.clone(), 1), dir.path())
        .run()
        .await
        .unwrap();

    // 6 s of sweep at a 1 s interval
    assert!(polls.load(Ordering::SeqCst) >= 5);
    assert_eq!(events.count("release"), 1);
}
