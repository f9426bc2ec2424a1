//! Backup scenarios: scan selection, acknowledgement and purge through the
//! in-process transfer link

mod common;

use std::sync::Arc;

use common::{heartrate_batch, Rig, NOON};
use wearlog_core::backup::{BackupScanner, DEFAULT_BACKUP_PERIOD_MS};
use wearlog_core::config::PipelineConfig;
use wearlog_core::hooks::HookEvent;
use wearlog_core::pipeline::DevicePipeline;
use wearlog_core::store::{LogStore, ACK_SUFFIX};
use wearlog_core::transfer::{DeliveryState, Inbox, TransferEvent, TransferState};
use wearlog_core::{SensorKind, Settings};

const FIRST: &str = "heartrate_20240101-120000.log.csv";
const SECOND: &str = "heartrate_20240101-120530.log.csv";

fn scanner(rig: &Rig) -> BackupScanner {
    BackupScanner::new(rig.root(), DEFAULT_BACKUP_PERIOD_MS, Box::new(rig.link.clone()))
        .with_hooks(Box::new(rig.hooks.clone()))
}

#[test]
fn only_the_older_of_two_rotated_files_is_sent() {
    let rig = Rig::new(90);
    rig.touch(FIRST, "timestamp;sensor;data\n");
    rig.touch(SECOND, "timestamp;sensor;data\n");
    let mut scanner = scanner(&rig);

    assert_eq!(scanner.backup_to_companion(false), vec![FIRST.to_string()]);
    assert_eq!(rig.link.queued(), vec![FIRST.to_string()]);
    assert_eq!(rig.hooks.events(), vec![HookEvent::Backup]);
}

#[test]
fn repeated_scans_enqueue_the_same_set() {
    let rig = Rig::new(90);
    for name in [FIRST, SECOND, "heartrate_20240101-121000.log.csv"] {
        rig.touch(name, "timestamp;sensor;data\n");
    }
    let mut scanner = scanner(&rig);

    let first = scanner.backup_to_companion(false);
    let second = scanner.backup_to_companion(false);
    assert_eq!(first, vec![FIRST.to_string(), SECOND.to_string()]);
    assert_eq!(first, second);
    assert_eq!(rig.link.queued().len(), 2);
}

#[test]
fn acknowledgement_follows_transferred_event_only() {
    let rig = Rig::new(90);
    rig.touch(FIRST, "timestamp;sensor;data\n1704110400000;HRTR;61\n");
    rig.touch(SECOND, "timestamp;sensor;data\n");
    let mut scanner = scanner(&rig);
    let mut companion = rig.link.clone();
    let acked = format!("{FIRST}.{ACK_SUFFIX}");

    scanner.backup_to_companion(false);
    scanner.drain_transfer_events();
    assert!(!rig.root().join(&acked).exists());

    let file = companion.pop().unwrap();
    assert_eq!(file.name, FIRST);
    assert_eq!(file.bytes, b"timestamp;sensor;data\n1704110400000;HRTR;61\n");
    scanner.drain_transfer_events();
    assert!(!rig.root().join(&acked).exists());
    assert_eq!(scanner.state(FIRST), Some(TransferState::InFlight));

    // an event for another file does not touch this one
    scanner
        .handle_transfer_event(&TransferEvent::new(SECOND, DeliveryState::Transferred))
        .unwrap();
    assert!(rig.root().join(FIRST).exists());

    companion.report(FIRST, DeliveryState::Transferred).unwrap();
    assert_eq!(scanner.drain_transfer_events(), 1);
    assert!(rig.root().join(&acked).exists());
    assert!(!rig.root().join(FIRST).exists());
}

#[test]
fn upload_failure_keeps_file_pending_for_next_scan() {
    let rig = Rig::new(90);
    rig.touch(FIRST, "timestamp;sensor;data\n");
    rig.touch(SECOND, "timestamp;sensor;data\n");
    let mut scanner = scanner(&rig);
    let mut companion = rig.link.clone();

    scanner.backup_to_companion(false);
    let file = companion.pop().unwrap();
    companion.report(&file.name, DeliveryState::Error).unwrap();
    assert_eq!(scanner.drain_transfer_events(), 0);
    assert_eq!(scanner.state(FIRST), Some(TransferState::Pending));
    assert!(rig.root().join(FIRST).exists());

    assert_eq!(scanner.backup_to_companion(false), vec![FIRST.to_string()]);
    assert_eq!(scanner.state(FIRST), Some(TransferState::InFlight));
}

#[test]
fn purge_leaves_pending_and_foreign_files() {
    let rig = Rig::new(90);
    let acked = format!("{FIRST}.{ACK_SUFFIX}");
    rig.touch(&acked, "done");
    rig.touch(SECOND, "pending");
    rig.touch("settings.json", "{}");
    rig.touch("backd", "not an acknowledged log");
    let mut scanner = scanner(&rig);

    assert_eq!(scanner.delete_backed_up_files(), 1);
    assert_eq!(
        rig.all_files(),
        vec![
            "backd".to_string(),
            SECOND.to_string(),
            "settings.json".to_string()
        ]
    );
}

#[test]
fn rotated_capture_flows_to_acknowledgement_through_the_pipeline() {
    let rig = Rig::new(90);
    let mut settings = Settings::default();
    settings
        .apply("logheartrate", serde_json::json!(true))
        .unwrap();

    let mut config = PipelineConfig::new(rig.root());
    config.store = rig.store_config().file_size_limit(200);
    let mut pipeline = DevicePipeline::builder(
        config,
        Arc::new(rig.clock.clone()),
        Box::new(rig.battery.clone()),
        Box::new(rig.backend.clone()),
        Box::new(rig.link.clone()),
    )
    .settings(settings)
    .build();

    assert_eq!(pipeline.start(), Ok(1));
    let handle = rig.backend.handle(SensorKind::HeartRate).unwrap();

    // two batches of ~650 bytes each force one rotation
    for _ in 0..2 {
        rig.clock.advance(20_000);
        handle.deliver(heartrate_batch(30, 1_000));
        pipeline.turn();
    }
    assert_eq!(rig.log_files().len(), 2);
    assert_eq!(pipeline.metrics().batches_written, 2);

    rig.clock.set(NOON + DEFAULT_BACKUP_PERIOD_MS);
    let report = pipeline.turn();
    assert_eq!(report.files_enqueued, Some(1));

    let mut companion = rig.link.clone();
    let file = companion.pop().unwrap();
    assert_eq!(file.name, FIRST);
    companion.report(&file.name, DeliveryState::Transferred).unwrap();

    assert_eq!(pipeline.turn().files_acknowledged, 1);
    assert!(rig.root().join(format!("{FIRST}.{ACK_SUFFIX}")).exists());

    pipeline.stop();
    assert!(!rig.root().join(format!("{FIRST}.{ACK_SUFFIX}")).exists());
    assert_eq!(rig.log_files().len(), 1);
    assert!(!pipeline.scanner().timer().is_armed());
}

#[test]
fn newest_file_is_never_renamed_while_receiving_appends() {
    let rig = Rig::new(90);
    let mut store = LogStore::open("heartrate", rig.store_config(), Arc::new(rig.clock.clone()));
    let mut scanner = scanner(&rig);

    store.append("1704110400000;HRTR;61\n").unwrap();
    assert!(scanner.backup_to_companion(false).is_empty());

    store.append("1704110401000;HRTR;62\n").unwrap();
    assert_eq!(rig.log_files(), vec![FIRST.to_string()]);
}
