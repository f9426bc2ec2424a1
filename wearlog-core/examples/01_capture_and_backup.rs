//! Capture and Backup Example
//!
//! Drives the device pipeline on a simulated clock: one heart-rate sensor
//! fills a small log file until it rotates, the backup scan queues the closed
//! file, a stand-in companion acknowledges it, and stopping capture purges it.
//!
//! ## Running the Example
//!
//! ```bash
//! cargo run --example 01_capture_and_backup
//! ```

use std::sync::Arc;

use serde_json::json;
use wearlog_core::backup::DEFAULT_BACKUP_PERIOD_MS;
use wearlog_core::format::ReadingBatch;
use wearlog_core::store::{is_acknowledged, is_log_file, list_files};
use wearlog_core::{
    DeliveryState, DevicePipeline, Inbox, LocalLink, MockTimeSource, PipelineConfig, SensorKind,
    Settings, SimulatedBackend, SimulatedBattery,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("WearLog Capture and Backup Example");
    println!("==================================\n");

    let dir = tempfile::tempdir()?;
    let clock = MockTimeSource::new(1_704_110_400_000);
    let backend = SimulatedBackend::new();
    let link = LocalLink::new();

    let mut settings = Settings::default();
    settings.apply("logheartrate", json!(true))?;

    // Tiny files so a couple of batches force a rotation
    let mut config = PipelineConfig::new(dir.path());
    config.store = config.store.file_size_limit(256);

    let mut pipeline = DevicePipeline::builder(
        config,
        Arc::new(clock.clone()),
        Box::new(SimulatedBattery::new(80, false)),
        Box::new(backend.clone()),
        Box::new(link.clone()),
    )
    .settings(settings)
    .build();

    let started = pipeline.start()?;
    println!("Sensors started: {}", started);

    let heart = backend
        .handle(SensorKind::HeartRate)
        .ok_or("heart rate sensor missing")?;

    for round in 0..3 {
        clock.advance(20_000);
        let mut batch = ReadingBatch::new();
        for i in 0..20u64 {
            batch.push(i * 1_000, &[60.0 + (round * 20 + i) as f32 % 40.0]);
        }
        heart.deliver(batch);
        let report = pipeline.turn();
        println!("  round {}: {} batch written", round, report.batches_written);
    }

    println!("\nLog files on the device:");
    for name in list_files(dir.path(), is_log_file)? {
        println!("  {}", name);
    }

    clock.advance(DEFAULT_BACKUP_PERIOD_MS);
    let report = pipeline.turn();
    println!("\nBackup scan queued {} file(s)", report.files_enqueued.unwrap_or(0));

    // Companion side: upload is simulated, every file succeeds
    let mut companion = link.clone();
    while let Some(file) = companion.pop() {
        println!("  companion received {} ({} bytes)", file.name, file.bytes.len());
        companion.report(&file.name, DeliveryState::Transferred)?;
    }

    let report = pipeline.turn();
    println!("Acknowledged: {}", report.files_acknowledged);
    println!(
        "Marked as transferred: {:?}",
        list_files(dir.path(), is_acknowledged)?
    );

    pipeline.stop();
    println!("\nAfter stop: {:?}", list_files(dir.path(), |_| true)?);
    println!("Metrics: {:?}", pipeline.metrics());

    Ok(())
}
