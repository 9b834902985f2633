use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use gps_spoof_rs::consumers::{JsonLinesRecorder, LiveStatusWriter, LogConsumer, QueuedConsumer};
use gps_spoof_rs::sources::simulated::{self, Scenario};
use gps_spoof_rs::sources::{ChannelFixSource, ChannelImuSource};
use gps_spoof_rs::{DetectionPipeline, RunSummary, StopHandle, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "spoof_tracker")]
#[command(about = "GPS spoofing detection and path correction over a simulated feed", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// JSON config file; missing keys take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the plausible speed threshold (m/s)
    #[arg(long)]
    threshold: Option<f64>,

    /// Override the magnetic declination (degrees, east positive)
    #[arg(long)]
    declination: Option<f64>,

    /// Stop at the first degraded report
    #[arg(long)]
    stop_on_degraded: bool,

    /// Disable the simulated IMU stream (dead reckoning only)
    #[arg(long)]
    no_imu: bool,

    /// IMU samples used for bias calibration at startup
    #[arg(long, default_value = "10")]
    calibration_samples: usize,

    /// Spoofing period in fixes (0 disables spoofing)
    #[arg(long, default_value = "20")]
    spoof_every: u64,

    /// Spoofed fixes per period
    #[arg(long, default_value = "3")]
    spoof_length: u64,

    /// Size of the injected jump (degrees)
    #[arg(long, default_value = "0.01")]
    spoof_magnitude: f64,

    /// Output directory
    #[arg(long, default_value = "spoof_tracker_sessions")]
    output_dir: String,
}

#[derive(Serialize)]
struct SessionOutput<'a> {
    started: String,
    config: &'a TrackerConfig,
    summary: &'a RunSummary,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Some(threshold) = args.threshold {
        config.threshold_mps = threshold;
    }
    if let Some(declination) = args.declination {
        config.magnetic_declination_deg = declination;
    }
    config.stop_on_degraded |= args.stop_on_degraded;
    config.validate()?;

    log::info!("[{}] Spoof tracker starting", ts_now());
    log::info!("  Duration: {} seconds (0=continuous)", args.duration);
    log::info!("  Threshold: {:.1} m/s", config.threshold_mps);
    log::info!("  IMU: {}", if args.no_imu { "disabled" } else { "enabled" });
    log::info!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;
    let started = ts_now_clean();

    let scenario = Scenario {
        spoof_every: args.spoof_every,
        spoof_length: args.spoof_length,
        spoof_magnitude_deg: args.spoof_magnitude,
        ..Scenario::default()
    };

    let stop = StopHandle::new();
    let (gps_tx, gps_rx) = mpsc::channel(100);
    let (imu_tx, mut imu_rx) = mpsc::channel(500);

    let _gps_handle = tokio::spawn(simulated::gps_loop(gps_tx, scenario.clone(), stop.clone()));
    if !args.no_imu {
        tokio::spawn(simulated::imu_loop(imu_tx, scenario, stop.clone()));
    } else {
        drop(imu_tx);
    }

    let mut calibration = Vec::with_capacity(args.calibration_samples);
    if !args.no_imu {
        log::info!("Calibrating IMU bias ({} samples)...", args.calibration_samples);
        while calibration.len() < args.calibration_samples {
            match imu_rx.recv().await {
                Some(sample) => calibration.push(sample),
                None => break,
            }
        }
    }

    let mut pipeline = DetectionPipeline::with_imu(
        config.clone(),
        ChannelFixSource::new(gps_rx),
        ChannelImuSource::new(imu_rx),
    )?
    .with_stop_handle(stop.clone());
    pipeline.calibrate_imu(&calibration);

    let track_path = format!("{}/track_{}.jsonl", args.output_dir, started);
    pipeline
        .add_consumer(LogConsumer)
        .add_consumer(LiveStatusWriter::new(
            format!("{}/live_status.json", args.output_dir),
            2,
        ))
        .add_consumer(QueuedConsumer::spawn(JsonLinesRecorder::create(&track_path)?, 1024));

    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("[{}] Ctrl-C received, stopping...", ts_now());
            ctrl_c_stop.stop();
        }
    });
    if args.duration > 0 {
        let timer_stop = stop.clone();
        let duration = args.duration;
        tokio::spawn(async move {
            sleep(Duration::from_secs(duration)).await;
            log::info!("[{}] Duration reached, stopping...", ts_now());
            timer_stop.stop();
        });
    }

    let summary = tokio::task::spawn_blocking(move || pipeline.run()).await??;
    stop.stop();

    let output = SessionOutput {
        started: started.clone(),
        config: &config,
        summary: &summary,
    };
    let filename = format!("{}/session_{}.json", args.output_dir, started);
    std::fs::write(&filename, serde_json::to_string_pretty(&output)?)?;
    log::info!("[{}] Track written to {}, summary to {}", ts_now(), track_path, filename);

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
