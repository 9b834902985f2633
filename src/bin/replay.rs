use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use gps_spoof_rs::consumers::{JsonLinesRecorder, MemoryRecorder};
use gps_spoof_rs::geo_math::distance;
use gps_spoof_rs::sources::{NoImu, RecordedLog};
use gps_spoof_rs::{DetectionPipeline, TrackerConfig};

#[derive(Parser, Debug)]
struct Args {
    /// Path to comparison_*.json[.gz] session log, *.jsonl[.gz] fix stream or *.csv[.gz] fix table
    #[arg(long, conflicts_with = "golden_dir")]
    log: Option<PathBuf>,

    /// Directory of golden logs to batch replay
    #[arg(long)]
    golden_dir: Option<PathBuf>,

    /// JSON config file; missing keys take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the plausible speed threshold (m/s)
    #[arg(long)]
    threshold: Option<f64>,

    /// Override the reintegration plausibility bound (meters)
    #[arg(long)]
    reintegration_bound: Option<f64>,

    /// Ignore IMU readings in the log (dead reckoning only)
    #[arg(long, default_value_t = false)]
    no_imu: bool,

    /// Leading IMU samples in the log used for bias calibration (0 disables)
    #[arg(long, default_value = "10")]
    calibration_samples: usize,

    /// Write each corrected track as <log stem>.corrected.jsonl into this directory
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn is_replayable(name: &str) -> bool {
    (name.starts_with("comparison_") && (name.ends_with(".json") || name.ends_with(".json.gz")))
        || name.ends_with(".jsonl")
        || name.ends_with(".jsonl.gz")
        || name.ends_with(".csv")
        || name.ends_with(".csv.gz")
}

fn track_path(dir: &Path, log: &Path) -> PathBuf {
    let name = log
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("replay");
    let stem = name
        .trim_end_matches(".gz")
        .trim_end_matches(".csv")
        .trim_end_matches(".jsonl")
        .trim_end_matches(".json");
    dir.join(format!("{}.corrected.jsonl", stem))
}

fn run_once(path: &Path, args: &Args, config: &TrackerConfig) -> anyhow::Result<serde_json::Value> {
    let recorded = RecordedLog::load(path)?;
    let skipped_on_load = recorded.skipped();
    let imu_samples = if args.no_imu { 0 } else { recorded.imu().len() };
    let calibration = if args.no_imu {
        Vec::new()
    } else {
        recorded.leading_imu(args.calibration_samples).to_vec()
    };
    let (fixes, imu) = recorded.into_sources();

    let recorder = MemoryRecorder::new();
    let summary = if args.no_imu {
        let mut pipeline = DetectionPipeline::with_imu(config.clone(), fixes, NoImu)?;
        pipeline.add_consumer(recorder.clone());
        if let Some(dir) = args.output_dir.as_ref() {
            pipeline.add_consumer(JsonLinesRecorder::create(track_path(dir, path))?);
        }
        pipeline.run()?
    } else {
        let mut pipeline = DetectionPipeline::with_imu(config.clone(), fixes, imu)?;
        pipeline.calibrate_imu(&calibration);
        pipeline.add_consumer(recorder.clone());
        if let Some(dir) = args.output_dir.as_ref() {
            pipeline.add_consumer(JsonLinesRecorder::create(track_path(dir, path))?);
        }
        pipeline.run()?
    };

    // How far the corrected track strays from raw GPS while replacing it.
    let corrected = recorder.fixes();
    let max_offset = corrected
        .iter()
        .filter(|f| f.is_replaced())
        .map(|f| distance(&f.raw, &f.output))
        .fold(0.0_f64, f64::max);
    let min_confidence = corrected
        .iter()
        .map(|f| f.confidence)
        .fold(1.0_f64, f64::min);

    Ok(json!({
        "log": path.display().to_string(),
        "threshold_mps": config.threshold_mps,
        "reintegration_bound_m": config.reintegration_plausibility_bound_m,
        "imu_samples": imu_samples,
        "calibration_samples": calibration.len(),
        "skipped_on_load": skipped_on_load,
        "summary": summary,
        "max_replaced_offset_m": max_offset,
        "min_confidence": min_confidence,
    }))
}

fn main() -> anyhow::Result<()> {
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
    if let Some(bound) = args.reintegration_bound {
        config.reintegration_plausibility_bound_m = bound;
    }
    config.validate()?;

    if let Some(dir) = args.output_dir.as_ref() {
        std::fs::create_dir_all(dir)?;
    }

    let mut results = Vec::new();
    if let Some(dir) = args.golden_dir.as_ref() {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if path.is_file() && is_replayable(name) {
                paths.push(path);
            }
        }
        paths.sort();
        for path in paths {
            match run_once(&path, &args, &config) {
                Ok(res) => results.push(res),
                Err(e) => log::error!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &args, &config)?);
    } else {
        anyhow::bail!("Provide --log or --golden-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replayable_names() {
        assert!(is_replayable("comparison_20250101.json.gz"));
        assert!(is_replayable("drive.jsonl"));
        assert!(is_replayable("drive.csv"));
        assert!(is_replayable("drive.csv.gz"));
        assert!(!is_replayable("notes.json"));
    }

    #[test]
    fn test_track_path_strips_extensions() {
        let dir = Path::new("/tmp/out");
        assert_eq!(
            track_path(dir, Path::new("/logs/drive.csv.gz")),
            dir.join("drive.corrected.jsonl")
        );
        assert_eq!(
            track_path(dir, Path::new("comparison_1.json")),
            dir.join("comparison_1.corrected.jsonl")
        );
    }

    #[test]
    fn test_calibration_flag_defaults() {
        let args = Args::parse_from(["replay", "--log", "drive.csv"]);
        assert_eq!(args.calibration_samples, 10);
        let args = Args::parse_from(["replay", "--log", "drive.csv", "--calibration-samples", "0"]);
        assert_eq!(args.calibration_samples, 0);
    }
}
