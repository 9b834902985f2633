use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::consumers::FixConsumer;
use crate::correction::TrackEvent;
use crate::types::{CorrectedFix, CorrectionMethod, TrackMode};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub fixes_processed: u64,
    pub trusted_fixes: u64,
    pub spoofed_fixes: u64,
    pub mode: TrackMode,
    pub method: Option<CorrectionMethod>,
    pub confidence: f64,
    pub propagation_error_m: f64,
    // Latest output position
    pub lat: f64,
    pub lon: f64,
    pub speed: f64,
    pub heading_deg: f64,
    // Episode tracking
    pub degraded: bool,
    pub degraded_reports: u64,
    pub reintegrations: u64,
    pub imu_rejections: u64,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            fixes_processed: 0,
            trusted_fixes: 0,
            spoofed_fixes: 0,
            mode: TrackMode::GpsTrusted,
            method: None,
            confidence: 1.0,
            propagation_error_m: 0.0,
            lat: 0.0,
            lon: 0.0,
            speed: 0.0,
            heading_deg: 0.0,
            degraded: false,
            degraded_reports: 0,
            reintegrations: 0,
            imu_rejections: 0,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    fn apply(&mut self, fix: &CorrectedFix) {
        self.fixes_processed += 1;
        if fix.verdict.is_spoofed() {
            self.spoofed_fixes += 1;
        } else {
            self.trusted_fixes += 1;
        }
        self.mode = fix.mode;
        self.method = Some(fix.method);
        self.confidence = fix.confidence;
        self.propagation_error_m = fix.propagation_error_m;
        self.lat = fix.output.latitude;
        self.lon = fix.output.longitude;
        self.speed = fix.output.speed.unwrap_or(0.0);
        self.heading_deg = fix.output.heading.unwrap_or(0.0);
        if !fix.mode.is_degraded() {
            self.degraded = false;
        }
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically snapshots the tracker status to a JSON file.
pub struct LiveStatusWriter {
    path: PathBuf,
    status: LiveStatus,
    start: DateTime<Utc>,
    last_write: Option<DateTime<Utc>>,
    min_interval_secs: i64,
}

impl LiveStatusWriter {
    pub fn new<P: Into<PathBuf>>(path: P, min_interval_secs: i64) -> Self {
        Self {
            path: path.into(),
            status: LiveStatus::new(),
            start: Utc::now(),
            last_write: None,
            min_interval_secs: min_interval_secs.max(0),
        }
    }

    pub fn status(&self) -> &LiveStatus {
        &self.status
    }

    fn write(&mut self, now: DateTime<Utc>) {
        self.status.timestamp = current_timestamp();
        self.status.uptime_seconds = now.signed_duration_since(self.start).num_seconds().max(0) as u64;
        if let Err(e) = self.status.save(&self.path) {
            log::warn!("Failed to write {}: {}", self.path.display(), e);
        }
        self.last_write = Some(now);
    }
}

impl FixConsumer for LiveStatusWriter {
    fn consume(&mut self, fix: &CorrectedFix) {
        self.status.apply(fix);

        let now = Utc::now();
        let due = self
            .last_write
            .map_or(true, |last| now.signed_duration_since(last).num_seconds() >= self.min_interval_secs);
        if due {
            self.write(now);
        }
    }

    fn on_event(&mut self, event: &TrackEvent) {
        match event {
            TrackEvent::TrackingDegraded { .. } => {
                self.status.degraded = true;
                self.status.degraded_reports += 1;
            }
            TrackEvent::Reintegrated { .. } => self.status.reintegrations += 1,
            TrackEvent::ImuSampleRejected { .. } => self.status.imu_rejections += 1,
            TrackEvent::ReintegrationRejected { .. } => {}
        }
    }

    fn finish(&mut self) {
        self.write(Utc::now());
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
