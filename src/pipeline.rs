//! Detection pipeline: pulls fixes from a source, judges each one against the
//! last trusted fix, corrects it, and fans the result out to consumers.
//!
//! One pipeline owns one `PathCorrector`. Fixes are processed strictly in
//! arrival order on the calling thread; track several platforms with several
//! pipelines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{IntervalPolicy, TrackerConfig};
use crate::consumers::FixConsumer;
use crate::correction::{CorrectionOutcome, ImuCorrelator, PathCorrector, TrackEvent};
use crate::detectors::VelocityAnomalyDetector;
use crate::error::{SourceError, TrackerError, TrackerResult};
use crate::sources::{FixSource, ImuSource, NoImu};
use crate::types::{Fix, ImuSample};

const PROGRESS_EVERY: u64 = 50;

/// Cooperative stop signal, checked between fixes.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    SourceExhausted,
    StopRequested,
    TrackingDegraded,
}

/// Totals for one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub fixes: u64,
    pub trusted: u64,
    pub spoofed: u64,
    /// Fixes whose output was propagated instead of taken from GPS.
    pub replaced: u64,
    /// Fixes dropped for a non-advancing timestamp or invalid contents.
    pub skipped: u64,
    pub reintegrations: u64,
    pub reintegration_rejections: u64,
    pub degraded_reports: u64,
    pub imu_rejections: u64,
    pub max_propagation_error_m: f64,
    pub stop_reason: StopReason,
}

impl RunSummary {
    fn record(&mut self, outcome: &CorrectionOutcome) {
        let fix = &outcome.fix;
        self.fixes += 1;
        if fix.verdict.is_spoofed() {
            self.spoofed += 1;
        } else {
            self.trusted += 1;
        }
        if fix.is_replaced() {
            self.replaced += 1;
        }
        self.max_propagation_error_m = self.max_propagation_error_m.max(fix.propagation_error_m);
        for event in &outcome.events {
            match event {
                TrackEvent::ImuSampleRejected { .. } => self.imu_rejections += 1,
                TrackEvent::TrackingDegraded { .. } => self.degraded_reports += 1,
                TrackEvent::Reintegrated { .. } => self.reintegrations += 1,
                TrackEvent::ReintegrationRejected { .. } => self.reintegration_rejections += 1,
            }
        }
    }
}

pub struct DetectionPipeline<F, I = NoImu> {
    config: TrackerConfig,
    detector: VelocityAnomalyDetector,
    corrector: PathCorrector,
    correlator: ImuCorrelator,
    fixes: F,
    imu: I,
    imu_exhausted: bool,
    consumers: Vec<Box<dyn FixConsumer>>,
    stop: StopHandle,
    summary: RunSummary,
}

impl<F: FixSource> DetectionPipeline<F, NoImu> {
    pub fn new(config: TrackerConfig, fixes: F) -> TrackerResult<Self> {
        Self::with_imu(config, fixes, NoImu)
    }
}

impl<F: FixSource, I: ImuSource> DetectionPipeline<F, I> {
    pub fn with_imu(config: TrackerConfig, fixes: F, imu: I) -> TrackerResult<Self> {
        config.validate()?;
        Ok(Self {
            detector: VelocityAnomalyDetector::new(config.threshold_mps),
            corrector: PathCorrector::new(&config),
            correlator: ImuCorrelator::new(config.imu_max_sample_age_s),
            config,
            fixes,
            imu,
            imu_exhausted: false,
            consumers: Vec::new(),
            stop: StopHandle::new(),
            summary: RunSummary::default(),
        })
    }

    pub fn add_consumer<C: FixConsumer + 'static>(&mut self, consumer: C) -> &mut Self {
        self.consumers.push(Box::new(consumer));
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn corrector(&self) -> &PathCorrector {
        &self.corrector
    }

    /// Bias-calibrate the IMU from samples taken while stationary.
    pub fn calibrate_imu(&mut self, stationary: &[ImuSample]) -> bool {
        self.corrector.imu_manager_mut().calibrate(stationary)
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Process fixes until the source is exhausted or a stop is requested.
    ///
    /// Source errors other than exhaustion, and interval errors under the
    /// `abort` policy, end the run with an error. Consumers are finished
    /// either way.
    pub fn run(&mut self) -> TrackerResult<RunSummary> {
        let result = self.run_inner();
        for consumer in &mut self.consumers {
            consumer.finish();
        }

        let summary = result?;
        log::info!(
            "Run finished ({:?}): {} fixes, {} spoofed, {} replaced, {} skipped, {} reintegrations, {} degraded reports",
            summary.stop_reason,
            summary.fixes,
            summary.spoofed,
            summary.replaced,
            summary.skipped,
            summary.reintegrations,
            summary.degraded_reports
        );
        Ok(summary)
    }

    fn run_inner(&mut self) -> TrackerResult<RunSummary> {
        let reason = loop {
            if self.stop.is_stopped() {
                break StopReason::StopRequested;
            }

            let fix = match self.fixes.next_fix() {
                Ok(fix) => fix,
                Err(SourceError::Exhausted) => break StopReason::SourceExhausted,
                Err(e) => {
                    log::error!("Fix source failed: {}", e);
                    return Err(e.into());
                }
            };

            match self.process(&fix) {
                Ok(outcome) => {
                    if outcome.is_degraded() && self.config.stop_on_degraded {
                        break StopReason::TrackingDegraded;
                    }
                }
                Err(e @ (TrackerError::InvalidInterval { .. } | TrackerError::InvalidFix(_))) => {
                    match self.config.invalid_interval_policy {
                        IntervalPolicy::Skip => {
                            log::warn!("Skipping fix: {}", e);
                            self.summary.skipped += 1;
                        }
                        IntervalPolicy::Abort => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        };

        self.summary.stop_reason = reason;
        Ok(self.summary.clone())
    }

    /// Detect, correct and publish a single fix.
    pub fn process(&mut self, fix: &Fix) -> TrackerResult<CorrectionOutcome> {
        let fix = fix.validated()?;
        let state = self.corrector.state();
        if let Some(last) = state.last_output() {
            if fix.timestamp <= last.timestamp {
                return Err(TrackerError::InvalidInterval {
                    previous: last.timestamp,
                    current: fix.timestamp,
                });
            }
        }

        let verdict = self.detector.detect(state.last_trusted_fix(), &fix)?;
        let samples = self.collect_imu(fix.timestamp)?;
        let outcome = self.corrector.correct(&fix, verdict, &samples)?;

        self.report(&outcome);
        self.summary.record(&outcome);
        for consumer in &mut self.consumers {
            consumer.consume(&outcome.fix);
            for event in &outcome.events {
                consumer.on_event(event);
            }
        }

        if self.summary.fixes % PROGRESS_EVERY == 0 {
            log::info!(
                "Processed {} fixes ({} spoofed, mode {:?}, error bound {:.1} m)",
                self.summary.fixes,
                self.summary.spoofed,
                outcome.fix.mode,
                outcome.fix.propagation_error_m
            );
        }
        Ok(outcome)
    }

    /// Pull IMU samples up to `timestamp` and return those correlated with it.
    fn collect_imu(&mut self, timestamp: f64) -> TrackerResult<Vec<ImuSample>> {
        while !self.imu_exhausted
            && self
                .correlator
                .latest_timestamp()
                .map_or(true, |latest| latest <= timestamp)
        {
            match self.imu.poll_sample() {
                Ok(Some(sample)) => {
                    self.correlator.push(sample);
                }
                Ok(None) => break,
                Err(SourceError::Exhausted) => self.imu_exhausted = true,
                Err(e) => {
                    log::error!("IMU source failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Ok(self.correlator.samples_for(timestamp))
    }

    fn report(&self, outcome: &CorrectionOutcome) {
        let fix = &outcome.fix;
        if fix.verdict.is_spoofed() {
            log::warn!(
                "Spoofing detected at t={:.1}s ({:.6}, {:.6}), output via {:?}",
                fix.raw.timestamp,
                fix.raw.latitude,
                fix.raw.longitude,
                fix.method
            );
        }
        for event in &outcome.events {
            match event {
                TrackEvent::Reintegrated {
                    timestamp,
                    offset_m,
                    outage_s,
                } => log::info!(
                    "GPS reintegrated at t={:.1}s after {:.1}s, offset {:.1} m",
                    timestamp,
                    outage_s,
                    offset_m
                ),
                TrackEvent::ReintegrationRejected {
                    timestamp,
                    offset_m,
                    bound_m,
                } => log::warn!(
                    "Reintegration rejected at t={:.1}s: {:.1} m from track (bound {:.1} m)",
                    timestamp,
                    offset_m,
                    bound_m
                ),
                TrackEvent::ImuSampleRejected {
                    timestamp,
                    displacement_m,
                    bound_m,
                } => log::warn!(
                    "IMU sample at t={:.2}s rejected: {:.1} m > {:.1} m, dead reckoning instead",
                    timestamp,
                    displacement_m,
                    bound_m
                ),
                TrackEvent::TrackingDegraded {
                    timestamp,
                    reason,
                    consecutive_spoofed,
                    propagation_error_m,
                } => log::warn!(
                    "Tracking degraded at t={:.1}s ({:?}): {} consecutive spoofed, error bound {:.1} m",
                    timestamp,
                    reason,
                    consecutive_spoofed,
                    propagation_error_m
                ),
            }
        }
    }
}
