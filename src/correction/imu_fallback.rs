//! Inertially-aided propagation used while GPS is untrusted.
//!
//! The IMU refines the dead-reckoning motion estimate: the most recent
//! sample's horizontal acceleration (declination-corrected) is integrated
//! over the step, and its yaw rate turns the heading. A step whose
//! double-integrated displacement is implausible is rejected so the caller
//! can fall back to pure dead reckoning.

use std::collections::VecDeque;

use crate::config::TrackerConfig;
use crate::correction::dead_reckoner::MotionEstimate;
use crate::error::{TrackerError, TrackerResult};
use crate::geo_math::project;
use crate::types::{
    bearing_of, declination_rotation, horizontal, unit_from_bearing, Fix, ImuSample, Vec3,
    AXIS_UP,
};

const MIN_MOTION_MPS: f64 = 1e-6;

/// Output of one IMU-aided propagation step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImuPropagation {
    pub fix: Fix,
    /// Motion estimate to carry into the next step.
    pub motion: MotionEstimate,
    pub displacement_m: f64,
}

#[derive(Clone, Debug)]
pub struct ImuFallbackManager {
    magnetic_declination_deg: f64,
    nominal_speed_mps: f64,
    displacement_factor: f64,
    max_speed_mps: f64,
    drift_rate_mps: f64,
    error_scale: f64,
    max_propagation_error_m: f64,
    accel_bias: Vec3,
    gyro_bias: Vec3,
}

impl ImuFallbackManager {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            magnetic_declination_deg: config.magnetic_declination_deg,
            nominal_speed_mps: config.nominal_speed_mps,
            displacement_factor: config.imu_displacement_factor,
            max_speed_mps: config.threshold_mps,
            drift_rate_mps: config.drift_rate_mps,
            error_scale: config.imu_error_scale,
            max_propagation_error_m: config.max_propagation_error_m,
            accel_bias: Vec3::zeros(),
            gyro_bias: Vec3::zeros(),
        }
    }

    /// Estimate accelerometer and gyro bias from samples taken while stationary.
    ///
    /// Non-finite samples are ignored. Returns false (bias unchanged) when no
    /// usable samples are given.
    pub fn calibrate(&mut self, stationary: &[ImuSample]) -> bool {
        let usable: Vec<&ImuSample> = stationary.iter().filter(|s| s.is_finite()).collect();
        if usable.is_empty() {
            return false;
        }
        let n = usable.len() as f64;
        let (accel_sum, gyro_sum) = usable.iter().fold(
            (Vec3::zeros(), Vec3::zeros()),
            |(accel, gyro), s| (accel + s.acceleration, gyro + s.angular_rate),
        );
        self.accel_bias = accel_sum / n;
        self.gyro_bias = gyro_sum / n;
        log::info!(
            "IMU bias calibrated from {} samples: accel [{:.3}, {:.3}, {:.3}] m/s², gyro [{:.4}, {:.4}, {:.4}] rad/s",
            usable.len(),
            self.accel_bias.x,
            self.accel_bias.y,
            self.accel_bias.z,
            self.gyro_bias.x,
            self.gyro_bias.y,
            self.gyro_bias.z
        );
        true
    }

    pub fn accel_bias(&self) -> &Vec3 {
        &self.accel_bias
    }

    pub fn gyro_bias(&self) -> &Vec3 {
        &self.gyro_bias
    }

    pub fn magnetic_declination_deg(&self) -> f64 {
        self.magnetic_declination_deg
    }

    /// Largest displacement a single step of `elapsed` seconds may imply.
    pub fn displacement_bound(&self, base_speed_mps: f64, elapsed: f64) -> f64 {
        let plausible = self.displacement_factor * self.nominal_speed_mps.max(base_speed_mps);
        plausible.min(self.max_speed_mps) * elapsed.max(0.0)
    }

    pub fn error_growth(&self, elapsed: f64) -> f64 {
        self.drift_rate_mps * self.error_scale * elapsed.max(0.0)
    }

    pub fn within_error_bound(&self, accumulated_error_m: f64) -> bool {
        accumulated_error_m <= self.max_propagation_error_m
    }

    /// Acceleration in the true-north level frame, bias removed.
    fn true_north_accel(&self, sample: &ImuSample) -> Vec3 {
        let mut accel = sample.acceleration - self.accel_bias;
        accel[AXIS_UP] = 0.0;
        declination_rotation(self.magnetic_declination_deg) * accel
    }

    /// Propagate `last_known` to `target_timestamp` using the most recent sample.
    ///
    /// `Ok(None)` means there was no sample to use. A step whose displacement
    /// exceeds `displacement_bound`, or is not finite, fails with
    /// `ImuSampleRejected`.
    pub fn correct(
        &self,
        last_known: &Fix,
        motion: MotionEstimate,
        target_timestamp: f64,
        samples: &[ImuSample],
    ) -> TrackerResult<Option<ImuPropagation>> {
        let Some(sample) = samples.last() else {
            return Ok(None);
        };

        let dt = target_timestamp - last_known.timestamp;
        if dt <= 0.0 {
            return Err(TrackerError::InvalidInterval {
                previous: last_known.timestamp,
                current: target_timestamp,
            });
        }

        let accel = horizontal(&self.true_north_accel(sample));
        let yaw_rate = sample.angular_rate[AXIS_UP] - self.gyro_bias[AXIS_UP];
        let yaw_deg = -yaw_rate.to_degrees() * dt;
        let heading = (motion.heading_deg + yaw_deg).rem_euclid(360.0);

        let v0 = unit_from_bearing(heading) * motion.speed_mps;
        let v1 = v0 + accel * dt;
        let displacement = v0 * dt + accel * (0.5 * dt * dt);
        let displacement_m = displacement.norm();

        let bound_m = self.displacement_bound(motion.speed_mps, dt);
        if !displacement_m.is_finite() || displacement_m > bound_m {
            return Err(TrackerError::ImuSampleRejected {
                timestamp: sample.timestamp,
                displacement_m,
                bound_m,
            });
        }

        let next_heading = if v1.norm() > MIN_MOTION_MPS {
            bearing_of(&v1)
        } else {
            heading
        };
        let next_motion =
            MotionEstimate::new(v1.norm(), next_heading).clamped(self.max_speed_mps);

        let course = if displacement_m > MIN_MOTION_MPS {
            bearing_of(&displacement)
        } else {
            heading
        };
        let mut fix = project(last_known, course, displacement_m);
        fix.timestamp = target_timestamp;
        fix.speed = Some(next_motion.speed_mps);
        fix.heading = Some(next_motion.heading_deg);

        Ok(Some(ImuPropagation {
            fix,
            motion: next_motion,
            displacement_m,
        }))
    }
}

/// Buffers the independent IMU stream and matches samples to fixes by time.
#[derive(Clone, Debug)]
pub struct ImuCorrelator {
    buffer: VecDeque<ImuSample>,
    max_sample_age_s: f64,
    capacity: usize,
    last_fix_timestamp: Option<f64>,
}

impl ImuCorrelator {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(max_sample_age_s: f64) -> Self {
        Self {
            buffer: VecDeque::with_capacity(256),
            max_sample_age_s,
            capacity: Self::DEFAULT_CAPACITY,
            last_fix_timestamp: None,
        }
    }

    /// Add a sample. Non-finite and out-of-order samples are dropped.
    pub fn push(&mut self, sample: ImuSample) -> bool {
        if !sample.is_finite() {
            log::warn!("Dropping non-finite IMU sample at {:.3}s", sample.timestamp);
            return false;
        }
        if let Some(latest) = self.latest_timestamp() {
            if sample.timestamp <= latest {
                log::debug!(
                    "Dropping out-of-order IMU sample at {:.3}s (latest {:.3}s)",
                    sample.timestamp,
                    latest
                );
                return false;
            }
        }
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);
        true
    }

    pub fn latest_timestamp(&self) -> Option<f64> {
        self.buffer.back().map(|s| s.timestamp)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Samples correlated with a fix at `fix_timestamp`, oldest first.
    ///
    /// Prefers every sample since the previous fix; otherwise the single
    /// nearest sample within the age limit. Empty when nothing is close enough.
    pub fn samples_for(&mut self, fix_timestamp: f64) -> Vec<ImuSample> {
        let since = self.last_fix_timestamp.unwrap_or(f64::NEG_INFINITY);
        let oldest_allowed = fix_timestamp - self.max_sample_age_s;

        let mut window: Vec<ImuSample> = self
            .buffer
            .iter()
            .filter(|s| s.timestamp > since && s.timestamp <= fix_timestamp)
            .filter(|s| s.timestamp >= oldest_allowed)
            .copied()
            .collect();

        if window.is_empty() {
            if let Some(nearest) = self.nearest(fix_timestamp) {
                window.push(nearest);
            }
        }

        self.last_fix_timestamp = Some(fix_timestamp);
        while let Some(front) = self.buffer.front() {
            if front.timestamp < oldest_allowed {
                self.buffer.pop_front();
            } else {
                break;
            }
        }

        window
    }

    fn nearest(&self, timestamp: f64) -> Option<ImuSample> {
        self.buffer
            .iter()
            .filter(|s| (s.timestamp - timestamp).abs() <= self.max_sample_age_s)
            .min_by(|a, b| {
                (a.timestamp - timestamp)
                    .abs()
                    .total_cmp(&(b.timestamp - timestamp).abs())
            })
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_math::{bearing, distance};
    use approx::assert_abs_diff_eq;

    fn sample(ts: f64, accel: (f64, f64, f64), yaw_rate: f64) -> ImuSample {
        ImuSample::new(
            ts,
            Vec3::new(accel.0, accel.1, accel.2),
            Vec3::new(0.0, 0.0, yaw_rate),
        )
    }

    fn manager() -> ImuFallbackManager {
        ImuFallbackManager::new(&TrackerConfig::default())
    }

    #[test]
    fn test_zero_accel_matches_dead_reckoning() {
        let start = Fix::new(0.0, 0.0, 0.0).unwrap();
        let motion = MotionEstimate::new(10.0, 90.0);
        let out = manager()
            .correct(&start, motion, 1.0, &[sample(1.0, (0.0, 0.0, 0.0), 0.0)])
            .unwrap()
            .unwrap();

        assert_abs_diff_eq!(distance(&start, &out.fix), 10.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bearing(&start, &out.fix), 90.0, epsilon = 1e-6);
        assert_eq!(out.fix.timestamp, 1.0);
        assert_abs_diff_eq!(out.motion.speed_mps, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_forward_acceleration_adds_distance() {
        let start = Fix::new(0.0, 0.0, 0.0).unwrap();
        let motion = MotionEstimate::new(10.0, 0.0);
        // 2 m/s² toward north over 2 s: 20 m + 0.5*2*4 = 24 m
        let out = manager()
            .correct(&start, motion, 2.0, &[sample(2.0, (0.0, 2.0, 9.0), 0.0)])
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(out.displacement_m, 24.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.motion.speed_mps, 14.0, epsilon = 1e-9);
    }

    #[test]
    fn test_declination_rotates_acceleration() {
        let mut config = TrackerConfig::default();
        config.magnetic_declination_deg = 90.0;
        let mgr = ImuFallbackManager::new(&config);
        let start = Fix::new(0.0, 0.0, 0.0).unwrap();
        // From standstill, accel toward magnetic north becomes true east.
        let out = mgr
            .correct(
                &start,
                MotionEstimate::stationary(),
                2.0,
                &[sample(2.0, (0.0, 1.0, 0.0), 0.0)],
            )
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(out.motion.heading_deg, 90.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out.displacement_m, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing(&start, &out.fix), 90.0, epsilon = 1e-4);
    }

    #[test]
    fn test_yaw_rate_turns_heading() {
        let start = Fix::new(0.0, 0.0, 0.0).unwrap();
        let motion = MotionEstimate::new(5.0, 90.0);
        // Counter-clockwise 10°/s for 1 s turns east (90) toward north (80).
        let out = manager()
            .correct(
                &start,
                motion,
                1.0,
                &[sample(1.0, (0.0, 0.0, 0.0), 10f64.to_radians())],
            )
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(out.motion.heading_deg, 80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_implausible_step_rejected() {
        let start = Fix::new(0.0, 0.0, 0.0).unwrap();
        let motion = MotionEstimate::new(10.0, 0.0);
        let result = manager().correct(
            &start,
            motion,
            1.0,
            &[sample(1.0, (0.0, 500.0, 0.0), 0.0)],
        );
        match result {
            Err(TrackerError::ImuSampleRejected {
                displacement_m,
                bound_m,
                ..
            }) => {
                assert!(displacement_m > bound_m);
                assert_abs_diff_eq!(bound_m, 45.0, epsilon = 1e-9);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_bound_capped_by_threshold() {
        let mgr = manager();
        // 3 * max(15, 40) = 120 m/s, capped at 50 m/s
        assert_abs_diff_eq!(mgr.displacement_bound(40.0, 2.0), 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(mgr.displacement_bound(1.0, 1.0), 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_samples() {
        let start = Fix::new(0.0, 0.0, 0.0).unwrap();
        let out = manager()
            .correct(&start, MotionEstimate::stationary(), 1.0, &[])
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_calibration_removes_bias() {
        let mut mgr = manager();
        let stationary: Vec<ImuSample> = (0..10)
            .map(|i| sample(i as f64 * 0.1, (0.2, -0.1, 0.05), 0.0))
            .collect();
        assert!(mgr.calibrate(&stationary));
        assert!(!mgr.calibrate(&[]));

        let start = Fix::new(0.0, 0.0, 0.0).unwrap();
        let out = mgr
            .correct(
                &start,
                MotionEstimate::stationary(),
                1.0,
                &[sample(1.0, (0.2, -0.1, 0.05), 0.0)],
            )
            .unwrap()
            .unwrap();
        assert!(out.displacement_m < 1e-9);
    }

    #[test]
    fn test_error_growth_scaled() {
        let mgr = manager();
        assert_abs_diff_eq!(mgr.error_growth(4.0), 2.0, epsilon = 1e-12);
        assert!(mgr.within_error_bound(250.0));
        assert!(!mgr.within_error_bound(250.1));
    }

    #[test]
    fn test_correlator_window_since_last_fix() {
        let mut correlator = ImuCorrelator::new(0.5);
        for i in 0..=20 {
            correlator.push(sample(i as f64 * 0.1, (0.0, 0.0, 0.0), 0.0));
        }
        let first = correlator.samples_for(1.0);
        assert!(!first.is_empty());
        assert!(first.iter().all(|s| s.timestamp <= 1.0 && s.timestamp >= 0.5));

        let second = correlator.samples_for(1.5);
        assert!(second.iter().all(|s| s.timestamp > 1.0 && s.timestamp <= 1.5));
        assert!(!second.is_empty());
    }

    #[test]
    fn test_correlator_nearest_within_age() {
        let mut correlator = ImuCorrelator::new(0.5);
        correlator.push(sample(2.2, (0.0, 0.0, 0.0), 0.0));
        let matched = correlator.samples_for(2.0);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].timestamp, 2.2);

        assert!(correlator.samples_for(5.0).is_empty());
    }

    #[test]
    fn test_correlator_drops_out_of_order() {
        let mut correlator = ImuCorrelator::new(0.5);
        assert!(correlator.push(sample(1.0, (0.0, 0.0, 0.0), 0.0)));
        assert!(!correlator.push(sample(0.5, (0.0, 0.0, 0.0), 0.0)));
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn test_non_finite_step_rejected() {
        let start = Fix::new(0.0, 0.0, 0.0).unwrap();
        let motion = MotionEstimate::new(10.0, 0.0);
        for bad in [
            sample(1.0, (f64::NAN, 0.0, 0.0), 0.0),
            sample(1.0, (0.0, f64::INFINITY, 0.0), 0.0),
            sample(1.0, (0.0, 0.0, 0.0), f64::NAN),
        ] {
            let result = manager().correct(&start, motion, 1.0, &[bad]);
            assert!(
                matches!(result, Err(TrackerError::ImuSampleRejected { .. })),
                "expected rejection, got {result:?}"
            );
        }
    }

    #[test]
    fn test_calibration_removes_gyro_bias() {
        let mut mgr = manager();
        let stationary: Vec<ImuSample> = (0..10)
            .map(|i| sample(i as f64 * 0.1, (0.0, 0.0, 0.0), 0.05))
            .collect();
        assert!(mgr.calibrate(&stationary));
        assert_abs_diff_eq!(mgr.gyro_bias().z, 0.05, epsilon = 1e-12);

        let start = Fix::new(0.0, 0.0, 0.0).unwrap();
        let out = mgr
            .correct(
                &start,
                MotionEstimate::new(10.0, 90.0),
                10.0,
                &[sample(10.0, (0.0, 0.0, 0.0), 0.05)],
            )
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(out.motion.heading_deg, 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing(&start, &out.fix), 90.0, epsilon = 1e-4);
    }

    #[test]
    fn test_calibration_ignores_non_finite_samples() {
        let mut mgr = manager();
        assert!(!mgr.calibrate(&[sample(0.0, (f64::NAN, 0.0, 0.0), 0.0)]));
        assert!(mgr.calibrate(&[
            sample(0.0, (0.2, 0.0, 0.0), 0.0),
            sample(0.1, (f64::NAN, 0.0, 0.0), 0.0),
        ]));
        assert_abs_diff_eq!(mgr.accel_bias().x, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_correlator_drops_non_finite() {
        let mut correlator = ImuCorrelator::new(0.5);
        assert!(!correlator.push(sample(1.0, (f64::NAN, 0.0, 0.0), 0.0)));
        assert!(!correlator.push(sample(f64::INFINITY, (0.0, 0.0, 0.0), 0.0)));
        assert!(correlator.is_empty());
        assert!(correlator.push(sample(1.1, (0.0, 0.0, 0.0), 0.0)));
        assert_eq!(correlator.latest_timestamp(), Some(1.1));
    }
}
