use crate::error::{TrackerError, TrackerResult};
use crate::geo_math::distance;
use crate::types::{Fix, Verdict};

/// Flags fixes whose implied speed from the previous trusted fix is not
/// physically plausible.
///
/// Stateless: the verdict depends only on the two fixes and the threshold.
#[derive(Clone, Debug)]
pub struct VelocityAnomalyDetector {
    threshold_mps: f64,
}

impl VelocityAnomalyDetector {
    pub fn new(threshold_mps: f64) -> Self {
        Self { threshold_mps }
    }

    pub fn threshold_mps(&self) -> f64 {
        self.threshold_mps
    }

    /// Speed needed to travel from `previous` to `current` (m/s).
    pub fn implied_speed(&self, previous: &Fix, current: &Fix) -> TrackerResult<f64> {
        let dt = current.timestamp - previous.timestamp;
        if dt <= 0.0 || !dt.is_finite() {
            return Err(TrackerError::InvalidInterval {
                previous: previous.timestamp,
                current: current.timestamp,
            });
        }
        Ok(distance(previous, current) / dt)
    }

    pub fn detect(&self, previous: Option<&Fix>, current: &Fix) -> TrackerResult<Verdict> {
        let Some(previous) = previous else {
            return Ok(Verdict::Trusted);
        };

        let speed = self.implied_speed(previous, current)?;
        if speed > self.threshold_mps {
            Ok(Verdict::Spoofed)
        } else {
            Ok(Verdict::Trusted)
        }
    }
}

impl Default for VelocityAnomalyDetector {
    fn default() -> Self {
        Self::new(50.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_math::{haversine_distance, EARTH_RADIUS_M};

    fn fix(lat: f64, lon: f64, ts: f64) -> Fix {
        Fix::new(lat, lon, ts).unwrap()
    }

    #[test]
    fn test_first_fix_trusted() {
        let detector = VelocityAnomalyDetector::new(50.0);
        assert_eq!(
            detector.detect(None, &fix(37.7749, -122.4194, 1000.0)),
            Ok(Verdict::Trusted)
        );
        assert_eq!(detector.detect(None, &fix(89.0, 179.0, -5.0)), Ok(Verdict::Trusted));
    }

    #[test]
    fn test_normal_velocity_not_detected() {
        let detector = VelocityAnomalyDetector::new(50.0);
        let prev = fix(37.7749, -122.4194, 1000.0);
        let curr = fix(37.7750, -122.4195, 1001.0);
        assert_eq!(detector.detect(Some(&prev), &curr), Ok(Verdict::Trusted));
    }

    #[test]
    fn test_extreme_velocity_detected() {
        let detector = VelocityAnomalyDetector::new(50.0);
        let prev = fix(37.7749, -122.4194, 1000.0);
        let curr = fix(37.7849, -122.4094, 1001.0);
        assert_eq!(detector.detect(Some(&prev), &curr), Ok(Verdict::Spoofed));
    }

    #[test]
    fn test_zero_interval_is_error() {
        let detector = VelocityAnomalyDetector::new(50.0);
        let prev = fix(37.7749, -122.4194, 1000.0);
        let curr = fix(37.7849, -122.4094, 1000.0);
        assert_eq!(
            detector.detect(Some(&prev), &curr),
            Err(TrackerError::InvalidInterval {
                previous: 1000.0,
                current: 1000.0
            })
        );
        let earlier = fix(37.7749, -122.4194, 999.0);
        assert!(detector.detect(Some(&prev), &earlier).is_err());
    }

    #[test]
    fn test_threshold_is_strict() {
        let prev = fix(0.0, 0.0, 0.0);
        let curr = fix(0.0, 0.001, 2.0);
        let speed = haversine_distance(0.0, 0.0, 0.0, 0.001) / 2.0;

        let at_threshold = VelocityAnomalyDetector::new(speed);
        assert_eq!(at_threshold.detect(Some(&prev), &curr), Ok(Verdict::Trusted));

        let just_below = VelocityAnomalyDetector::new(speed * (1.0 - 1e-9));
        assert_eq!(just_below.detect(Some(&prev), &curr), Ok(Verdict::Spoofed));
    }

    #[test]
    fn test_speed_grid_around_threshold() {
        let detector = VelocityAnomalyDetector::new(50.0);
        let prev = fix(0.0, 0.0, 0.0);
        for target_speed in [1.0, 10.0, 49.0, 51.0, 200.0, 1100.0] {
            let deg = (target_speed / EARTH_RADIUS_M).to_degrees();
            let curr = fix(0.0, deg, 1.0);
            let expected = if target_speed > 50.0 {
                Verdict::Spoofed
            } else {
                Verdict::Trusted
            };
            assert_eq!(detector.detect(Some(&prev), &curr), Ok(expected));
        }
    }
}
