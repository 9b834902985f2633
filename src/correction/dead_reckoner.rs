use serde::{Deserialize, Serialize};

use crate::geo_math::{bearing, implied_speed, project};
use crate::types::Fix;

/// Speed and course used to extrapolate a track.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionEstimate {
    pub speed_mps: f64,
    pub heading_deg: f64,
}

impl MotionEstimate {
    pub fn new(speed_mps: f64, heading_deg: f64) -> Self {
        Self {
            speed_mps: speed_mps.max(0.0),
            heading_deg: heading_deg.rem_euclid(360.0),
        }
    }

    pub fn stationary() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn is_stationary(&self) -> bool {
        self.speed_mps <= f64::EPSILON
    }

    /// Average speed and bearing between two fixes.
    pub fn between(from: &Fix, to: &Fix) -> Option<Self> {
        let speed = implied_speed(from, to)?;
        Some(Self::new(speed, bearing(from, to)))
    }

    /// Estimate for extrapolating from `last`.
    ///
    /// The fix's own speed/heading win when present; missing fields are filled
    /// from the average motion between `previous` and `last`.
    pub fn estimate(last: &Fix, previous: Option<&Fix>) -> Option<Self> {
        let derived = previous.and_then(|p| Self::between(p, last));
        let speed = last.speed.or(derived.map(|d| d.speed_mps))?;
        let heading = last.heading.or(derived.map(|d| d.heading_deg))?;
        Some(Self::new(speed, heading))
    }

    pub fn clamped(self, max_speed_mps: f64) -> Self {
        Self::new(self.speed_mps.min(max_speed_mps), self.heading_deg)
    }
}

/// Constant-velocity extrapolation along a great circle.
#[derive(Clone, Debug)]
pub struct DeadReckoner {
    drift_rate_mps: f64,
}

impl DeadReckoner {
    pub fn new(drift_rate_mps: f64) -> Self {
        Self {
            drift_rate_mps: drift_rate_mps.max(0.0),
        }
    }

    pub fn propagate(
        &self,
        last_trusted: &Fix,
        elapsed_seconds: f64,
        velocity_mps: f64,
        heading_deg: f64,
    ) -> Fix {
        let elapsed = elapsed_seconds.max(0.0);
        let speed = velocity_mps.max(0.0);
        let displacement = speed * elapsed;

        let mut fix = project(last_trusted, heading_deg, displacement);
        fix.timestamp = last_trusted.timestamp + elapsed;
        fix.speed = Some(speed);
        fix.heading = Some(heading_deg.rem_euclid(360.0));
        fix
    }

    pub fn propagate_with(&self, origin: &Fix, elapsed_seconds: f64, motion: MotionEstimate) -> Fix {
        self.propagate(origin, elapsed_seconds, motion.speed_mps, motion.heading_deg)
    }

    /// Worst-case positional error added by `elapsed_seconds` of dead reckoning.
    pub fn error_growth(&self, elapsed_seconds: f64) -> f64 {
        self.drift_rate_mps * elapsed_seconds.max(0.0)
    }

    pub fn drift_rate_mps(&self) -> f64 {
        self.drift_rate_mps
    }
}
