pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::geo_math::validate_coordinates;

/// A single timestamped positioning measurement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Monotonic seconds, strictly increasing across a stream.
    pub timestamp: f64,
    /// Ground speed in m/s, when the receiver reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Course over ground in degrees [0, 360), when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, timestamp: f64) -> TrackerResult<Self> {
        if !latitude.is_finite() || !longitude.is_finite() || !timestamp.is_finite() {
            return Err(TrackerError::InvalidFix(format!(
                "non-finite value ({latitude}, {longitude}) at {timestamp}"
            )));
        }
        if !validate_coordinates(latitude, longitude) {
            return Err(TrackerError::InvalidFix(format!(
                "coordinates out of range ({latitude}, {longitude})"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
            timestamp,
            speed: None,
            heading: None,
        })
    }

    pub fn with_speed(mut self, speed: f64) -> TrackerResult<Self> {
        if !speed.is_finite() || speed < 0.0 {
            return Err(TrackerError::InvalidFix(format!("invalid speed {speed}")));
        }
        self.speed = Some(speed);
        Ok(self)
    }

    pub fn with_heading(mut self, heading: f64) -> TrackerResult<Self> {
        if !heading.is_finite() {
            return Err(TrackerError::InvalidFix(format!("invalid heading {heading}")));
        }
        self.heading = Some(heading.rem_euclid(360.0));
        Ok(self)
    }

    /// Re-check invariants on a fix built outside `new` (e.g. deserialized).
    pub fn validated(self) -> TrackerResult<Self> {
        let mut fix = Fix::new(self.latitude, self.longitude, self.timestamp)?;
        if let Some(speed) = self.speed {
            fix = fix.with_speed(speed)?;
        }
        if let Some(heading) = self.heading {
            fix = fix.with_heading(heading)?;
        }
        Ok(fix)
    }
}

/// One inertial sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub timestamp: f64,
    /// Linear acceleration, gravity removed (m/s²).
    pub acceleration: Vec3,
    /// Angular rate (rad/s), z positive counter-clockwise about up.
    pub angular_rate: Vec3,
}

impl ImuSample {
    pub fn new(timestamp: f64, acceleration: Vec3, angular_rate: Vec3) -> Self {
        Self {
            timestamp,
            acceleration,
            angular_rate,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite()
            && self.acceleration.iter().all(|v| v.is_finite())
            && self.angular_rate.iter().all(|v| v.is_finite())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Trusted,
    Spoofed,
}

impl Verdict {
    pub fn is_spoofed(&self) -> bool {
        matches!(self, Verdict::Spoofed)
    }
}

/// Tracking mode of the path corrector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackMode {
    #[default]
    GpsTrusted,
    DeadReckoning,
    ImuFallback,
}

impl TrackMode {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, TrackMode::GpsTrusted)
    }
}

/// How the output fix of a `CorrectedFix` was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    Raw,
    Reintegrated,
    ImuPropagated,
    DeadReckoned,
    PositionHold,
}

impl CorrectionMethod {
    pub fn confidence(&self) -> f64 {
        match self {
            CorrectionMethod::Raw | CorrectionMethod::Reintegrated => 1.0,
            CorrectionMethod::ImuPropagated => 0.9,
            CorrectionMethod::DeadReckoned => 0.7,
            CorrectionMethod::PositionHold => 0.3,
        }
    }
}

/// Result of processing one incoming fix. Emitted exactly once per input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrectedFix {
    pub raw: Fix,
    pub output: Fix,
    pub verdict: Verdict,
    pub mode: TrackMode,
    pub method: CorrectionMethod,
    pub confidence: f64,
    /// Worst-case positional error bound of `output` (meters).
    pub propagation_error_m: f64,
}

impl CorrectedFix {
    pub fn is_replaced(&self) -> bool {
        !matches!(
            self.method,
            CorrectionMethod::Raw | CorrectionMethod::Reintegrated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_rejects_out_of_range() {
        assert!(Fix::new(91.0, 0.0, 0.0).is_err());
        assert!(Fix::new(0.0, -180.5, 0.0).is_err());
        assert!(Fix::new(f64::NAN, 0.0, 0.0).is_err());
        assert!(Fix::new(-33.8688, 151.2093, 10.0).is_ok());
    }

    #[test]
    fn test_fix_optional_fields() {
        let fix = Fix::new(10.0, 20.0, 1.0)
            .and_then(|f| f.with_speed(3.5))
            .and_then(|f| f.with_heading(-90.0))
            .unwrap();
        assert_eq!(fix.speed, Some(3.5));
        assert_eq!(fix.heading, Some(270.0));
        assert!(Fix::new(0.0, 0.0, 0.0).unwrap().with_speed(-1.0).is_err());
    }

    #[test]
    fn test_fix_json_omits_missing_fields() {
        let fix = Fix::new(1.0, 2.0, 3.0).unwrap();
        let json = serde_json::to_string(&fix).unwrap();
        assert!(!json.contains("speed"));
        let back: Fix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fix);
    }

    #[test]
    fn test_validated_checks_deserialized_fix() {
        let fix: Fix =
            serde_json::from_str(r#"{"latitude": 95.0, "longitude": 0.0, "timestamp": 1.0}"#)
                .unwrap();
        assert!(fix.validated().is_err());
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(CorrectionMethod::Raw.confidence() > CorrectionMethod::ImuPropagated.confidence());
        assert!(
            CorrectionMethod::ImuPropagated.confidence()
                > CorrectionMethod::DeadReckoned.confidence()
        );
        assert!(
            CorrectionMethod::DeadReckoned.confidence()
                > CorrectionMethod::PositionHold.confidence()
        );
    }
}
