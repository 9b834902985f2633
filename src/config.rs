use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{TrackerError, TrackerResult};

/// What the pipeline does with a fix whose timestamp does not advance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalPolicy {
    /// Drop the fix, log a warning, keep going.
    #[default]
    Skip,
    /// Stop the run and return the error.
    Abort,
}

/// Detection and correction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum physically plausible platform speed (m/s)
    pub threshold_mps: f64,
    /// Consecutive spoofed fixes before tracking is reported degraded
    pub max_consecutive_spoofed: u32,
    /// Growth of the propagation error bound per second of fallback (m/s)
    pub drift_rate_mps: f64,
    /// Offset from magnetic to true north, positive east (degrees)
    pub magnetic_declination_deg: f64,
    /// Max distance between a returning GPS fix and the propagated track (meters)
    pub reintegration_plausibility_bound_m: f64,
    /// Typical cruising speed, scales the IMU displacement bound (m/s)
    pub nominal_speed_mps: f64,
    /// Multiple of nominal speed an IMU step may imply before rejection
    pub imu_displacement_factor: f64,
    /// Fraction of `drift_rate_mps` accrued per second while IMU-aided
    pub imu_error_scale: f64,
    /// Max distance in time between a fix and a correlated IMU sample (s)
    pub imu_max_sample_age_s: f64,
    /// Propagation error above which tracking is reported degraded (meters)
    pub max_propagation_error_m: f64,
    pub invalid_interval_policy: IntervalPolicy,
    /// End the run at the first degraded report instead of emitting best-effort fixes
    pub stop_on_degraded: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            threshold_mps: 50.0,
            max_consecutive_spoofed: 5,
            drift_rate_mps: 1.0,
            magnetic_declination_deg: 0.0,
            reintegration_plausibility_bound_m: 25.0,
            nominal_speed_mps: 15.0,
            imu_displacement_factor: 3.0,
            imu_error_scale: 0.5,
            imu_max_sample_age_s: 0.5,
            max_propagation_error_m: 250.0,
            invalid_interval_policy: IntervalPolicy::Skip,
            stop_on_degraded: false,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> TrackerResult<()> {
        fn positive(name: &str, value: f64) -> TrackerResult<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(TrackerError::InvalidConfig(format!(
                    "{name} must be > 0, got {value}"
                )))
            }
        }
        fn non_negative(name: &str, value: f64) -> TrackerResult<()> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(TrackerError::InvalidConfig(format!(
                    "{name} must be >= 0, got {value}"
                )))
            }
        }

        positive("threshold_mps", self.threshold_mps)?;
        if self.max_consecutive_spoofed == 0 {
            return Err(TrackerError::InvalidConfig(
                "max_consecutive_spoofed must be > 0".to_string(),
            ));
        }
        non_negative("drift_rate_mps", self.drift_rate_mps)?;
        if !self.magnetic_declination_deg.is_finite()
            || self.magnetic_declination_deg.abs() > 180.0
        {
            return Err(TrackerError::InvalidConfig(format!(
                "magnetic_declination_deg must be within [-180, 180], got {}",
                self.magnetic_declination_deg
            )));
        }
        positive(
            "reintegration_plausibility_bound_m",
            self.reintegration_plausibility_bound_m,
        )?;
        positive("nominal_speed_mps", self.nominal_speed_mps)?;
        positive("imu_displacement_factor", self.imu_displacement_factor)?;
        non_negative("imu_error_scale", self.imu_error_scale)?;
        positive("imu_max_sample_age_s", self.imu_max_sample_age_s)?;
        positive("max_propagation_error_m", self.max_propagation_error_m)?;
        Ok(())
    }

    /// Load and validate a JSON config file. Missing keys take defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> TrackerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&content)
            .map_err(|e| TrackerError::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> TrackerResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TrackerError::InvalidConfig(format!("failed to serialize config: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold_mps, 50.0);
        assert_eq!(config.max_consecutive_spoofed, 5);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = TrackerConfig::default();
        config.threshold_mps = 0.0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.max_consecutive_spoofed = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.drift_rate_mps = -0.1;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.reintegration_plausibility_bound_m = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{"threshold_mps": 30.0, "invalid_interval_policy": "abort"}"#)
                .unwrap();
        assert_eq!(config.threshold_mps, 30.0);
        assert_eq!(config.invalid_interval_policy, IntervalPolicy::Abort);
        assert_eq!(config.max_consecutive_spoofed, 5);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!(
            "gps_spoof_rs_config_{}.json",
            std::process::id()
        ));
        let mut config = TrackerConfig::default();
        config.magnetic_declination_deg = 9.0;
        config.save(&path).unwrap();
        let loaded = TrackerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(&path);
    }
}
