//! Synthetic feed for demos: a platform moving at constant velocity whose GPS
//! is periodically pushed off track, plus a matching IMU stream.

use std::f64::consts::PI;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, Duration};

use crate::geo_math::destination;
use crate::pipeline::StopHandle;
use crate::types::{Fix, ImuSample, Vec3};

const GRAVITY: f64 = 9.81;

#[derive(Clone, Debug)]
pub struct Scenario {
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub fix_interval: Duration,
    pub imu_interval: Duration,
    /// Period of the spoofing pattern in fixes (0 disables spoofing).
    pub spoof_every: u64,
    /// Consecutive spoofed fixes at the end of each period.
    pub spoof_length: u64,
    /// Offset added to latitude and longitude of a spoofed fix (degrees).
    pub spoof_magnitude_deg: f64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            origin_lat: 37.7749,
            origin_lon: -122.4194,
            speed_mps: 12.0,
            heading_deg: 45.0,
            fix_interval: Duration::from_secs(1),
            imu_interval: Duration::from_millis(20),
            spoof_every: 20,
            spoof_length: 3,
            spoof_magnitude_deg: 0.01,
        }
    }
}

impl Scenario {
    pub fn is_spoofed(&self, seq: u64) -> bool {
        if self.spoof_every == 0 || self.spoof_length == 0 {
            return false;
        }
        seq % self.spoof_every >= self.spoof_every.saturating_sub(self.spoof_length)
    }

    /// Position of the platform `t` seconds into the run.
    pub fn true_position(&self, t: f64) -> (f64, f64) {
        destination(
            self.origin_lat,
            self.origin_lon,
            self.heading_deg,
            self.speed_mps * t,
        )
    }

    /// The `seq`-th GPS fix as the receiver would report it.
    pub fn fix_at(&self, seq: u64) -> Option<Fix> {
        let t = seq as f64 * self.fix_interval.as_secs_f64();
        let (mut lat, mut lon) = self.true_position(t);
        if self.is_spoofed(seq) {
            lat += self.spoof_magnitude_deg;
            lon += self.spoof_magnitude_deg;
        }
        Fix::new(lat, lon, t)
            .and_then(|f| f.with_speed(self.speed_mps))
            .and_then(|f| f.with_heading(self.heading_deg))
            .ok()
    }

    /// The `seq`-th IMU sample: small vibration on top of gravity, aligned to
    /// the level frame.
    pub fn imu_at(&self, seq: u64) -> ImuSample {
        let t = seq as f64 * self.imu_interval.as_secs_f64();
        ImuSample::new(
            t,
            Vec3::new(
                (t * 2.0 * PI).sin() * 0.05,
                (t * 2.0 * PI).cos() * 0.03,
                GRAVITY + (t * PI).sin() * 0.1,
            ),
            Vec3::new((t * 0.5).sin() * 0.005, (t * 0.3).cos() * 0.003, 0.0),
        )
    }
}

pub async fn gps_loop(tx: Sender<Fix>, scenario: Scenario, stop: StopHandle) {
    let mut ticker = interval(scenario.fix_interval);
    let mut seq = 0u64;
    let mut sent = 0u64;

    while !stop.is_stopped() {
        ticker.tick().await;

        let Some(fix) = scenario.fix_at(seq) else {
            log::warn!("[gps] Scenario left valid coordinates at fix {}", seq);
            break;
        };
        seq += 1;

        match tx.try_send(fix) {
            Ok(_) => {
                sent += 1;
                log::debug!("[gps] {} fixes", sent);
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("[gps] Channel closed after {} fixes", sent);
                break;
            }
            Err(TrySendError::Full(_)) => {
                // Pipeline is behind, drop this fix
            }
        }
    }
}

pub async fn imu_loop(tx: Sender<ImuSample>, scenario: Scenario, stop: StopHandle) {
    let mut ticker = interval(scenario.imu_interval);
    let mut seq = 0u64;
    let mut sent = 0u64;

    while !stop.is_stopped() {
        ticker.tick().await;

        let sample = scenario.imu_at(seq);
        seq += 1;

        match tx.try_send(sample) {
            Ok(_) => {
                sent += 1;
                if sent % 500 == 0 {
                    log::debug!("[imu] {} samples", sent);
                }
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("[imu] Channel closed after {} samples", sent);
                break;
            }
            Err(TrySendError::Full(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::VelocityAnomalyDetector;
    use crate::types::Verdict;

    #[test]
    fn test_spoof_pattern() {
        let scenario = Scenario::default();
        let spoofed: Vec<u64> = (0..40).filter(|&s| scenario.is_spoofed(s)).collect();
        assert_eq!(spoofed, vec![17, 18, 19, 37, 38, 39]);

        let clean = Scenario {
            spoof_every: 0,
            ..Scenario::default()
        };
        assert!((0..100).all(|s| !clean.is_spoofed(s)));
    }

    #[test]
    fn test_clean_fixes_are_plausible_and_jumps_are_not() {
        let scenario = Scenario::default();
        let detector = VelocityAnomalyDetector::new(50.0);
        let f16 = scenario.fix_at(16).unwrap();
        let f15 = scenario.fix_at(15).unwrap();
        let f17 = scenario.fix_at(17).unwrap();
        assert_eq!(detector.detect(Some(&f15), &f16), Ok(Verdict::Trusted));
        assert_eq!(detector.detect(Some(&f16), &f17), Ok(Verdict::Spoofed));
    }

    #[tokio::test]
    async fn test_gps_loop_stops_on_signal() {
        let scenario = Scenario {
            fix_interval: Duration::from_millis(1),
            ..Scenario::default()
        };
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let stop = StopHandle::new();
        let task = tokio::spawn(gps_loop(tx, scenario, stop.clone()));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.timestamp, 0.0);
        stop.stop();
        task.await.unwrap();
    }
}
