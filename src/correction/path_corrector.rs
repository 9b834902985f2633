//! Path corrector: the trusted/degraded tracking state machine.
//!
//! ```text
//!            Spoofed (no IMU)            Trusted + within bound
//! GpsTrusted ───────────────► DeadReckoning ───────────────► GpsTrusted
//!     │      Spoofed (IMU)                ▲ │
//!     └─────────────────────► ImuFallback ┘ └ Spoofed / Trusted but far: stay
//! ```
//!
//! Every emitted fix is continuous with the previous one: degraded outputs
//! are propagated from the last emitted fix at a speed no greater than the
//! detection threshold, and GPS is only re-accepted close to the propagated
//! track.

use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::correction::dead_reckoner::{DeadReckoner, MotionEstimate};
use crate::correction::imu_fallback::ImuFallbackManager;
use crate::error::{TrackerError, TrackerResult};
use crate::geo_math::distance;
use crate::types::{CorrectedFix, CorrectionMethod, Fix, ImuSample, TrackMode, Verdict};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Consecutive spoofed fixes reached the configured ceiling.
    SpoofedCeiling,
    /// Accumulated propagation error passed the configured bound.
    PropagationErrorBound,
}

/// Conditions reported alongside a corrected fix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackEvent {
    ImuSampleRejected {
        timestamp: f64,
        displacement_m: f64,
        bound_m: f64,
    },
    TrackingDegraded {
        timestamp: f64,
        reason: DegradedReason,
        consecutive_spoofed: u32,
        propagation_error_m: f64,
    },
    Reintegrated {
        timestamp: f64,
        offset_m: f64,
        outage_s: f64,
    },
    ReintegrationRejected {
        timestamp: f64,
        offset_m: f64,
        bound_m: f64,
    },
}

/// Mutable tracking state, owned by exactly one `PathCorrector`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrackState {
    last_trusted_fix: Option<Fix>,
    previous_trusted_fix: Option<Fix>,
    last_output: Option<Fix>,
    consecutive_spoofed_count: u32,
    current_mode: TrackMode,
    accumulated_propagation_error: f64,
    motion: Option<MotionEstimate>,
    degraded_reported: bool,
}

impl TrackState {
    pub fn last_trusted_fix(&self) -> Option<&Fix> {
        self.last_trusted_fix.as_ref()
    }

    pub fn last_output(&self) -> Option<&Fix> {
        self.last_output.as_ref()
    }

    pub fn consecutive_spoofed_count(&self) -> u32 {
        self.consecutive_spoofed_count
    }

    pub fn current_mode(&self) -> TrackMode {
        self.current_mode
    }

    pub fn accumulated_propagation_error(&self) -> f64 {
        self.accumulated_propagation_error
    }

    pub fn motion(&self) -> Option<&MotionEstimate> {
        self.motion.as_ref()
    }

    pub fn is_degraded_reported(&self) -> bool {
        self.degraded_reported
    }
}

/// Outcome of one `correct` call.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrectionOutcome {
    pub fix: CorrectedFix,
    pub events: Vec<TrackEvent>,
}

impl CorrectionOutcome {
    pub fn is_degraded(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TrackEvent::TrackingDegraded { .. }))
    }
}

pub struct PathCorrector {
    max_consecutive_spoofed: u32,
    plausibility_bound_m: f64,
    max_speed_mps: f64,
    reckoner: DeadReckoner,
    imu: ImuFallbackManager,
    state: TrackState,
}

impl PathCorrector {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            max_consecutive_spoofed: config.max_consecutive_spoofed,
            plausibility_bound_m: config.reintegration_plausibility_bound_m,
            max_speed_mps: config.threshold_mps,
            reckoner: DeadReckoner::new(config.drift_rate_mps),
            imu: ImuFallbackManager::new(config),
            state: TrackState::default(),
        }
    }

    pub fn with_imu_manager(mut self, imu: ImuFallbackManager) -> Self {
        self.imu = imu;
        self
    }

    pub fn imu_manager_mut(&mut self) -> &mut ImuFallbackManager {
        &mut self.imu
    }

    pub fn state(&self) -> &TrackState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = TrackState::default();
    }

    /// Decide the output for `current`.
    ///
    /// `imu` holds the samples correlated with this fix (may be empty). The
    /// state is untouched when an error is returned.
    pub fn correct(
        &mut self,
        current: &Fix,
        verdict: Verdict,
        imu: &[ImuSample],
    ) -> TrackerResult<CorrectionOutcome> {
        if let Some(last) = self.state.last_output.as_ref() {
            if current.timestamp <= last.timestamp {
                return Err(TrackerError::InvalidInterval {
                    previous: last.timestamp,
                    current: current.timestamp,
                });
            }
        }

        let mut events = Vec::new();

        let (Some(_), Some(last_output)) = (self.state.last_trusted_fix, self.state.last_output)
        else {
            // Nothing to judge or propagate from yet.
            let fix = self.accept_trusted(current, verdict, CorrectionMethod::Raw);
            return Ok(CorrectionOutcome { fix, events });
        };

        let fix = match verdict {
            Verdict::Trusted if !self.state.current_mode.is_degraded() => {
                self.accept_trusted(current, verdict, CorrectionMethod::Raw)
            }
            Verdict::Trusted => {
                let offset_m = distance(&last_output, current);
                if offset_m <= self.plausibility_bound_m {
                    let outage_s = self
                        .state
                        .last_trusted_fix
                        .map(|t| current.timestamp - t.timestamp)
                        .unwrap_or(0.0);
                    events.push(TrackEvent::Reintegrated {
                        timestamp: current.timestamp,
                        offset_m,
                        outage_s,
                    });
                    self.accept_trusted(current, verdict, CorrectionMethod::Reintegrated)
                } else {
                    events.push(TrackEvent::ReintegrationRejected {
                        timestamp: current.timestamp,
                        offset_m,
                        bound_m: self.plausibility_bound_m,
                    });
                    self.propagate(current, verdict, &last_output, imu, &mut events)?
                }
            }
            Verdict::Spoofed => self.propagate(current, verdict, &last_output, imu, &mut events)?,
        };

        Ok(CorrectionOutcome { fix, events })
    }

    fn accept_trusted(
        &mut self,
        current: &Fix,
        verdict: Verdict,
        method: CorrectionMethod,
    ) -> CorrectedFix {
        let state = &mut self.state;
        if state.last_trusted_fix.is_some() {
            state.previous_trusted_fix = state.last_trusted_fix;
        }
        state.last_trusted_fix = Some(*current);
        state.last_output = Some(*current);
        state.consecutive_spoofed_count = 0;
        state.current_mode = TrackMode::GpsTrusted;
        state.accumulated_propagation_error = 0.0;
        state.motion = None;
        state.degraded_reported = false;

        CorrectedFix {
            raw: *current,
            output: *current,
            verdict,
            mode: TrackMode::GpsTrusted,
            method,
            confidence: method.confidence(),
            propagation_error_m: 0.0,
        }
    }

    /// Replace `current` with a propagated fix. Computes everything first and
    /// commits to the state only on success.
    fn propagate(
        &mut self,
        current: &Fix,
        verdict: Verdict,
        origin: &Fix,
        imu: &[ImuSample],
        events: &mut Vec<TrackEvent>,
    ) -> TrackerResult<CorrectedFix> {
        let elapsed = current.timestamp - origin.timestamp;
        let motion = self.state.motion.or_else(|| {
            self.state.last_trusted_fix.as_ref().and_then(|last| {
                MotionEstimate::estimate(last, self.state.previous_trusted_fix.as_ref())
            })
        });
        let motion = motion.map(|m| m.clamped(self.max_speed_mps));

        let imu_step = if imu.is_empty() {
            None
        } else {
            let base = motion.unwrap_or_else(MotionEstimate::stationary);
            match self.imu.correct(origin, base, current.timestamp, imu) {
                Ok(step) => step,
                Err(TrackerError::ImuSampleRejected {
                    timestamp,
                    displacement_m,
                    bound_m,
                }) => {
                    events.push(TrackEvent::ImuSampleRejected {
                        timestamp,
                        displacement_m,
                        bound_m,
                    });
                    None
                }
                Err(e) => return Err(e),
            }
        };

        let (output, mode, method, next_motion, growth) = match (imu_step, motion) {
            (Some(step), _) => (
                step.fix,
                TrackMode::ImuFallback,
                CorrectionMethod::ImuPropagated,
                step.motion,
                self.imu.error_growth(elapsed),
            ),
            (None, Some(m)) if !m.is_stationary() => (
                self.reckoner.propagate_with(origin, elapsed, m),
                TrackMode::DeadReckoning,
                CorrectionMethod::DeadReckoned,
                m,
                self.reckoner.error_growth(elapsed),
            ),
            (None, m) => {
                let hold = MotionEstimate::new(0.0, m.map(|m| m.heading_deg).unwrap_or(0.0));
                (
                    self.reckoner.propagate_with(origin, elapsed, hold),
                    TrackMode::DeadReckoning,
                    CorrectionMethod::PositionHold,
                    hold,
                    self.reckoner.error_growth(elapsed),
                )
            }
        };

        let state = &mut self.state;
        state.current_mode = mode;
        state.consecutive_spoofed_count += 1;
        state.accumulated_propagation_error += growth;
        state.last_output = Some(output);
        state.motion = Some(next_motion);

        if !state.degraded_reported {
            let reason = if state.consecutive_spoofed_count >= self.max_consecutive_spoofed {
                Some(DegradedReason::SpoofedCeiling)
            } else if !self
                .imu
                .within_error_bound(state.accumulated_propagation_error)
            {
                Some(DegradedReason::PropagationErrorBound)
            } else {
                None
            };
            if let Some(reason) = reason {
                state.degraded_reported = true;
                events.push(TrackEvent::TrackingDegraded {
                    timestamp: current.timestamp,
                    reason,
                    consecutive_spoofed: state.consecutive_spoofed_count,
                    propagation_error_m: state.accumulated_propagation_error,
                });
            }
        }

        log::debug!(
            "t={:.3}s {:?} -> {:?} via {:?}, error bound {:.1} m",
            current.timestamp,
            verdict,
            mode,
            method,
            state.accumulated_propagation_error
        );

        Ok(CorrectedFix {
            raw: *current,
            output,
            verdict,
            mode,
            method,
            confidence: method.confidence(),
            propagation_error_m: state.accumulated_propagation_error,
        })
    }
}
