//! GPS spoofing detection and trajectory correction.
//!
//! Fixes flow from a [`sources::FixSource`] through the [`DetectionPipeline`]:
//! the velocity anomaly detector judges each fix against the last trusted one,
//! and the path corrector either passes it through or replaces it with a dead
//! reckoned or IMU-aided position until GPS can be trusted again.

pub mod config;
pub mod consumers;
pub mod correction;
pub mod detectors;
pub mod error;
pub mod geo_math;
pub mod pipeline;
pub mod sources;
pub mod types;

pub use config::{IntervalPolicy, TrackerConfig};
pub use correction::{
    CorrectionOutcome, DeadReckoner, DegradedReason, ImuFallbackManager, MotionEstimate,
    PathCorrector, TrackEvent, TrackState,
};
pub use detectors::VelocityAnomalyDetector;
pub use error::{SourceError, TrackerError, TrackerResult};
pub use pipeline::{DetectionPipeline, RunSummary, StopHandle, StopReason};
pub use types::{CorrectedFix, CorrectionMethod, Fix, ImuSample, TrackMode, Verdict};
