pub mod dead_reckoner;
pub mod imu_fallback;
pub mod path_corrector;

pub use dead_reckoner::{DeadReckoner, MotionEstimate};
pub use imu_fallback::{ImuCorrelator, ImuFallbackManager, ImuPropagation};
pub use path_corrector::{
    CorrectionOutcome, DegradedReason, PathCorrector, TrackEvent, TrackState,
};
