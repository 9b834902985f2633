use thiserror::Error;

/// Errors raised by fix/IMU readers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The source has no more data. Ends a pipeline run normally.
    #[error("source exhausted")]
    Exhausted,

    #[error("source disconnected: {0}")]
    Disconnected(String),

    #[error("source I/O error: {0}")]
    Io(String),

    #[error("source parse error: {0}")]
    Parse(String),
}

/// Tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    /// Zero or negative timestamp delta between two fixes.
    #[error("invalid interval: {previous:.3}s -> {current:.3}s")]
    InvalidInterval { previous: f64, current: f64 },

    /// An IMU integration step failed its displacement bound.
    #[error(
        "IMU sample at {timestamp:.3}s rejected: displacement {displacement_m:.1} m exceeds {bound_m:.1} m"
    )]
    ImuSampleRejected {
        timestamp: f64,
        displacement_m: f64,
        bound_m: f64,
    },

    #[error("invalid fix: {0}")]
    InvalidFix(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TrackerError {
    fn from(e: std::io::Error) -> Self {
        TrackerError::Io(e.to_string())
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
