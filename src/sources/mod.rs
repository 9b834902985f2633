//! Readers that feed fixes and IMU samples into the pipeline.

pub mod channel;
pub mod log_file;
pub mod simulated;

use std::collections::VecDeque;

use crate::error::SourceError;
use crate::types::{Fix, ImuSample};

pub use channel::{ChannelFixSource, ChannelImuSource};
pub use log_file::RecordedLog;
pub use simulated::Scenario;

/// Pull-based, ordered stream of fixes.
///
/// `Err(SourceError::Exhausted)` ends the stream normally. Any other error
/// is propagated by the pipeline without retry.
pub trait FixSource {
    fn next_fix(&mut self) -> Result<Fix, SourceError>;
}

/// Independent stream of IMU samples, polled between fixes.
pub trait ImuSource {
    /// `Ok(None)` when nothing is pending right now.
    fn poll_sample(&mut self) -> Result<Option<ImuSample>, SourceError>;
}

impl<S: FixSource + ?Sized> FixSource for Box<S> {
    fn next_fix(&mut self) -> Result<Fix, SourceError> {
        (**self).next_fix()
    }
}

impl<S: ImuSource + ?Sized> ImuSource for Box<S> {
    fn poll_sample(&mut self) -> Result<Option<ImuSample>, SourceError> {
        (**self).poll_sample()
    }
}

/// In-memory source over a recorded or generated sequence.
#[derive(Clone, Debug, Default)]
pub struct VecSource<T> {
    items: VecDeque<T>,
}

impl<T> VecSource<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl FixSource for VecSource<Fix> {
    fn next_fix(&mut self) -> Result<Fix, SourceError> {
        self.items.pop_front().ok_or(SourceError::Exhausted)
    }
}

impl ImuSource for VecSource<ImuSample> {
    fn poll_sample(&mut self) -> Result<Option<ImuSample>, SourceError> {
        self.items
            .pop_front()
            .map(Some)
            .ok_or(SourceError::Exhausted)
    }
}

/// A source with no IMU attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoImu;

impl ImuSource for NoImu {
    fn poll_sample(&mut self) -> Result<Option<ImuSample>, SourceError> {
        Err(SourceError::Exhausted)
    }
}
