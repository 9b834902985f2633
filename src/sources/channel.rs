use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::Receiver;

use crate::error::SourceError;
use crate::sources::{FixSource, ImuSource};
use crate::types::{Fix, ImuSample};

/// Fixes delivered by a producer task over a tokio channel.
///
/// `next_fix` blocks the calling thread, so run the pipeline on a blocking
/// thread (`tokio::task::spawn_blocking`), never inside an async task.
pub struct ChannelFixSource {
    rx: Receiver<Fix>,
}

impl ChannelFixSource {
    pub fn new(rx: Receiver<Fix>) -> Self {
        Self { rx }
    }
}

impl FixSource for ChannelFixSource {
    fn next_fix(&mut self) -> Result<Fix, SourceError> {
        // All senders gone: the producer finished.
        self.rx.blocking_recv().ok_or(SourceError::Exhausted)
    }
}

pub struct ChannelImuSource {
    rx: Receiver<ImuSample>,
}

impl ChannelImuSource {
    pub fn new(rx: Receiver<ImuSample>) -> Self {
        Self { rx }
    }
}

impl ImuSource for ChannelImuSource {
    fn poll_sample(&mut self) -> Result<Option<ImuSample>, SourceError> {
        match self.rx.try_recv() {
            Ok(sample) => Ok(Some(sample)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SourceError::Exhausted),
        }
    }
}
