//! Sinks for the corrected stream.
//!
//! Consumers are called synchronously from the pipeline thread and must
//! return quickly. Wrap slow sinks in `QueuedConsumer`.

pub mod live_status;
pub mod queued;
pub mod recorder;

use std::sync::{Arc, Mutex};

use crate::correction::TrackEvent;
use crate::types::CorrectedFix;

pub use live_status::{LiveStatus, LiveStatusWriter};
pub use queued::QueuedConsumer;
pub use recorder::JsonLinesRecorder;

pub trait FixConsumer: Send {
    fn consume(&mut self, fix: &CorrectedFix);

    fn on_event(&mut self, _event: &TrackEvent) {}

    /// Called once when the run ends.
    fn finish(&mut self) {}
}

impl<C: FixConsumer + ?Sized> FixConsumer for Box<C> {
    fn consume(&mut self, fix: &CorrectedFix) {
        (**self).consume(fix)
    }

    fn on_event(&mut self, event: &TrackEvent) {
        (**self).on_event(event)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}

/// Logs replaced fixes; trusted ones only at debug level.
#[derive(Debug, Default)]
pub struct LogConsumer;

impl FixConsumer for LogConsumer {
    fn consume(&mut self, fix: &CorrectedFix) {
        if fix.is_replaced() {
            log::info!(
                "t={:.1}s {:?}: ({:.6}, {:.6}) -> ({:.6}, {:.6}) conf {:.1} err {:.1} m",
                fix.raw.timestamp,
                fix.method,
                fix.raw.latitude,
                fix.raw.longitude,
                fix.output.latitude,
                fix.output.longitude,
                fix.confidence,
                fix.propagation_error_m
            );
        } else {
            log::debug!(
                "t={:.1}s trusted ({:.6}, {:.6})",
                fix.output.timestamp,
                fix.output.latitude,
                fix.output.longitude
            );
        }
    }
}

/// Keeps every fix and event in memory behind a shared handle.
#[derive(Clone, Debug, Default)]
pub struct MemoryRecorder {
    fixes: Arc<Mutex<Vec<CorrectedFix>>>,
    events: Arc<Mutex<Vec<TrackEvent>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fixes(&self) -> Vec<CorrectedFix> {
        self.fixes.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<TrackEvent> {
        self.events.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl FixConsumer for MemoryRecorder {
    fn consume(&mut self, fix: &CorrectedFix) {
        if let Ok(mut fixes) = self.fixes.lock() {
            fixes.push(fix.clone());
        }
    }

    fn on_event(&mut self, event: &TrackEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
