use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use crate::consumers::FixConsumer;
use crate::correction::TrackEvent;
use crate::types::CorrectedFix;

enum Message {
    Fix(CorrectedFix),
    Event(TrackEvent),
}

/// Runs a slow consumer on its own thread behind a bounded queue.
///
/// When the queue is full the oldest pending message is discarded, so the
/// pipeline never waits on the inner consumer.
pub struct QueuedConsumer {
    tx: Option<Sender<Message>>,
    // Kept to evict the oldest entry when full.
    rx: Receiver<Message>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl QueuedConsumer {
    pub fn spawn<C: FixConsumer + 'static>(inner: C, capacity: usize) -> Self {
        let (tx, rx) = bounded::<Message>(capacity.max(1));
        let worker_rx = rx.clone();
        let worker = thread::spawn(move || {
            let mut inner = inner;
            for message in worker_rx.iter() {
                match message {
                    Message::Fix(fix) => inner.consume(&fix),
                    Message::Event(event) => inner.on_event(&event),
                }
            }
            inner.finish();
        });

        Self {
            tx: Some(tx),
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
            worker: Some(worker),
        }
    }

    /// Messages discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send(&mut self, message: Message) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let mut message = message;
        loop {
            match tx.try_send(message) {
                Ok(()) => return,
                Err(TrySendError::Full(returned)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    message = returned;
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::warn!("Queued consumer worker has stopped");
                    self.tx = None;
                    return;
                }
            }
        }
    }
}

impl FixConsumer for QueuedConsumer {
    fn consume(&mut self, fix: &CorrectedFix) {
        self.send(Message::Fix(fix.clone()));
    }

    fn on_event(&mut self, event: &TrackEvent) {
        self.send(Message::Event(event.clone()));
    }

    fn finish(&mut self) {
        // Closing the sender lets the worker drain and exit.
        self.tx = None;
        // Only the first call joins and reports; Drop calls this again.
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.join().is_err() {
            log::error!("Queued consumer worker panicked");
        }
        let dropped = self.dropped();
        if dropped > 0 {
            log::warn!("Queued consumer dropped {} messages", dropped);
        }
    }
}

impl Drop for QueuedConsumer {
    fn drop(&mut self) {
        self.finish();
    }
}
