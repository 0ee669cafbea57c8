//! Progress of downloads and installations.
//!
//! Progress is sent over a bounded channel without blocking the worker. If the buffer is
//! full the value is dropped, so a slow consumer may miss intermediate values. Only the
//! final value sent by [`ProgressSender::finish`] is guaranteed to be observed by a
//! consumer draining the channel until it is closed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use flume::Receiver;

/// Capacity of progress channels.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 10;

/// Sending half of a progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: flume::Sender<u8>,
}

impl ProgressSender {
    pub fn new(tx: flume::Sender<u8>) -> Self {
        Self { tx }
    }

    /// Create a bounded progress channel.
    pub fn channel(capacity: usize) -> (Self, Receiver<u8>) {
        let (tx, rx) = flume::bounded(capacity);
        (Self::new(tx), rx)
    }

    /// Send the progress after `done` out of `total` steps, dropping it if the buffer
    /// is full.
    pub fn step(&self, done: usize, total: usize) {
        self.tx.try_send(percent(done, total)).ok();
    }

    /// Send the final `100`, waiting for buffer space if necessary.
    pub fn finish(self) {
        self.tx.send(100).ok();
    }
}

/// Percentage of `done` out of `total`, rounded down.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (100 * done.min(total) / total) as u8
}

/// Most recent progress of a state, shared with the reporting path.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    value: Arc<AtomicU8>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u8 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: u8) {
        self.value.store(value.min(100), Ordering::Relaxed);
    }
}
