use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};

use super::State;

/// Slot through which a state can be cancelled from another thread.
///
/// Cancelling stores the requested next state and signals the waiting state. A
/// cancellation requested before the state is handled is observed as soon as the state
/// starts waiting.
#[derive(Debug, Clone)]
pub struct CancelSlot {
    shared: Arc<CancelShared>,
}

#[derive(Debug)]
struct CancelShared {
    pending: Mutex<Option<Box<dyn State>>>,
    signal_tx: Sender<()>,
    signal_rx: Receiver<()>,
}

impl CancelSlot {
    pub fn new() -> Self {
        let (signal_tx, signal_rx) = flume::bounded(1);
        Self {
            shared: Arc::new(CancelShared {
                pending: Mutex::new(None),
                signal_tx,
                signal_rx,
            }),
        }
    }

    /// Request cancellation in favor of `next`, returning `ok`.
    ///
    /// A later request replaces an earlier one which has not been observed yet.
    pub fn cancel(&self, ok: bool, next: Box<dyn State>) -> bool {
        *self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(next);
        self.shared.signal_tx.try_send(()).ok();
        ok
    }

    /// Take the requested next state, if any.
    pub fn take_pending(&self) -> Option<Box<dyn State>> {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Wait until cancelled and return the requested next state.
    pub fn wait(&self) -> Box<dyn State> {
        loop {
            if let Some(next) = self.take_pending() {
                return next;
            }
            // The slot holds both ends, so this never disconnects.
            self.shared.signal_rx.recv().ok();
        }
    }

    /// Wait until cancelled or the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Box<dyn State>> {
        if let Some(next) = self.take_pending() {
            return Some(next);
        }
        match self.shared.signal_rx.recv_timeout(timeout) {
            Ok(()) => self.take_pending(),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Channel signaled on cancellation, for use in selections.
    pub fn signal(&self) -> &Receiver<()> {
        &self.shared.signal_rx
    }
}

impl Default for CancelSlot {
    fn default() -> Self {
        Self::new()
    }
}
