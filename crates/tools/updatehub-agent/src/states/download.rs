use std::thread;

use flume::{Receiver, Selector, Sender};
use tracing::{debug, info, warn};

use super::{CancelSlot, ErrorState, InstallingState, State, Transition, UpdateHubState};
use crate::error::{error_chain, AgentError, ErrorKind};
use crate::hub::UpdateHub;
use crate::metadata::UpdateMetadata;
use crate::polling::download_retry_delay;
use crate::progress::{ProgressSender, ProgressTracker, PROGRESS_CHANNEL_CAPACITY};

/// Downloads the objects of an update.
///
/// Timeouts and checksum mismatches are retried with an increasing delay until the
/// download succeeds or the state is cancelled.
#[derive(Debug)]
pub struct DownloadingState {
    metadata: UpdateMetadata,
    progress: ProgressTracker,
    cancel: CancelSlot,
}

enum Event {
    Progress(u8),
    Finished,
    Cancelled,
}

impl DownloadingState {
    pub fn new(metadata: UpdateMetadata) -> Self {
        Self {
            metadata,
            progress: ProgressTracker::new(),
            cancel: CancelSlot::new(),
        }
    }

    /// Handle for observing the progress while the state is handled.
    pub fn progress_tracker(&self) -> ProgressTracker {
        self.progress.clone()
    }

    /// Track progress until the download finished, forwarding cancellation to the copy.
    fn watch(&self, progress_rx: &Receiver<u8>, copy_cancel: &Sender<()>) {
        loop {
            let event = Selector::new()
                .recv(progress_rx, |value| match value {
                    Ok(value) => Event::Progress(value),
                    Err(_) => Event::Finished,
                })
                .recv(self.cancel.signal(), |_| Event::Cancelled)
                .wait();
            match event {
                Event::Progress(value) => self.progress.set(value),
                Event::Finished => break,
                Event::Cancelled => {
                    info!("cancelling download");
                    copy_cancel.try_send(()).ok();
                }
            }
        }
    }
}

impl State for DownloadingState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::Downloading
    }

    fn cancel_slot(&self) -> Option<&CancelSlot> {
        Some(&self.cancel)
    }

    fn update_metadata(&self) -> Option<&UpdateMetadata> {
        Some(&self.metadata)
    }

    fn progress(&self) -> Option<&ProgressTracker> {
        Some(&self.progress)
    }

    fn handle(self: Box<Self>, hub: &mut UpdateHub) -> Transition {
        let hub: &UpdateHub = hub;
        let mut attempts = 0;
        loop {
            if let Some(next) = self.cancel.take_pending() {
                return Transition::cancelled(next);
            }
            let (copy_cancel_tx, copy_cancel_rx) = flume::bounded(1);
            let (progress, progress_rx) = ProgressSender::channel(PROGRESS_CHANNEL_CAPACITY);
            let metadata = &self.metadata;
            let copy_cancel = &copy_cancel_rx;
            let result = thread::scope(|scope| {
                let worker =
                    scope.spawn(move || hub.download_update(metadata, copy_cancel, progress));
                self.watch(&progress_rx, &copy_cancel_tx);
                worker
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            });
            if let Some(next) = self.cancel.take_pending() {
                return Transition::cancelled(next);
            }
            match result {
                Ok(()) => {
                    debug!("download of {} finished", self.metadata.package_uid());
                    return Transition::to(DownloadedState::new(self.metadata));
                }
                Err(error) if error.is_retryable() => {
                    attempts += 1;
                    let delay = download_retry_delay(hub.download_retry_base, attempts);
                    warn!(
                        "{}, retrying download in {}s",
                        error_chain(&error),
                        delay.as_secs()
                    );
                    if let Some(next) = self.cancel.wait_timeout(delay) {
                        return Transition::cancelled(next);
                    }
                }
                Err(error) => {
                    let error = AgentError::from_error(ErrorKind::Transient, &error);
                    return Transition::to(ErrorState::new(error, Some(self.metadata)));
                }
            }
        }
    }
}

/// All objects of an update have been downloaded.
#[derive(Debug)]
pub struct DownloadedState {
    metadata: UpdateMetadata,
}

impl DownloadedState {
    pub fn new(metadata: UpdateMetadata) -> Self {
        Self { metadata }
    }
}

impl State for DownloadedState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::Downloaded
    }

    fn update_metadata(&self) -> Option<&UpdateMetadata> {
        Some(&self.metadata)
    }

    fn handle(self: Box<Self>, _: &mut UpdateHub) -> Transition {
        Transition::to(InstallingState::new(self.metadata))
    }
}
