use std::thread;

use tracing::info;

use super::{
    CancelSlot, ErrorState, IdleState, RebootingState, State, Transition, UpdateHubState,
};
use crate::error::{AgentError, ErrorKind};
use crate::hub::UpdateHub;
use crate::metadata::UpdateMetadata;
use crate::progress::{ProgressSender, ProgressTracker, PROGRESS_CHANNEL_CAPACITY};

/// Installs a downloaded update.
///
/// The installation itself is not interrupted. A cancellation requested meanwhile
/// takes effect once it is done. A finished installation is recorded in any case.
#[derive(Debug)]
pub struct InstallingState {
    metadata: UpdateMetadata,
    progress: ProgressTracker,
    cancel: CancelSlot,
}

impl InstallingState {
    pub fn new(metadata: UpdateMetadata) -> Self {
        Self {
            metadata,
            progress: ProgressTracker::new(),
            cancel: CancelSlot::new(),
        }
    }

    pub fn progress_tracker(&self) -> ProgressTracker {
        self.progress.clone()
    }
}

impl State for InstallingState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::Installing
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
        if let Some(next) = self.cancel.take_pending() {
            return Transition::cancelled(next);
        }
        if hub.last_installed_package_uid.as_deref() == Some(self.metadata.package_uid()) {
            info!("update {} is already installed", self.metadata.package_uid());
            return Transition::to(IdleState::new());
        }
        let (progress, progress_rx) = ProgressSender::channel(PROGRESS_CHANNEL_CAPACITY);
        let metadata = &self.metadata;
        let shared: &UpdateHub = hub;
        let result = thread::scope(|scope| {
            let worker = scope.spawn(move || shared.install_update(metadata, progress));
            for value in progress_rx.iter() {
                self.progress.set(value);
            }
            worker
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
        });
        if result.is_ok() {
            // Recorded before honoring a cancellation, the active slot has switched.
            hub.last_installed_package_uid = Some(self.metadata.package_uid().to_owned());
        }
        if let Some(next) = self.cancel.take_pending() {
            return Transition::cancelled(next);
        }
        match result {
            Ok(()) => Transition::to(InstalledState::new(self.metadata)),
            Err(error) => {
                let error = AgentError::from_error(ErrorKind::Transient, &error);
                Transition::to(ErrorState::new(error, Some(self.metadata)))
            }
        }
    }
}

/// An update has been installed and awaits the reboot.
#[derive(Debug)]
pub struct InstalledState {
    metadata: UpdateMetadata,
}

impl InstalledState {
    pub fn new(metadata: UpdateMetadata) -> Self {
        Self { metadata }
    }
}

impl State for InstalledState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::Installed
    }

    fn update_metadata(&self) -> Option<&UpdateMetadata> {
        Some(&self.metadata)
    }

    fn handle(self: Box<Self>, hub: &mut UpdateHub) -> Transition {
        hub.last_installed_package_uid = Some(self.metadata.package_uid().to_owned());
        Transition::to(RebootingState::new(self.metadata))
    }
}
