use tracing::info;

use super::{ErrorState, IdleState, State, Transition, UpdateHubState};
use crate::error::{AgentError, ErrorKind};
use crate::hub::UpdateHub;
use crate::metadata::UpdateMetadata;

/// Reboots into the freshly installed update.
#[derive(Debug)]
pub struct RebootingState {
    metadata: UpdateMetadata,
}

impl RebootingState {
    pub fn new(metadata: UpdateMetadata) -> Self {
        Self { metadata }
    }
}

impl State for RebootingState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::Rebooting
    }

    fn update_metadata(&self) -> Option<&UpdateMetadata> {
        Some(&self.metadata)
    }

    fn handle(self: Box<Self>, hub: &mut UpdateHub) -> Transition {
        info!("rebooting to apply update {}", self.metadata.package_uid());
        match hub.reboot() {
            Ok(()) => Transition::to(IdleState::new()),
            Err(error) => {
                let error = AgentError::from_error(ErrorKind::Fatal, &error);
                Transition::to(ErrorState::new(error, Some(self.metadata)))
            }
        }
    }
}

/// The update offered by the server has already been installed.
#[derive(Debug)]
pub struct WaitingForRebootState {
    metadata: UpdateMetadata,
}

impl WaitingForRebootState {
    pub fn new(metadata: UpdateMetadata) -> Self {
        Self { metadata }
    }
}

impl State for WaitingForRebootState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::WaitingForReboot
    }

    fn update_metadata(&self) -> Option<&UpdateMetadata> {
        Some(&self.metadata)
    }

    fn handle(self: Box<Self>, _: &mut UpdateHub) -> Transition {
        Transition::to(IdleState::new())
    }
}
