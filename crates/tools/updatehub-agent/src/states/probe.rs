use chrono::Utc;
use tracing::{info, warn};

use super::{
    DownloadingState, IdleState, PollState, State, Transition, UpdateHubState,
    WaitingForRebootState,
};
use crate::error::error_chain;
use crate::hub::UpdateHub;
use crate::polling::retry_delay;

/// Asks the server for an update.
#[derive(Debug, Default)]
pub struct UpdateProbeState {}

impl UpdateProbeState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State for UpdateProbeState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::UpdateProbe
    }

    fn handle(self: Box<Self>, hub: &mut UpdateHub) -> Transition {
        let retries = hub.settings.runtime.polling.retries;
        let outcome = match hub.probe_update(retries) {
            Ok(outcome) => outcome,
            Err(error) => {
                let polling = &mut hub.settings.runtime.polling;
                polling.retries += 1;
                let delay = retry_delay(polling.retries, hub.settings.polling.interval);
                warn!(
                    "probe failed ({} retries): {}",
                    polling.retries,
                    error_chain(&error)
                );
                hub.save_runtime_settings();
                return Transition::to(PollState::new(delay));
            }
        };
        let polling = &mut hub.settings.runtime.polling;
        polling.retries = 0;
        polling.last_poll = Some(Utc::now());
        polling.probe_asap = false;
        polling.extra_interval = outcome.extra_poll;
        hub.save_runtime_settings();
        match outcome.metadata {
            Some(metadata)
                if hub.last_installed_package_uid.as_deref() == Some(metadata.package_uid()) =>
            {
                info!("update {} is already installed", metadata.package_uid());
                Transition::to(WaitingForRebootState::new(metadata))
            }
            Some(metadata) => {
                info!("update {} available", metadata.package_uid());
                Transition::to(DownloadingState::new(metadata))
            }
            None => match outcome.extra_poll {
                Some(extra_poll) => Transition::to(PollState::new(extra_poll)),
                None => Transition::to(IdleState::new()),
            },
        }
    }
}
