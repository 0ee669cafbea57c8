use tracing::info;

use super::{CancelSlot, State, Transition, UpdateHubState};
use crate::hub::UpdateHub;

/// Resting state between update cycles.
///
/// Continues with the polling schedule or, if polling is disabled, waits until
/// cancelled.
#[derive(Debug, Default)]
pub struct IdleState {
    cancel: CancelSlot,
}

impl IdleState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State for IdleState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::Idle
    }

    fn cancel_slot(&self) -> Option<&CancelSlot> {
        Some(&self.cancel)
    }

    fn handle(self: Box<Self>, hub: &mut UpdateHub) -> Transition {
        if let Some(next) = self.cancel.take_pending() {
            return Transition::cancelled(next);
        }
        if !hub.settings.polling.enabled {
            info!("polling is disabled, waiting");
            return Transition::cancelled(self.cancel.wait());
        }
        Transition::to_boxed(hub.start_polling())
    }
}
