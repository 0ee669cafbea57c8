//! States of the update flow.
//!
//! Each state is a value implementing [`State`]. Handling a state consumes it and
//! produces the next one. States which wait for something can be cancelled from other
//! threads through their [`CancelSlot`], in which case handling returns early with the
//! state given to [`State::cancel`].

use std::collections::BTreeMap;
use std::fmt;

use crate::error::AgentError;
use crate::hub::UpdateHub;
use crate::metadata::UpdateMetadata;
use crate::progress::ProgressTracker;

pub mod cancel;
pub mod download;
pub mod error;
pub mod idle;
pub mod install;
pub mod poll;
pub mod probe;
pub mod reboot;

pub use cancel::CancelSlot;
pub use download::{DownloadedState, DownloadingState};
pub use error::{ErrorState, ExitState};
pub use idle::IdleState;
pub use install::{InstalledState, InstallingState};
pub use poll::PollState;
pub use probe::UpdateProbeState;
pub use reboot::{RebootingState, WaitingForRebootState};

/// Identifier of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateHubState {
    Idle,
    Poll,
    UpdateProbe,
    Downloading,
    Downloaded,
    Installing,
    Installed,
    WaitingForReboot,
    Rebooting,
    Exit,
    Error,
}

impl UpdateHubState {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateHubState::Idle => "idle",
            UpdateHubState::Poll => "poll",
            UpdateHubState::UpdateProbe => "probe",
            UpdateHubState::Downloading => "downloading",
            UpdateHubState::Downloaded => "downloaded",
            UpdateHubState::Installing => "installing",
            UpdateHubState::Installed => "installed",
            UpdateHubState::WaitingForReboot => "waiting-for-reboot",
            UpdateHubState::Rebooting => "rebooting",
            UpdateHubState::Exit => "exit",
            UpdateHubState::Error => "error",
        }
    }
}

impl fmt::Display for UpdateHubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a state as exposed to observers.
pub type StatusMap = BTreeMap<&'static str, String>;

/// Result of handling a state.
#[derive(Debug)]
pub struct Transition {
    pub next: Box<dyn State>,
    /// Handling has been cut short by a cancellation.
    pub cancelled: bool,
}

impl Transition {
    pub fn to(next: impl State + 'static) -> Self {
        Self::to_boxed(Box::new(next))
    }

    pub fn to_boxed(next: Box<dyn State>) -> Self {
        Self {
            next,
            cancelled: false,
        }
    }

    pub fn cancelled(next: Box<dyn State>) -> Self {
        Self {
            next,
            cancelled: true,
        }
    }
}

/// State of the update flow.
pub trait State: Send + fmt::Debug {
    fn id(&self) -> UpdateHubState;

    /// Do the work of the state and produce the next one.
    fn handle(self: Box<Self>, hub: &mut UpdateHub) -> Transition;

    /// Slot through which the state can be cancelled, if it is cancellable.
    fn cancel_slot(&self) -> Option<&CancelSlot> {
        None
    }

    /// Request cancellation in favor of `next`.
    ///
    /// Returns `ok` unchanged, states which are not cancellable ignore the request.
    fn cancel(&self, ok: bool, next: Box<dyn State>) -> bool {
        match self.cancel_slot() {
            Some(slot) => slot.cancel(ok, next),
            None => ok,
        }
    }

    /// Update the state is working on.
    fn update_metadata(&self) -> Option<&UpdateMetadata> {
        None
    }

    /// Progress of the state, for states doing work in the background.
    fn progress(&self) -> Option<&ProgressTracker> {
        None
    }

    fn error(&self) -> Option<&AgentError> {
        None
    }

    /// Exit code, only for the exit state.
    fn exit_code(&self) -> Option<i32> {
        None
    }

    fn to_status_map(&self) -> StatusMap {
        let mut status = StatusMap::new();
        status.insert("status", self.id().to_string());
        if let Some(progress) = self.progress() {
            status.insert("progress", progress.get().to_string());
        }
        if let Some(error) = self.error() {
            status.insert("error", error.message().to_owned());
        }
        status
    }
}
