use tracing::{error, warn};

use super::{IdleState, State, Transition, UpdateHubState};
use crate::error::{error_chain, AgentError};
use crate::hub::UpdateHub;
use crate::metadata::UpdateMetadata;

/// Exit code of the agent after a fatal error.
pub const EXIT_FAILURE: i32 = 1;

/// Something went wrong.
///
/// Transient errors return to idle, fatal errors terminate the agent.
#[derive(Debug)]
pub struct ErrorState {
    error: AgentError,
    metadata: Option<UpdateMetadata>,
}

impl ErrorState {
    pub fn new(error: AgentError, metadata: Option<UpdateMetadata>) -> Self {
        Self { error, metadata }
    }
}

impl State for ErrorState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::Error
    }

    fn update_metadata(&self) -> Option<&UpdateMetadata> {
        self.metadata.as_ref()
    }

    fn error(&self) -> Option<&AgentError> {
        Some(&self.error)
    }

    fn handle(self: Box<Self>, hub: &mut UpdateHub) -> Transition {
        if let Err(hook_error) = hub.callbacks.error(self.error.message()) {
            warn!("error callback failed: {}", error_chain(&hook_error));
        }
        if self.error.is_fatal() {
            warn!("fatal error, exiting: {}", self.error.message());
            return Transition::to(ExitState::new(EXIT_FAILURE));
        }
        error!("{}", self.error.message());
        Transition::to(IdleState::new())
    }
}

/// Terminal state.
#[derive(Debug)]
pub struct ExitState {
    code: i32,
}

impl ExitState {
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

impl State for ExitState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::Exit
    }

    fn exit_code(&self) -> Option<i32> {
        Some(self.code)
    }

    fn handle(self: Box<Self>, _: &mut UpdateHub) -> Transition {
        panic!("the exit state must never be handled")
    }
}
