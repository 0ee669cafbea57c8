//! Drives the states of the update flow.

use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, info, warn};
use updatehub_hooks::{Stage, TransitionFlow};

use crate::error::{error_chain, AgentError, BackendError, ErrorKind};
use crate::hub::UpdateHub;
use crate::progress::ProgressTracker;
use crate::states::{
    CancelSlot, ErrorState, IdleState, State, StatusMap, Transition, UpdateHubState,
};

/// Current state together with the context it is handled in.
#[derive(Debug)]
struct ControllerState {
    hub: UpdateHub,
    current: Box<dyn State>,
}

/// Parts of the current state which are accessible while it is being handled.
#[derive(Debug)]
struct StateHandle {
    id: UpdateHubState,
    cancel: Option<CancelSlot>,
    progress: Option<ProgressTracker>,
    error: Option<AgentError>,
}

impl StateHandle {
    fn of(state: &dyn State) -> Self {
        Self {
            id: state.id(),
            cancel: state.cancel_slot().cloned(),
            progress: state.progress().cloned(),
            error: state.error().cloned(),
        }
    }
}

/// Result of processing a single state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// State after processing.
    pub state: UpdateHubState,
    pub exit_code: Option<i32>,
}

/// Owns the current state and processes it.
///
/// The current state can be inspected and cancelled from other threads while it is
/// being processed.
#[derive(Debug)]
pub struct Controller {
    state: Mutex<ControllerState>,
    handle: Mutex<StateHandle>,
}

impl Controller {
    /// Controller starting with the state given by the polling schedule.
    pub fn new(mut hub: UpdateHub) -> Self {
        let initial = hub.start_polling();
        Self::with_state(hub, initial)
    }

    pub fn with_state(hub: UpdateHub, initial: Box<dyn State>) -> Self {
        Self {
            handle: Mutex::new(StateHandle::of(initial.as_ref())),
            state: Mutex::new(ControllerState {
                hub,
                current: initial,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handle(&self) -> MutexGuard<'_, StateHandle> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifier of the current state.
    pub fn current_state(&self) -> UpdateHubState {
        self.lock_handle().id
    }

    /// Status of the current state, including progress while it is being handled.
    pub fn status(&self) -> StatusMap {
        let handle = self.lock_handle();
        let mut status = StatusMap::new();
        status.insert("status", handle.id.to_string());
        if let Some(progress) = &handle.progress {
            status.insert("progress", progress.get().to_string());
        }
        if let Some(error) = &handle.error {
            status.insert("error", error.message().to_owned());
        }
        status
    }

    /// Cancel the current state in favor of `next`.
    ///
    /// Returns `false` if the current state cannot be cancelled.
    pub fn cancel(&self, next: Box<dyn State>) -> bool {
        let handle = self.lock_handle();
        match &handle.cancel {
            Some(slot) => {
                info!("cancelling state {} in favor of {}", handle.id, next.id());
                slot.cancel(true, next)
            }
            None => {
                debug!("state {} cannot be cancelled", handle.id);
                false
            }
        }
    }

    /// Run a closure with the context, while no state is processed.
    pub fn with_hub<R>(&self, func: impl FnOnce(&mut UpdateHub) -> R) -> R {
        func(&mut self.lock_state().hub)
    }

    /// Report the current state to the server.
    ///
    /// Only states belonging to an update are reported, each at most once in a row.
    /// Returns whether a report has been sent.
    pub fn report_current_state(&self) -> Result<bool, BackendError> {
        let mut state = self.lock_state();
        let ControllerState { hub, current } = &mut *state;
        report(hub, current.as_ref())
    }

    /// Process the current state and advance to the next one.
    pub fn process_current_state(&self) -> Step {
        let mut guard = self.lock_state();
        let ControllerState { hub, current } = &mut *guard;
        if let Err(error) = report(hub, current.as_ref()) {
            warn!("unable to report state {}: {}", current.id(), error_chain(&error));
        }
        let state = mem::replace(current, Box::new(IdleState::new()));
        let id = state.id();
        info!("handling state {id}");
        let transition = run_state(hub, state);
        if transition.cancelled {
            info!("state {id} cancelled, continuing with {}", transition.next.id());
        }
        *current = transition.next;
        *self.lock_handle() = StateHandle::of(current.as_ref());
        Step {
            state: current.id(),
            exit_code: current.exit_code(),
        }
    }
}

fn report(hub: &mut UpdateHub, state: &dyn State) -> Result<bool, BackendError> {
    let Some(metadata) = state.update_metadata() else {
        return Ok(false);
    };
    let id = state.id();
    if hub.last_reported_state == Some(id) {
        return Ok(false);
    }
    hub.backends.reporter.report_state(
        &hub.api,
        metadata.package_uid(),
        id.as_str(),
        state.error().map(AgentError::message),
        &hub.firmware,
    )?;
    debug!("reported state {id}");
    hub.last_reported_state = Some(id);
    Ok(true)
}

/// Handle a state surrounded by the state-change callbacks.
fn run_state(hub: &mut UpdateHub, state: Box<dyn State>) -> Transition {
    let id = state.id();
    if id == UpdateHubState::Error {
        return state.handle(hub);
    }
    match hub.callbacks.state_change(Stage::Enter, id.as_str()) {
        Ok(TransitionFlow::Unchanged) => {}
        Ok(TransitionFlow::Cancelled) => return Transition::to(IdleState::new()),
        Ok(TransitionFlow::Postponed(delay)) => {
            info!("postponing state {id} by {}s", delay.as_secs());
            if let Some(slot) = state.cancel_slot() {
                if let Some(next) = slot.wait_timeout(delay) {
                    return Transition::cancelled(next);
                }
            } else {
                thread::sleep(delay);
            }
            return Transition::to_boxed(state);
        }
        Err(error) => return callback_failed(error, state.as_ref()),
    }
    let metadata = state.update_metadata().cloned();
    let transition = state.handle(hub);
    if transition.cancelled {
        return transition;
    }
    match hub.callbacks.state_change(Stage::Leave, id.as_str()) {
        Ok(TransitionFlow::Unchanged) => transition,
        Ok(TransitionFlow::Cancelled) => Transition::to(IdleState::new()),
        Ok(TransitionFlow::Postponed(delay)) => {
            info!("postponing transition to {} by {}s", transition.next.id(), delay.as_secs());
            thread::sleep(delay);
            transition
        }
        Err(error) => Transition::to(ErrorState::new(
            AgentError::from_error(ErrorKind::Fatal, &error),
            metadata,
        )),
    }
}

fn callback_failed(error: updatehub_hooks::HookError, state: &dyn State) -> Transition {
    Transition::to(ErrorState::new(
        AgentError::from_error(ErrorKind::Fatal, &error),
        state.update_metadata().cloned(),
    ))
}
