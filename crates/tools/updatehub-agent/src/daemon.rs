use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::controller::Controller;
use crate::states::{ExitState, UpdateHubState};

/// Processes states until stopped or the exit state is reached.
#[derive(Debug)]
pub struct Daemon {
    controller: Arc<Controller>,
    stopped: AtomicBool,
}

impl Daemon {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Request the daemon to stop, waking up the current state if it waits.
    pub fn stop(&self) {
        info!("stopping");
        self.stopped.store(true, Ordering::SeqCst);
        self.controller.cancel(Box::new(ExitState::new(0)));
    }

    /// Run the daemon, returning the exit code.
    pub fn run(&self) -> i32 {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return 0;
            }
            let step = self.controller.process_current_state();
            if step.state == UpdateHubState::Exit {
                return step.exit_code.unwrap_or(0);
            }
        }
    }
}
