//! External callback scripts.
//!
//! Devices can customize the update flow by placing executables into the firmware
//! metadata directory. All of them are optional; a missing script behaves as if it had
//! succeeded without output.
//!
//! - `state-change-callback enter|leave <state>` runs around every state transition and
//!   prints a [`TransitionFlow`].
//! - `error-callback <message>` runs whenever the agent enters the error state.
//! - `validate-callback` runs on start to validate a freshly booted installation.
//! - `rollback-callback` runs when validation failed, before switching back.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};
use xscript::{read_str, run, Run};

pub use crate::error::HookError;

pub mod error;

pub const STATE_CHANGE_CALLBACK: &str = "state-change-callback";
pub const ERROR_CALLBACK: &str = "error-callback";
pub const VALIDATE_CALLBACK: &str = "validate-callback";
pub const ROLLBACK_CALLBACK: &str = "rollback-callback";

/// How a state transition should proceed according to the state-change callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionFlow {
    /// Proceed as usual.
    Unchanged,
    /// Abandon the transition.
    Cancelled,
    /// Proceed after the given delay.
    Postponed(Duration),
}

impl TransitionFlow {
    /// Parse the output of a state-change callback.
    ///
    /// Returns [`None`] if the output is not one of `""`, `cancel`, or
    /// `try_again <seconds>`.
    pub fn parse(output: &str) -> Option<Self> {
        let output = output.trim();
        if output.is_empty() {
            return Some(Self::Unchanged);
        }
        if output == "cancel" {
            return Some(Self::Cancelled);
        }
        let (command, seconds) = output.split_once(char::is_whitespace)?;
        if command != "try_again" {
            return None;
        }
        let seconds = seconds.trim().parse().ok()?;
        Some(Self::Postponed(Duration::from_secs(seconds)))
    }
}

/// Stage of a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Before the state is handled.
    Enter,
    /// After the state has been handled.
    Leave,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Enter => "enter",
            Stage::Leave => "leave",
        }
    }
}

/// Callback scripts of a device.
#[derive(Debug, Clone)]
pub struct Callbacks {
    /// Directory containing the scripts.
    directory: Cow<'static, Path>,
}

impl Callbacks {
    /// Callbacks located in the given directory.
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory: Cow::Owned(directory),
        }
    }

    /// Callbacks that never do anything.
    pub fn disabled() -> Self {
        Self {
            directory: Cow::Borrowed(Path::new("/nonexistent")),
        }
    }

    /// Path of the script with the given name, if it exists.
    fn script(&self, name: &str) -> Option<PathBuf> {
        let path = self.directory.join(name);
        path.is_file().then_some(path)
    }

    /// Run the state-change callback for the given stage and state.
    pub fn state_change(&self, stage: Stage, state: &str) -> Result<TransitionFlow, HookError> {
        let Some(script) = self.script(STATE_CHANGE_CALLBACK) else {
            return Ok(TransitionFlow::Unchanged);
        };
        debug!("running state-change callback ({} {state})", stage.as_str());
        let output = read_str!([&script, stage.as_str(), state]).map_err(|error| {
            HookError::Failed {
                name: STATE_CHANGE_CALLBACK,
                message: error.to_string(),
            }
        })?;
        let flow = TransitionFlow::parse(&output).ok_or_else(|| HookError::InvalidOutput {
            name: STATE_CHANGE_CALLBACK,
            output: output.clone(),
        })?;
        if flow != TransitionFlow::Unchanged {
            info!("state-change callback requested {flow:?} ({} {state})", stage.as_str());
        }
        Ok(flow)
    }

    /// Run the error callback with the given message.
    pub fn error(&self, message: &str) -> Result<(), HookError> {
        self.run_plain(ERROR_CALLBACK, Some(message))
    }

    /// Run the validation callback.
    ///
    /// Returns whether the installation is valid.
    pub fn validate(&self) -> bool {
        let Some(script) = self.script(VALIDATE_CALLBACK) else {
            return true;
        };
        info!("validating installation");
        run!([&script]).is_ok()
    }

    /// Run the rollback callback.
    pub fn rollback(&self) -> Result<(), HookError> {
        self.run_plain(ROLLBACK_CALLBACK, None)
    }

    fn run_plain(&self, name: &'static str, argument: Option<&str>) -> Result<(), HookError> {
        let Some(script) = self.script(name) else {
            return Ok(());
        };
        info!("running callback {name}");
        let result = match argument {
            Some(argument) => run!([&script, argument]),
            None => run!([&script]),
        };
        result.map_err(|error| HookError::Failed {
            name,
            message: error.to_string(),
        })?;
        Ok(())
    }
}
