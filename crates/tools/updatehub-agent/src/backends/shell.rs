use tracing::info;
use xscript::{read_str, run, Run};

use super::{ActiveInactiveBackend, Rebooter};
use crate::error::BackendError;

pub const ACTIVE_GET_COMMAND: &str = "updatehub-active-get";
pub const ACTIVE_SET_COMMAND: &str = "updatehub-active-set";

/// Active/inactive backend using the `updatehub-active-*` executables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellActiveInactive;

impl ActiveInactiveBackend for ShellActiveInactive {
    fn active(&self) -> Result<u8, BackendError> {
        let output = read_str!([ACTIVE_GET_COMMAND]).map_err(|error| {
            BackendError::new(format!("unable to run `{ACTIVE_GET_COMMAND}`: {error}"))
        })?;
        parse_active(&output)
    }

    fn set_active(&self, slot: u8) -> Result<(), BackendError> {
        info!("setting active slot to {slot}");
        let slot = slot.to_string();
        run!([ACTIVE_SET_COMMAND, &slot]).map_err(|error| {
            BackendError::new(format!("unable to run `{ACTIVE_SET_COMMAND}`: {error}"))
        })?;
        Ok(())
    }
}

fn parse_active(output: &str) -> Result<u8, BackendError> {
    output
        .trim()
        .parse()
        .map_err(|_| BackendError::new(format!("invalid active slot {:?}", output.trim())))
}

/// Syncs all file systems and reboots.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRebooter;

impl Rebooter for ShellRebooter {
    fn reboot(&self) -> Result<(), BackendError> {
        info!("rebooting the system");
        nix::unistd::sync();
        run!(["reboot"])
            .map_err(|error| BackendError::new(format!("unable to run `reboot`: {error}")))?;
        Ok(())
    }
}
