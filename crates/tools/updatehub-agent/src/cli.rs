//! Definition of the command line interface (CLI).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info};
use updatehub_hooks::Callbacks;
use updatehub_settings::{Settings, SettingsError, SYSTEM_SETTINGS_PATH};

use crate::backends::Backends;
use crate::controller::Controller;
use crate::daemon::Daemon;
use crate::error::error_chain;
use crate::firmware::{FirmwareError, FirmwareMetadata};
use crate::hub::UpdateHub;
use crate::modes::InstallModes;

#[derive(Debug, Parser)]
#[clap(author, about, version)]
pub struct Args {
    /// Path of the system settings.
    #[clap(long, default_value = SYSTEM_SETTINGS_PATH)]
    pub settings: PathBuf,
}

/// Error starting the agent.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("unable to load settings")]
    Settings(#[from] SettingsError),
    #[error("unable to load firmware metadata")]
    Firmware(#[from] FirmwareError),
    #[error("unable to install signal handler")]
    Signal(#[from] ctrlc::Error),
}

/// Run the agent, returning the exit code.
pub fn main() -> Result<i32, StartupError> {
    updatehub_cli::init();

    let args = Args::parse();
    let settings = Settings::load(&args.settings)?;
    let firmware = FirmwareMetadata::load(&settings.firmware.metadata_path)?;
    info!(
        "starting agent for product {} (version {:?})",
        firmware.product_uid, firmware.version
    );
    let backends = Backends::system();
    let mut modes = InstallModes::with_defaults(backends.copy.clone());
    modes.restrict(&settings.update.supported_install_modes);
    let callbacks = Callbacks::new(settings.firmware.metadata_path.clone());
    let hub = UpdateHub::new(settings, firmware, backends, modes, callbacks);
    if let Err(error) = hub.validate_installation() {
        error!("unable to roll back: {}", error_chain(&error));
    }
    let daemon = Arc::new(Daemon::new(Arc::new(Controller::new(hub))));
    {
        let daemon = daemon.clone();
        ctrlc::set_handler(move || daemon.stop())?;
    }
    let code = daemon.run();
    info!("exiting with code {code}");
    Ok(code)
}
