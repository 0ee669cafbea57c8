//! Context shared by all states and the controller operations.

use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use flume::Receiver;
use tracing::{debug, info, warn};
use updatehub_hooks::Callbacks;
use updatehub_settings::Settings;

use crate::active_inactive::active_inactive_index;
use crate::backends::{ApiClient, Backends, CopyOptions};
use crate::error::{error_chain, ControllerError, InstallFailures, InstallStep};
use crate::firmware::FirmwareMetadata;
use crate::metadata::UpdateMetadata;
use crate::modes::InstallModes;
use crate::polling::{self, Schedule};
use crate::progress::ProgressSender;
use crate::states::{IdleState, PollState, State, UpdateHubState, UpdateProbeState};

/// Name of the file the metadata of the latest update is stored in.
pub const UPDATE_METADATA_FILE: &str = "updatemetadata.json";

/// Maximal duration of downloading a single object.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default duration of one tick of the poll state.
pub const DEFAULT_POLL_TICK: Duration = Duration::from_secs(1);

/// Outcome of a successful probe.
#[derive(Debug, Default)]
pub struct ProbeOutcome {
    pub metadata: Option<UpdateMetadata>,
    /// Additional poll requested by the server.
    pub extra_poll: Option<Duration>,
}

/// Context of the update flow.
pub struct UpdateHub {
    pub settings: Settings,
    pub firmware: FirmwareMetadata,
    pub api: ApiClient,
    pub backends: Backends,
    pub modes: InstallModes,
    pub callbacks: Callbacks,
    pub poll_tick: Duration,
    /// Delay after the first failed download attempt, doubled with every further one.
    pub download_retry_base: Duration,
    /// Package installed since the agent started.
    pub last_installed_package_uid: Option<String>,
    /// Latest state successfully reported to the server.
    pub last_reported_state: Option<UpdateHubState>,
}

impl UpdateHub {
    pub fn new(
        settings: Settings,
        firmware: FirmwareMetadata,
        backends: Backends,
        modes: InstallModes,
        callbacks: Callbacks,
    ) -> Self {
        let api = ApiClient::new(settings.network.server_address.clone());
        Self {
            settings,
            firmware,
            api,
            backends,
            modes,
            callbacks,
            poll_tick: DEFAULT_POLL_TICK,
            download_retry_base: polling::DOWNLOAD_RETRY_BASE_DELAY,
            last_installed_package_uid: None,
            last_reported_state: None,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.settings.update.download_dir
    }

    /// Flush the runtime settings, logging failures.
    pub fn save_runtime_settings(&self) {
        if let Err(error) = self.settings.save_runtime() {
            warn!("unable to save runtime settings: {}", error_chain(&error));
        }
    }

    /// State to start polling from, according to the polling schedule.
    pub fn start_polling(&mut self) -> Box<dyn State> {
        if !self.settings.polling.enabled {
            info!("polling is disabled");
            return Box::new(IdleState::new());
        }
        let interval = self.settings.polling.interval;
        let first_poll = self.settings.runtime.polling.first_poll;
        let schedule = polling::schedule(
            interval,
            &mut self.settings.runtime.polling,
            Utc::now(),
            polling::random_jitter,
        );
        if self.settings.runtime.polling.first_poll != first_poll {
            self.save_runtime_settings();
        }
        match schedule {
            Schedule::ProbeNow => Box::new(UpdateProbeState::new()),
            Schedule::Wait(remaining) => Box::new(PollState::new(remaining)),
        }
    }

    /// Ask the server for an update.
    ///
    /// The metadata of an available update is stored in the download directory.
    pub fn probe_update(&self, retries: u64) -> Result<ProbeOutcome, ControllerError> {
        let response = self
            .backends
            .updater
            .probe_update(&self.api, &self.firmware, retries)
            .map_err(ControllerError::Probe)?;
        if let Some(metadata) = &response.metadata {
            let download_dir = self.download_dir();
            fs::create_dir_all(download_dir).map_err(ControllerError::io(format!(
                "unable to create download directory {download_dir:?}"
            )))?;
            let path = download_dir.join(UPDATE_METADATA_FILE);
            fs::write(&path, metadata.raw())
                .map_err(ControllerError::io(format!("unable to write {path:?}")))?;
        }
        Ok(ProbeOutcome {
            metadata: response.metadata,
            extra_poll: response.extra_poll,
        })
    }

    /// Download all objects of the update targeting the inactive slot.
    ///
    /// Objects which have already been downloaded are skipped. Returns
    /// [`ControllerError::Cancelled`] if cancelled via `cancel`.
    pub fn download_update(
        &self,
        metadata: &UpdateMetadata,
        cancel: &Receiver<()>,
        progress: ProgressSender,
    ) -> Result<(), ControllerError> {
        let index = active_inactive_index(metadata, self.backends.active_inactive.as_ref())?;
        let objects = &metadata.objects[index];
        let download_dir = self.download_dir();
        fs::create_dir_all(download_dir).map_err(ControllerError::io(format!(
            "unable to create download directory {download_dir:?}"
        )))?;
        for (done, object) in objects.iter().enumerate() {
            let name = &object.sha256sum;
            if self
                .backends
                .sha256
                .check_downloaded_object(download_dir, name)
                .is_ok()
            {
                debug!("object {name} has already been downloaded");
                progress.step(done + 1, objects.len());
                continue;
            }
            info!("downloading object {name}");
            let uri = ApiClient::object_uri(&metadata.product_uid, metadata.package_uid(), name);
            let (mut reader, _) = self
                .backends
                .updater
                .download_update(&self.api, &uri)
                .map_err(|error| ControllerError::download(name, error))?;
            let path = download_dir.join(name);
            let mut file = File::create(&path)
                .map_err(ControllerError::io(format!("unable to create {path:?}")))?;
            let cancelled = self
                .backends
                .copy
                .copy(&mut file, &mut reader, &CopyOptions::new(DOWNLOAD_TIMEOUT), cancel)
                .map_err(|error| ControllerError::download(name, error.into()))?;
            if cancelled {
                return Err(ControllerError::Cancelled);
            }
            self.backends
                .sha256
                .check_downloaded_object(download_dir, name)?;
            progress.step(done + 1, objects.len());
        }
        progress.finish();
        Ok(())
    }

    /// Install all objects of the update to the inactive slot and activate it.
    pub fn install_update(
        &self,
        metadata: &UpdateMetadata,
        progress: ProgressSender,
    ) -> Result<(), ControllerError> {
        if !metadata.supported_hardware.supports(&self.firmware.hardware) {
            return Err(ControllerError::UnsupportedHardware {
                hardware: self.firmware.hardware.clone(),
            });
        }
        let index = active_inactive_index(metadata, self.backends.active_inactive.as_ref())?;
        let objects = &metadata.objects[index];
        let download_dir = self.download_dir();
        for (done, object) in objects.iter().enumerate() {
            self.backends
                .sha256
                .check_downloaded_object(download_dir, &object.sha256sum)?;
            let mut install = self.modes.resolve(object)?;
            info!("installing object {} ({})", object.sha256sum, object.mode);
            let mut failures = InstallFailures::default();
            match install.setup() {
                Err(error) => failures.push(InstallStep::Setup, error),
                Ok(()) => match self.backends.install_if_different.proceed(install.as_ref()) {
                    Err(error) => failures.push(InstallStep::Check, error),
                    Ok(false) => {}
                    Ok(true) => {
                        if let Err(error) = install.install(download_dir) {
                            failures.push(InstallStep::Install, error);
                        }
                    }
                },
            }
            if let Err(error) = install.cleanup() {
                failures.push(InstallStep::Cleanup, error);
            }
            if !failures.is_empty() {
                return Err(failures.into());
            }
            progress.step(done + 1, objects.len());
        }
        if metadata.objects.len() == 2 {
            let slot = index as u8;
            self.backends
                .active_inactive
                .set_active(slot)
                .map_err(ControllerError::ActiveInactive)?;
        }
        progress.finish();
        Ok(())
    }

    pub fn reboot(&self) -> Result<(), ControllerError> {
        self.backends
            .rebooter
            .reboot()
            .map_err(ControllerError::Reboot)
    }

    /// Validate the running installation, rolling back to the other slot if invalid.
    pub fn validate_installation(&self) -> Result<(), ControllerError> {
        if self.callbacks.validate() {
            return Ok(());
        }
        warn!("installation is invalid, rolling back");
        if let Err(error) = self.callbacks.rollback() {
            warn!("rollback callback failed: {}", error_chain(&error));
        }
        let active = self
            .backends
            .active_inactive
            .active()
            .map_err(ControllerError::ActiveInactive)?;
        let previous = match active {
            0 => 1,
            1 => 0,
            other => return Err(ControllerError::InvalidActiveSlot(other)),
        };
        self.backends
            .active_inactive
            .set_active(previous)
            .map_err(ControllerError::ActiveInactive)?;
        self.reboot()
    }
}

impl std::fmt::Debug for UpdateHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateHub")
            .field("api", &self.api)
            .field("modes", &self.modes)
            .field("last_installed_package_uid", &self.last_installed_package_uid)
            .field("last_reported_state", &self.last_reported_state)
            .finish_non_exhaustive()
    }
}
