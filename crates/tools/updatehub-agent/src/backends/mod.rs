//! Collaborators of the controller.
//!
//! Every interaction with the system or the update server goes through one of the
//! traits in this module, so that tests can replace them with fakes.

use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flume::Receiver;

use crate::error::{BackendError, ChecksumError, CopyError};
use crate::firmware::FirmwareMetadata;
use crate::metadata::{ObjectMetadata, UpdateMetadata};

pub mod copy;
pub mod http;
pub mod install_if_different;
pub mod sha256;
pub mod shell;

pub use copy::ChunkedCopy;
pub use http::{ApiClient, HttpApi};
pub use install_if_different::Sha256InstallIfDifferent;
pub use sha256::FileSha256Checker;
pub use shell::{ShellActiveInactive, ShellRebooter};

/// Access to the active slot of an active/inactive device.
pub trait ActiveInactiveBackend: Send + Sync {
    /// Index of the currently active slot.
    fn active(&self) -> Result<u8, BackendError>;

    /// Make the slot with the given index active on the next boot.
    fn set_active(&self, slot: u8) -> Result<(), BackendError>;
}

/// Verification of downloaded objects.
pub trait Sha256Checker: Send + Sync {
    /// Check that the object with the given checksum has been downloaded correctly.
    fn check_downloaded_object(
        &self,
        download_dir: &Path,
        expected: &str,
    ) -> Result<(), ChecksumError>;
}

/// Decides whether an object needs to be installed at all.
pub trait InstallIfDifferent: Send + Sync {
    /// Returns `false` if the target already contains the object.
    fn proceed(&self, object: &dyn InstallObject) -> Result<bool, BackendError>;
}

/// Reports states of an update back to the server.
pub trait Reporter: Send + Sync {
    fn report_state(
        &self,
        api: &ApiClient,
        package_uid: &str,
        state: &str,
        error_message: Option<&str>,
        firmware: &FirmwareMetadata,
    ) -> Result<(), BackendError>;
}

/// Response of the server to a probe.
#[derive(Debug, Default)]
pub struct ProbeResponse {
    /// Available update, if any.
    pub metadata: Option<UpdateMetadata>,
    /// Additional poll requested by the server.
    pub extra_poll: Option<Duration>,
}

/// Download of updates from the server.
pub trait Updater: Send + Sync {
    fn probe_update(
        &self,
        api: &ApiClient,
        firmware: &FirmwareMetadata,
        retries: u64,
    ) -> Result<ProbeResponse, BackendError>;

    /// Open the object at the given URI, returning the reader and the length if known.
    fn download_update(
        &self,
        api: &ApiClient,
        uri: &str,
    ) -> Result<(Box<dyn Read>, Option<u64>), BackendError>;
}

/// Destination of a copy.
pub trait CopyTarget: Write + Seek {}

impl<T: Write + Seek> CopyTarget for T {}

/// Options of a copy.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Maximal duration of the whole copy.
    pub timeout: Duration,
    pub chunk_size: usize,
    /// Number of chunks to skip in the destination.
    pub skip: u64,
    /// Maximal number of chunks to copy.
    pub count: Option<u64>,
    /// The source is xz-compressed.
    pub compressed: bool,
}

pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

impl CopyOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip: 0,
            count: None,
            compressed: false,
        }
    }

    /// Options as configured for the given object.
    pub fn for_object(object: &ObjectMetadata, timeout: Duration) -> Self {
        Self {
            timeout,
            chunk_size: object.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            skip: object.skip,
            count: object.count,
            compressed: object.compressed,
        }
    }
}

/// Copies bytes from a source to a destination.
pub trait CopyBackend: Send + Sync {
    /// Copy `src` to `dst`.
    ///
    /// Returns `true` if the copy has been cancelled via `cancel`.
    fn copy(
        &self,
        dst: &mut dyn CopyTarget,
        src: &mut dyn Read,
        options: &CopyOptions,
        cancel: &Receiver<()>,
    ) -> Result<bool, CopyError>;
}

/// Reboots the device.
pub trait Rebooter: Send + Sync {
    fn reboot(&self) -> Result<(), BackendError>;
}

/// Object of an update being installed by an install mode.
pub trait InstallObject: Send {
    fn metadata(&self) -> &ObjectMetadata;

    fn setup(&mut self) -> Result<(), BackendError>;

    /// Install the object from the download directory.
    fn install(&mut self, download_dir: &Path) -> Result<(), BackendError>;

    /// Runs after every installation attempt, even failed ones.
    fn cleanup(&mut self) -> Result<(), BackendError>;
}

/// All collaborators of the controller.
pub struct Backends {
    pub active_inactive: Box<dyn ActiveInactiveBackend>,
    pub sha256: Box<dyn Sha256Checker>,
    pub install_if_different: Box<dyn InstallIfDifferent>,
    pub reporter: Box<dyn Reporter>,
    pub updater: Box<dyn Updater>,
    pub copy: Arc<dyn CopyBackend>,
    pub rebooter: Box<dyn Rebooter>,
}

impl Backends {
    /// Collaborators interacting with the actual system and server.
    pub fn system() -> Self {
        let http = HttpApi::new();
        Self {
            active_inactive: Box::new(ShellActiveInactive),
            sha256: Box::new(FileSha256Checker),
            install_if_different: Box::new(Sha256InstallIfDifferent),
            reporter: Box::new(http.clone()),
            updater: Box::new(http),
            copy: Arc::new(ChunkedCopy),
            rebooter: Box::new(ShellRebooter),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}
