//! Install modes.
//!
//! An install mode turns the metadata of an object into an [`InstallObject`]. Modes are
//! registered by name and looked up with the `mode` field of the object.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backends::{CopyBackend, CopyOptions, InstallObject};
use crate::error::{BackendError, ControllerError, InstallFailures, InstallStep};
use crate::metadata::ObjectMetadata;

/// Maximal duration of installing a single object in `copy` mode.
pub const INSTALL_COPY_TIMEOUT: Duration = Duration::from_secs(60 * 60);

type ModeFactory =
    Box<dyn Fn(&ObjectMetadata) -> Result<Box<dyn InstallObject>, BackendError> + Send + Sync>;

/// Registry of install modes.
#[derive(Default)]
pub struct InstallModes {
    factories: HashMap<String, ModeFactory>,
}

impl InstallModes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in modes.
    pub fn with_defaults(copy: Arc<dyn CopyBackend>) -> Self {
        let mut modes = Self::new();
        modes.register("copy", move |metadata| {
            Ok(Box::new(CopyMode::new(metadata.clone(), copy.clone())) as Box<dyn InstallObject>)
        });
        modes
    }

    pub fn register(
        &mut self,
        mode: impl Into<String>,
        factory: impl Fn(&ObjectMetadata) -> Result<Box<dyn InstallObject>, BackendError>
            + Send
            + Sync
            + 'static,
    ) {
        self.factories.insert(mode.into(), Box::new(factory));
    }

    /// Keep only the given modes.
    pub fn restrict(&mut self, supported: &[String]) {
        for mode in supported {
            if !self.factories.contains_key(mode) {
                warn!("install mode {mode:?} is configured but not available");
            }
        }
        self.factories
            .retain(|mode, _| supported.iter().any(|supported| supported == mode));
    }

    pub fn is_supported(&self, mode: &str) -> bool {
        self.factories.contains_key(mode)
    }

    /// Create the install object for the given object.
    pub fn resolve(&self, object: &ObjectMetadata) -> Result<Box<dyn InstallObject>, ControllerError> {
        let factory = self
            .factories
            .get(&object.mode)
            .ok_or_else(|| ControllerError::UnsupportedMode(object.mode.clone()))?;
        factory(object)
            .map_err(|error| InstallFailures::single(InstallStep::Setup, error).into())
    }
}

impl std::fmt::Debug for InstallModes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// Copies the object onto its target, which may be a file or a block device.
pub struct CopyMode {
    metadata: ObjectMetadata,
    copy: Arc<dyn CopyBackend>,
}

impl CopyMode {
    pub fn new(metadata: ObjectMetadata, copy: Arc<dyn CopyBackend>) -> Self {
        Self { metadata, copy }
    }

    fn target(&self) -> Result<&Path, BackendError> {
        self.metadata
            .target
            .as_deref()
            .ok_or_else(|| BackendError::new("copy mode requires a target"))
    }
}

impl InstallObject for CopyMode {
    fn metadata(&self) -> &ObjectMetadata {
        &self.metadata
    }

    fn setup(&mut self) -> Result<(), BackendError> {
        let target = self.target()?;
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(BackendError::new(format!(
                    "parent directory of target {target:?} does not exist"
                )));
            }
        }
        Ok(())
    }

    fn install(&mut self, download_dir: &Path) -> Result<(), BackendError> {
        let target = self.target()?.to_owned();
        let source_path: PathBuf = download_dir.join(&self.metadata.sha256sum);
        debug!("copying {source_path:?} to {target:?}");
        let mut source = File::open(&source_path).map_err(|error| {
            BackendError::new(format!("unable to open object {source_path:?}")).with_source(error)
        })?;
        let mut destination = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&target)
            .map_err(|error| {
                BackendError::new(format!("unable to open target {target:?}")).with_source(error)
            })?;
        let (_cancel_tx, cancel_rx) = flume::bounded(1);
        let options = CopyOptions::for_object(&self.metadata, INSTALL_COPY_TIMEOUT);
        self.copy
            .copy(&mut destination, &mut source, &options, &cancel_rx)?;
        destination.sync_all().map_err(|error| {
            BackendError::new(format!("unable to sync target {target:?}")).with_source(error)
        })?;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}
