#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use updatehub_agent::backends::{
    ActiveInactiveBackend, ApiClient, Backends, ChunkedCopy, CopyBackend, FileSha256Checker,
    ProbeResponse, Rebooter, Reporter, Sha256InstallIfDifferent, Updater,
};
use updatehub_agent::error::BackendError;
use updatehub_agent::firmware::FirmwareMetadata;
use updatehub_agent::hub::UpdateHub;
use updatehub_agent::metadata::UpdateMetadata;
use updatehub_agent::modes::InstallModes;
use updatehub_hooks::Callbacks;
use updatehub_settings::Settings;

pub const HARDWARE: &str = "board-a";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub state: String,
    pub package_uid: String,
    pub error_message: Option<String>,
}

/// Everything the fake system has been asked to do.
#[derive(Debug, Default)]
pub struct Journal {
    pub probes: Vec<u64>,
    pub downloads: Vec<String>,
    pub reports: Vec<Report>,
    pub set_active: Vec<u8>,
    pub reboots: usize,
}

/// Fake server and device.
#[derive(Debug, Default)]
pub struct FakeSystem {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub probe_responses: Mutex<VecDeque<Result<ProbeResponse, BackendError>>>,
    pub download_failures: Mutex<VecDeque<BackendError>>,
    pub active: Mutex<u8>,
    pub reboot_fails: AtomicBool,
    pub report_fails: AtomicBool,
    pub journal: Mutex<Journal>,
}

impl FakeSystem {
    pub fn journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct Fake(pub Arc<FakeSystem>);

impl ActiveInactiveBackend for Fake {
    fn active(&self) -> Result<u8, BackendError> {
        Ok(*self.0.active.lock().unwrap())
    }

    fn set_active(&self, slot: u8) -> Result<(), BackendError> {
        self.0.journal().set_active.push(slot);
        Ok(())
    }
}

impl Updater for Fake {
    fn probe_update(
        &self,
        _: &ApiClient,
        _: &FirmwareMetadata,
        retries: u64,
    ) -> Result<ProbeResponse, BackendError> {
        self.0.journal().probes.push(retries);
        self.0
            .probe_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ProbeResponse::default()))
    }

    fn download_update(
        &self,
        _: &ApiClient,
        uri: &str,
    ) -> Result<(Box<dyn Read>, Option<u64>), BackendError> {
        self.0.journal().downloads.push(uri.to_owned());
        if let Some(error) = self.0.download_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let object = uri.rsplit('/').next().unwrap();
        let content = self
            .0
            .objects
            .lock()
            .unwrap()
            .get(object)
            .cloned()
            .ok_or_else(|| BackendError::new("no such object"))?;
        let length = content.len() as u64;
        Ok((Box::new(Cursor::new(content)), Some(length)))
    }
}

impl Reporter for Fake {
    fn report_state(
        &self,
        _: &ApiClient,
        package_uid: &str,
        state: &str,
        error_message: Option<&str>,
        _: &FirmwareMetadata,
    ) -> Result<(), BackendError> {
        if self.0.report_fails.load(Ordering::SeqCst) {
            return Err(BackendError::new("server unavailable"));
        }
        self.0.journal().reports.push(Report {
            state: state.to_owned(),
            package_uid: package_uid.to_owned(),
            error_message: error_message.map(str::to_owned),
        });
        Ok(())
    }
}

impl Rebooter for Fake {
    fn reboot(&self) -> Result<(), BackendError> {
        self.0.journal().reboots += 1;
        if self.0.reboot_fails.load(Ordering::SeqCst) {
            return Err(BackendError::new("reboot refused"));
        }
        Ok(())
    }
}

/// Temporary environment of a test.
pub struct Env {
    pub temp_dir: TempDir,
    pub system: Arc<FakeSystem>,
}

impl Env {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("targets")).unwrap();
        fs::create_dir_all(temp_dir.path().join("metadata")).unwrap();
        Self {
            temp_dir,
            system: Arc::new(FakeSystem::default()),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn download_dir(&self) -> PathBuf {
        self.path().join("downloads")
    }

    pub fn callbacks_dir(&self) -> PathBuf {
        self.path().join("metadata")
    }

    pub fn runtime_settings_path(&self) -> PathBuf {
        self.path().join("runtime.conf")
    }

    /// Target of the object with the given position.
    pub fn target(&self, list: usize, object: usize) -> PathBuf {
        self.path()
            .join("targets")
            .join(format!("target-{list}-{object}"))
    }

    pub fn journal(&self) -> MutexGuard<'_, Journal> {
        self.system.journal()
    }

    /// Serve an object, returning its checksum.
    pub fn add_object(&self, content: &[u8]) -> String {
        let sha256sum = hex::encode(Sha256::digest(content));
        self.system
            .objects
            .lock()
            .unwrap()
            .insert(sha256sum.clone(), content.to_vec());
        sha256sum
    }

    /// Metadata of an update with the given object lists, installed in copy mode.
    pub fn metadata(&self, lists: &[&[&str]]) -> UpdateMetadata {
        self.metadata_with_mode(lists, "copy")
    }

    pub fn metadata_with_mode(&self, lists: &[&[&str]], mode: &str) -> UpdateMetadata {
        let objects = lists
            .iter()
            .enumerate()
            .map(|(list_idx, list)| {
                list.iter()
                    .enumerate()
                    .map(|(object_idx, sha256sum)| {
                        serde_json::json!({
                            "mode": mode,
                            "sha256sum": sha256sum,
                            "target": self.target(list_idx, object_idx),
                            "chunk-size": 4,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let raw = serde_json::json!({
            "product-uid": "0123456789",
            "version": "2.0",
            "supported-hardware": [HARDWARE],
            "objects": objects,
        })
        .to_string();
        UpdateMetadata::from_slice(raw.as_bytes()).unwrap()
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.update.download_dir = self.download_dir();
        settings.storage.runtime_settings_path = self.runtime_settings_path();
        settings.firmware.metadata_path = self.callbacks_dir();
        settings
    }

    pub fn backends(&self) -> Backends {
        self.backends_with_copy(Arc::new(ChunkedCopy))
    }

    pub fn backends_with_copy(&self, copy: Arc<dyn CopyBackend>) -> Backends {
        let fake = Fake(self.system.clone());
        Backends {
            active_inactive: Box::new(fake.clone()),
            sha256: Box::new(FileSha256Checker),
            install_if_different: Box::new(Sha256InstallIfDifferent),
            reporter: Box::new(fake.clone()),
            updater: Box::new(fake.clone()),
            copy,
            rebooter: Box::new(fake),
        }
    }

    pub fn hub(&self) -> UpdateHub {
        self.hub_with(self.backends(), self.settings())
    }

    pub fn hub_with(&self, backends: Backends, settings: Settings) -> UpdateHub {
        let modes = InstallModes::with_defaults(backends.copy.clone());
        let firmware = FirmwareMetadata {
            product_uid: "0123456789".to_owned(),
            version: "1.0".to_owned(),
            hardware: HARDWARE.to_owned(),
            ..Default::default()
        };
        let callbacks = Callbacks::new(self.callbacks_dir());
        let mut hub = UpdateHub::new(settings, firmware, backends, modes, callbacks);
        hub.poll_tick = Duration::from_millis(1);
        hub.download_retry_base = Duration::from_millis(1);
        hub
    }
}

/// Install an executable callback script.
pub fn install_script(path: &Path, source: &str) {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, source).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}
