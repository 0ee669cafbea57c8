//! Settings of the UpdateHub agent.
//!
//! Settings come in two parts:
//!
//! - The *static* settings are read from the read-only system configuration every time
//!   the agent starts. The agent never writes them.
//! - The *runtime* settings hold the persistent part of the polling schedule. They are
//!   mutated while the agent runs and flushed to [`StorageSettings::runtime_settings_path`]
//!   so that a restart does not reset the schedule or the probe backoff.
//!
//! Both files use TOML with the sections `[Polling]`, `[Storage]`, `[Update]`,
//! `[Network]`, and `[Firmware]`. Only the `[Polling]` section is ever written back.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default path of the system settings.
pub const SYSTEM_SETTINGS_PATH: &str = "/etc/updatehub.conf";

/// Default path of the runtime settings.
pub const RUNTIME_SETTINGS_PATH: &str = "/var/lib/updatehub/runtime.conf";

/// Default polling interval (one day).
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Error loading or storing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unable to read settings file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse settings file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unable to serialize runtime settings")]
    Serialize(#[from] toml::ser::Error),
    #[error("unable to write runtime settings to {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Settings of the agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    pub polling: PollingSettings,
    pub storage: StorageSettings,
    pub update: UpdateSettings,
    pub network: NetworkSettings,
    pub firmware: FirmwareSettings,
    /// Runtime settings, loaded from and saved to a separate file.
    #[serde(skip)]
    pub runtime: RuntimeSettings,
}

impl Settings {
    /// Load the static settings from `path` and the runtime settings from the
    /// configured runtime settings path.
    ///
    /// Missing files are not an error, the defaults are used instead.
    pub fn load(path: &Path) -> SettingsResult<Self> {
        let mut settings: Settings = read_toml(path)?.unwrap_or_default();
        settings.runtime = read_toml(&settings.storage.runtime_settings_path)?.unwrap_or_default();
        Ok(settings)
    }

    /// Parse static settings from a string.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Flush the runtime settings to storage.
    ///
    /// This is a no-op if the storage is configured as read-only.
    pub fn save_runtime(&self) -> SettingsResult<()> {
        if self.storage.read_only {
            debug!("storage is read-only, not saving runtime settings");
            return Ok(());
        }
        self.runtime.save(&self.storage.runtime_settings_path)
    }
}

/// `[Polling]` section of the static settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PollingSettings {
    /// Interval between two regular probes.
    #[serde(with = "seconds")]
    pub interval: Duration,
    /// Indicates whether the agent polls the server on its own.
    pub enabled: bool,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLLING_INTERVAL,
            enabled: true,
        }
    }
}

/// `[Storage]` section of the static settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StorageSettings {
    /// Never write the runtime settings.
    pub read_only: bool,
    /// Path of the runtime settings file.
    pub runtime_settings_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            read_only: false,
            runtime_settings_path: PathBuf::from(RUNTIME_SETTINGS_PATH),
        }
    }
}

/// `[Update]` section of the static settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UpdateSettings {
    /// Directory where update metadata and objects are downloaded to.
    pub download_dir: PathBuf,
    /// Install modes the device accepts.
    pub supported_install_modes: Vec<String>,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("/tmp/updatehub"),
            supported_install_modes: vec!["copy".to_owned()],
        }
    }
}

/// `[Network]` section of the static settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetworkSettings {
    /// Address of the update server.
    pub server_address: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            server_address: "https://api.updatehub.io".to_owned(),
        }
    }
}

/// `[Firmware]` section of the static settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FirmwareSettings {
    /// Directory with the firmware metadata and callback scripts.
    pub metadata_path: PathBuf,
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("/usr/share/updatehub"),
        }
    }
}

/// Runtime settings persisted by the agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    #[serde(rename = "Polling")]
    pub polling: PersistentPolling,
}

impl RuntimeSettings {
    /// Atomically write the runtime settings to the given path.
    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        let encoded = toml::to_string(self)?;
        let write_error = |source| SettingsError::Write {
            path: path.to_owned(),
            source,
        };
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_error)?;
        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(write_error)?;
        temp.write_all(encoded.as_bytes()).map_err(write_error)?;
        temp.as_file().sync_all().map_err(write_error)?;
        temp.persist(path).map_err(|error| write_error(error.error))?;
        debug!("runtime settings saved to {path:?}");
        Ok(())
    }
}

/// Persistent part of the polling schedule.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PersistentPolling {
    /// Time of the last successful probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<DateTime<Utc>>,
    /// Time scheduled for the very first probe of the device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_poll: Option<DateTime<Utc>>,
    /// Shorter polling window requested by the server.
    #[serde(
        rename = "ExtraInterval",
        with = "optional_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub extra_interval: Option<Duration>,
    /// Number of failed probes since the last successful one.
    pub retries: u64,
    /// Probe as soon as possible, ignoring the schedule.
    #[serde(rename = "ProbeASAP")]
    pub probe_asap: bool,
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> SettingsResult<Option<T>> {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            debug!("settings file {path:?} not found, using defaults");
            return Ok(None);
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_owned(),
                source,
            })
        }
    };
    toml::from_str(&source)
        .map(Some)
        .map_err(|source| SettingsError::Parse {
            path: path.to_owned(),
            source,
        })
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod optional_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_u64(value.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}
