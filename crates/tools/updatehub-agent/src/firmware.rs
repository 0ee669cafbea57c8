//! Identity of the device and its current firmware.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use xscript::{read_str, Run};

pub const PRODUCT_UID_FILE: &str = "product-uid";
pub const VERSION_SCRIPT: &str = "version";
pub const HARDWARE_SCRIPT: &str = "hardware";
pub const DEVICE_IDENTITY_DIR: &str = "device-identity.d";
pub const DEVICE_ATTRIBUTES_DIR: &str = "device-attributes.d";

/// Error loading the firmware metadata.
#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("unable to read product UID from {path:?}")]
    ProductUid {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to read directory {path:?}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("firmware metadata script {path:?} failed: {message}")]
    Script { path: PathBuf, message: String },
}

/// Identity of the device and its current firmware.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FirmwareMetadata {
    pub product_uid: String,
    pub version: String,
    pub hardware: String,
    pub device_identity: BTreeMap<String, Vec<String>>,
    pub device_attributes: BTreeMap<String, Vec<String>>,
}

impl FirmwareMetadata {
    /// Load the metadata from the firmware metadata directory.
    pub fn load(directory: &Path) -> Result<Self, FirmwareError> {
        let product_uid_path = directory.join(PRODUCT_UID_FILE);
        let product_uid = fs::read_to_string(&product_uid_path)
            .map_err(|source| FirmwareError::ProductUid {
                path: product_uid_path,
                source,
            })?
            .trim()
            .to_owned();
        let metadata = Self {
            product_uid,
            version: run_optional_script(&directory.join(VERSION_SCRIPT))?,
            hardware: run_optional_script(&directory.join(HARDWARE_SCRIPT))?,
            device_identity: run_key_value_scripts(&directory.join(DEVICE_IDENTITY_DIR))?,
            device_attributes: run_key_value_scripts(&directory.join(DEVICE_ATTRIBUTES_DIR))?,
        };
        debug!("loaded firmware metadata {metadata:?}");
        Ok(metadata)
    }
}

fn run_script(path: &Path) -> Result<String, FirmwareError> {
    read_str!([path]).map_err(|error| FirmwareError::Script {
        path: path.to_owned(),
        message: error.to_string(),
    })
}

fn run_optional_script(path: &Path) -> Result<String, FirmwareError> {
    if !path.is_file() {
        return Ok(String::new());
    }
    Ok(run_script(path)?.trim().to_owned())
}

fn run_key_value_scripts(directory: &Path) -> Result<BTreeMap<String, Vec<String>>, FirmwareError> {
    let mut values = BTreeMap::new();
    let read_dir = match fs::read_dir(directory) {
        Ok(read_dir) => read_dir,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(values),
        Err(source) => {
            return Err(FirmwareError::ReadDir {
                path: directory.to_owned(),
                source,
            })
        }
    };
    let mut scripts = read_dir
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .collect::<Vec<_>>();
    scripts.sort();
    for script in scripts {
        parse_key_values(&run_script(&script)?, &mut values);
    }
    Ok(values)
}

/// Parse `key=value` lines, accumulating repeated keys.
fn parse_key_values(output: &str, values: &mut BTreeMap<String, Vec<String>>) {
    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        values
            .entry(key.trim().to_owned())
            .or_default()
            .push(value.trim().to_owned());
    }
}
