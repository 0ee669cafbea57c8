//! Update metadata as served by the update server.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata of a single object of an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ObjectMetadata {
    /// Install mode handling the object.
    pub mode: String,
    /// Hex-encoded SHA256 of the object, also its name in the download directory.
    pub sha256sum: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    /// Target the object is written to.
    #[serde(default)]
    pub target: Option<PathBuf>,
    /// The object is an xz stream and must be decompressed while installing.
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    /// Number of chunks to skip at the start of the target.
    #[serde(default)]
    pub skip: u64,
    /// Maximal number of chunks to copy.
    #[serde(default)]
    pub count: Option<u64>,
    /// Only install the object if the target differs, e.g., `sha256sum`.
    #[serde(default)]
    pub install_if_different: Option<String>,
}

/// Hardware an update can be installed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SupportedHardware {
    /// Either `any` or the name of a single hardware.
    Keyword(String),
    List(Vec<String>),
}

impl Default for SupportedHardware {
    fn default() -> Self {
        Self::Keyword("any".to_owned())
    }
}

impl SupportedHardware {
    pub fn supports(&self, hardware: &str) -> bool {
        match self {
            SupportedHardware::Keyword(keyword) => keyword == "any" || keyword == hardware,
            SupportedHardware::List(list) => list.iter().any(|entry| entry == hardware),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawUpdateMetadata {
    product_uid: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    supported_hardware: SupportedHardware,
    objects: Vec<Vec<ObjectMetadata>>,
}

/// Metadata of an update package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMetadata {
    pub product_uid: String,
    pub version: String,
    pub supported_hardware: SupportedHardware,
    /// One object list per slot, two only for active/inactive devices.
    pub objects: Vec<Vec<ObjectMetadata>>,
    /// Bytes as received from the server.
    raw: Vec<u8>,
    package_uid: String,
}

impl UpdateMetadata {
    /// Parse the metadata from the bytes received from the server.
    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let parsed: RawUpdateMetadata = serde_json::from_slice(raw)?;
        Ok(Self {
            product_uid: parsed.product_uid,
            version: parsed.version,
            supported_hardware: parsed.supported_hardware,
            objects: parsed.objects,
            raw: raw.to_vec(),
            package_uid: hex::encode(Sha256::digest(raw)),
        })
    }

    /// Unique identifier of the package, the SHA256 of the metadata.
    pub fn package_uid(&self) -> &str {
        &self.package_uid
    }

    /// Bytes as received from the server.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}
