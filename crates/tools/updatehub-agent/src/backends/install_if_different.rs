use std::io;

use tracing::info;

use super::sha256::sha256_file;
use super::{InstallIfDifferent, InstallObject};
use crate::error::BackendError;

/// Skips objects whose target already has the object's checksum.
///
/// Only the `sha256sum` directive is supported.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256InstallIfDifferent;

impl InstallIfDifferent for Sha256InstallIfDifferent {
    fn proceed(&self, object: &dyn InstallObject) -> Result<bool, BackendError> {
        let metadata = object.metadata();
        match metadata.install_if_different.as_deref() {
            None => Ok(true),
            Some("sha256sum") => {
                let Some(target) = &metadata.target else {
                    return Ok(true);
                };
                match sha256_file(target) {
                    Ok(found) if found.eq_ignore_ascii_case(&metadata.sha256sum) => {
                        info!("target {target:?} is up to date, skipping object");
                        Ok(false)
                    }
                    Ok(_) => Ok(true),
                    Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(true),
                    Err(error) => Err(BackendError::new(format!(
                        "unable to compute checksum of target {target:?}"
                    ))
                    .with_source(error)),
                }
            }
            Some(other) => Err(BackendError::new(format!(
                "unsupported install-if-different directive {other:?}"
            ))),
        }
    }
}
