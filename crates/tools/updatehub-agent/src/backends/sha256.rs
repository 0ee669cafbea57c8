use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::Sha256Checker;
use crate::error::ChecksumError;

/// Compute the hex-encoded SHA256 of a file.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Checks objects stored under their checksum in the download directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSha256Checker;

impl Sha256Checker for FileSha256Checker {
    fn check_downloaded_object(
        &self,
        download_dir: &Path,
        expected: &str,
    ) -> Result<(), ChecksumError> {
        let found =
            sha256_file(&download_dir.join(expected)).map_err(|source| ChecksumError::Read {
                object: expected.to_owned(),
                source,
            })?;
        if !found.eq_ignore_ascii_case(expected) {
            return Err(ChecksumError::Mismatch {
                expected: expected.to_owned(),
                found,
            });
        }
        Ok(())
    }
}
