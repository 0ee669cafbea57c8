//! Error types of the agent.
//!
//! Collaborators fail with [`BackendError`], the controller verbs with
//! [`ControllerError`]. States only ever carry an [`AgentError`], which is classified
//! as either transient or fatal.

use std::error::Error as StdError;
use std::fmt::{self, Display, Write};
use std::io;
use std::time::Duration;

use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Error reported by a collaborator.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
    timeout: bool,
    #[source]
    source: Option<BoxError>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
            source: None,
        }
    }

    /// Error indicating that an operation timed out.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            timeout: true,
            ..Self::new(message)
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout
    }
}

impl From<CopyError> for BackendError {
    fn from(error: CopyError) -> Self {
        match error {
            CopyError::Timeout(_) => BackendError::timeout(error.to_string()),
            CopyError::Io(_) => BackendError::new("unable to copy object").with_source(error),
        }
    }
}

/// Error copying bytes with a [`CopyBackend`](crate::backends::CopyBackend).
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("copy did not finish within {0:?}")]
    Timeout(Duration),
    #[error("i/o error while copying")]
    Io(#[from] io::Error),
}

/// Error verifying the checksum of a downloaded object.
#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("unable to read object {object}")]
    Read {
        object: String,
        #[source]
        source: io::Error,
    },
    #[error("sha256sum mismatch: expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },
}

/// Error of one of the controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("update metadata must have 1 or 2 object lists, found {0}")]
    InvalidObjectLists(usize),
    #[error("invalid active slot {0}, expected 0 or 1")]
    InvalidActiveSlot(u8),
    #[error("unable to access the active slot")]
    ActiveInactive(#[source] BackendError),
    #[error("hardware {hardware:?} is not supported by the update")]
    UnsupportedHardware { hardware: String },
    #[error("unable to probe for updates")]
    Probe(#[source] BackendError),
    #[error("timeout while downloading object {object}")]
    Timeout { object: String },
    #[error("unable to download object {object}")]
    Download {
        object: String,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
    #[error("download has been cancelled")]
    Cancelled,
    #[error("install mode {0:?} is not supported")]
    UnsupportedMode(String),
    #[error(transparent)]
    Install(#[from] InstallFailures),
    #[error("unable to reboot")]
    Reboot(#[source] BackendError),
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ControllerError {
    pub fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }

    /// Map an error of a download collaborator.
    pub fn download(object: &str, error: BackendError) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                object: object.to_owned(),
            }
        } else {
            Self::Download {
                object: object.to_owned(),
                source: error,
            }
        }
    }

    /// Indicates whether the operation should simply be tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Checksum(ChecksumError::Mismatch { .. })
        )
    }
}

/// Step of the installation of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Setup,
    Check,
    Install,
    Cleanup,
}

impl Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstallStep::Setup => "setup",
            InstallStep::Check => "install-if-different check",
            InstallStep::Install => "install",
            InstallStep::Cleanup => "cleanup",
        })
    }
}

/// All failures that occurred while installing an object.
///
/// Cleanup runs even if earlier steps failed, so there may be several.
#[derive(Debug, Default)]
pub struct InstallFailures {
    failures: Vec<(InstallStep, BackendError)>,
}

impl InstallFailures {
    pub fn single(step: InstallStep, error: BackendError) -> Self {
        Self {
            failures: vec![(step, error)],
        }
    }

    pub fn push(&mut self, step: InstallStep, error: BackendError) {
        self.failures.push((step, error));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = InstallStep> + '_ {
        self.failures.iter().map(|(step, _)| *step)
    }
}

impl Display for InstallFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (step, error) in &self.failures {
            write!(f, "({step} failed: {})", error_chain(error))?;
        }
        Ok(())
    }
}

impl StdError for InstallFailures {}

/// Classification of errors carried by the error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The agent returns to idle and tries again later.
    Transient,
    /// The agent terminates.
    Fatal,
}

/// Error carried by the error state.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AgentError {
    kind: ErrorKind,
    message: String,
}

impl AgentError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// Classify an arbitrary error, keeping the messages of all its causes.
    pub fn from_error(kind: ErrorKind, error: &(dyn StdError + 'static)) -> Self {
        Self {
            kind,
            message: error_chain(error),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Render an error with all its causes separated by `: `.
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !rendered.ends_with(&cause_message) {
            write!(rendered, ": {cause_message}").ok();
        }
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_failures_keep_every_cause() {
        let mut failures = InstallFailures::default();
        failures.push(
            InstallStep::Install,
            BackendError::new("unable to write target")
                .with_source(io::Error::new(io::ErrorKind::Other, "no space left")),
        );
        failures.push(InstallStep::Cleanup, BackendError::new("unable to unmount"));
        assert_eq!(
            failures.to_string(),
            "(install failed: unable to write target: no space left)\
             (cleanup failed: unable to unmount)"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ControllerError::download("abc", BackendError::timeout("slow")).is_retryable());
        assert!(!ControllerError::download("abc", BackendError::new("refused")).is_retryable());
        assert!(ControllerError::Checksum(ChecksumError::Mismatch {
            expected: "a".into(),
            found: "b".into(),
        })
        .is_retryable());
        assert!(!ControllerError::InvalidObjectLists(3).is_retryable());
    }

    #[test]
    fn test_error_chain() {
        let error = ControllerError::Probe(
            BackendError::new("request failed")
                .with_source(io::Error::new(io::ErrorKind::Other, "connection refused")),
        );
        let agent_error = AgentError::from_error(ErrorKind::Transient, &error);
        assert_eq!(
            agent_error.message(),
            "unable to probe for updates: request failed: connection refused"
        );
        assert!(!agent_error.is_fatal());
    }
}
