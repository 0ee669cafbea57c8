//! Error types.

use thiserror::Error;

/// Error running a callback script.
#[derive(Debug, Error)]
pub enum HookError {
    /// The script could not be spawned or exited with a non-zero status.
    #[error("callback {name:?} failed: {message}")]
    Failed { name: &'static str, message: String },
    /// The script's output is not a transition flow.
    #[error("callback {name:?} produced invalid output {output:?}")]
    InvalidOutput { name: &'static str, output: String },
}
