//! Error types for the scan engine.
use std::path::PathBuf;

use thiserror::Error;

use crate::types::ScanState;

/// Errors surfaced by the engine. Per-address probe failures are not errors;
/// see [`crate::prober::ProbeMiss`].
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to write results file {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("coordinator is {actual:?}, expected {expected:?}")]
    InvalidState { expected: ScanState, actual: ScanState },

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("worker task failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
