use std::error::Error;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the benchmark driver.
#[derive(Debug, Error)]
pub enum BenchError {
    /// A command-line or configuration value is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A check that must hold before any timing begins did not.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("failed to parse parameter file {}: {source}", path.display())]
    ParamFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Failure raised by the network collaborator, passed through as-is.
    #[error(transparent)]
    Network(Box<dyn Error + Send + Sync + 'static>),
}

impl BenchError {
    pub fn network<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        BenchError::Network(Box::new(err))
    }
}
