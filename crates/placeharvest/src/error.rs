//! Error types for configuration and library plumbing.
//!
//! Per-listing failures are not errors: they travel as
//! [`ExtractionOutcome`](crate::record::ExtractionOutcome) values and end up
//! as failure records in the dataset. Only the variants here abort a run.

use std::path::PathBuf;

/// All errors that can abort a harvest run.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    /// Invalid configuration or input; raised before any extraction starts.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("selector set error: {0}")]
    Selectors(String),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("identity pool is closed")]
    PoolClosed,
}

impl HarvestError {
    pub fn config(msg: impl Into<String>) -> Self {
        HarvestError::Config(msg.into())
    }

    /// True for errors that must stop the run before extraction.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HarvestError::Config(_) | HarvestError::Selectors(_) | HarvestError::ReadFile { .. }
        )
    }
}

pub type HarvestResult<T> = Result<T, HarvestError>;
