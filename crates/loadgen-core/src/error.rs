use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoadError>;

/// Errors that stop a run.
///
/// Individual send failures are not errors at this level: they are recorded
/// as [`crate::AttemptStatus`] values and counted by the metrics.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The preflight probe did not get a 200 from the target.
    #[error("target {url} is not reachable: {reason}")]
    Connectivity { url: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl LoadError {
    pub fn config(msg: impl Into<String>) -> Self {
        LoadError::Config(msg.into())
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, LoadError::Connectivity { .. })
    }
}
