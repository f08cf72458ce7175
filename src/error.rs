//! Error types for the kuberbac operator

use thiserror::Error;

/// Main error type for kuberbac operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs and selectors
    #[error("validation error: {0}")]
    Validation(String),

    /// Discovery of the cluster's API surface failed
    #[error("discovery error: {0}")]
    Discovery(String),

    /// The `synchronization.time` field could not be parsed as a duration
    #[error("invalid synchronization time: {0}")]
    SyncTime(String),

    /// Several independent failures collected from a multi-item loop
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Aggregate(Vec<Error>),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a discovery error with the given message
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create a sync-time parsing error with the given message
    pub fn sync_time(msg: impl Into<String>) -> Self {
        Self::SyncTime(msg.into())
    }

    /// Collapse the errors collected by a multi-item loop into a single
    /// result, so one failed deletion does not mask the others.
    pub fn join(errors: Vec<Error>) -> Result<(), Error> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.into_iter().next().unwrap()),
            _ => Err(Error::Aggregate(errors)),
        }
    }

    /// Returns true for errors caused by a rejected or malformed spec,
    /// which are reported via status conditions instead of being retried.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
