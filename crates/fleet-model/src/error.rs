//! Error types for the topology model.

use thiserror::Error;

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while parsing identifiers or finalizing a snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid application reference {0:?}: expected tenant:instance")]
    InvalidReference(String),

    #[error("duplicate application instance: {0}")]
    DuplicateApplication(String),

    #[error("duplicate cluster {cluster} in application {application}")]
    DuplicateCluster { application: String, cluster: String },

    #[error("host {host} serves both {first} and {second}")]
    HostInMultipleApplications {
        host: String,
        first: String,
        second: String,
    },

    #[error("invalid topology document: {0}")]
    Document(String),
}
