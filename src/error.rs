//! Error types for the LocalStack harness.

use std::time::Duration;

use thiserror::Error;

/// Result type for instance operations.
pub type Result<T> = std::result::Result<T, LocalstackError>;

/// Errors surfaced by [`Instance`](crate::Instance) operations and the
/// endpoint resolvers.
#[derive(Debug, Error)]
pub enum LocalstackError {
    /// No container engine client could be built.
    #[error("localstack: could not connect to docker: {reason}")]
    EngineUnreachable {
        /// Reason the client could not be created.
        reason: String,
    },

    /// The requested version is neither "latest" nor a semantic version.
    #[error("localstack: invalid version {version:?} specified: {source}")]
    InvalidVersion {
        /// Version string as given by the caller.
        version: String,
        /// Parser failure.
        #[source]
        source: semver::Error,
    },

    /// Stopping the previous container before a restart failed.
    #[error("localstack: can't stop an already running instance: {0}")]
    RestartFailed(#[source] Box<LocalstackError>),

    /// The image could neither be built nor pulled.
    #[error("localstack: could not prepare image {image}: {reason}")]
    ImageUnavailable {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// The engine refused to create the container.
    #[error("localstack: could not create container: {reason}")]
    ContainerCreateFailed {
        /// Reason for failure.
        reason: String,
    },

    /// The engine refused to start the created container.
    #[error("localstack: could not start container {id}: {reason}")]
    ContainerStartFailed {
        /// Container ID.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Host ports never showed up on the container.
    #[error("localstack: could not get port from container: {reason}")]
    PortDiscoveryFailed {
        /// What was missing.
        reason: String,
    },

    /// The container went away while the harness was waiting on it.
    #[error("localstack: container {id} has been stopped")]
    ContainerDisappeared {
        /// Container ID.
        id: String,
    },

    /// The caller cancelled the start before LocalStack became ready.
    #[error("localstack: cancelled while waiting for the container")]
    Cancelled,

    /// The engine refused to stop the container.
    #[error("localstack: could not stop container {id}: {reason}")]
    StopFailed {
        /// Container ID.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// An engine call outside the steps above failed.
    #[error("localstack: {0}")]
    Engine(#[from] EngineError),

    /// A resolver was asked for an endpoint while none is published.
    #[error("localstack: failed to parse uri {endpoint:?}: {reason}")]
    MalformedEndpoint {
        /// Endpoint string that failed to parse.
        endpoint: String,
        /// Parser failure.
        reason: String,
    },
}

impl LocalstackError {
    /// Whether the whole start sequence may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LocalstackError::ContainerDisappeared { .. })
    }
}

/// Errors reported by a [`ContainerEngine`](crate::docker::ContainerEngine).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The container or image does not exist.
    #[error("no such container: {id}")]
    NotFound {
        /// Container ID or image reference.
        id: String,
    },

    /// Any other engine API failure.
    #[error("{operation} failed: {reason}")]
    Api {
        /// Engine operation that failed.
        operation: &'static str,
        /// Reason for failure.
        reason: String,
    },
}

impl EngineError {
    pub(crate) fn api(operation: &'static str, reason: impl ToString) -> Self {
        EngineError::Api {
            operation,
            reason: reason.to_string(),
        }
    }
}

/// Failures of a single readiness probe round trip. Expected while
/// LocalStack boots; never surfaced to callers.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The request did not reach the endpoint.
    #[error("request to {url} failed: {reason}")]
    Request {
        /// URL that was called.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The endpoint answered with an error status.
    #[error("{operation} answered {status}: {body}")]
    Status {
        /// DynamoDB operation name.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The probe did not complete in time.
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be used.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        message: String,
    },

    /// A variable is set but not valid unicode.
    #[error("{key} is not valid unicode")]
    NotUnicode {
        /// Variable name.
        key: String,
    },
}
