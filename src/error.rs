//! Error types for the DirectPV control plane
//!
//! Provides structured error types for every component: device probing,
//! formatting, the resource store, selectors, the drive lifecycle engine,
//! admin workflows and the node API.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Argument parsing, ellipsis expansion or selector compilation failed.
    /// Raised before any call reaches the resource store.
    #[error("{0}")]
    Validation(String),

    #[error("unsupported init config version {0}")]
    UnsupportedInitConfigVersion(String),

    // =========================================================================
    // Resource Store Errors
    // =========================================================================
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic-concurrency failure on update
    #[error("the object {kind} {name} has been modified; please apply your changes to the latest version and try again")]
    Conflict { kind: String, name: String },

    #[error("{kind} {name} has finalizers present")]
    FinalizersPresent { kind: String, name: String },

    #[error("watch stream error: {0}")]
    Watch(String),

    // =========================================================================
    // Sentinels
    // =========================================================================
    #[error("no matching resources found")]
    NoMatchingResourcesFound,

    #[error("no drives are provided to init")]
    NoDrivesToInit,

    #[error("DirectPV installation is incomplete; {0}")]
    InstallationIncomplete(String),

    #[error("{0}")]
    OperationFailed(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// A precondition on an entity was violated
    #[error("{0}")]
    State(String),

    // =========================================================================
    // Device Errors
    // =========================================================================
    #[error("device {device}: {reason}")]
    Device { device: String, reason: String },

    #[error("device probe failed: {0}")]
    Probe(String),

    #[error("{command} failed: {reason}")]
    Command { command: String, reason: String },

    // =========================================================================
    // Workflow Errors
    // =========================================================================
    #[error("{0}")]
    Timeout(String),

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("{0}")]
    Auth(String),

    #[error("node API request failed: {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Serialization / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Build a not-found error for a resource kind
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Build a conflict error for a resource kind
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Build a device error
    pub fn device(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Device {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::Conflict { .. } | Error::Watch(_) | Error::Http(_) => {
                ErrorAction::RequeueWithBackoff
            }

            // Waiting on volumes to drain
            Error::FinalizersPresent { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Device issues - slower retry
            Error::Device { .. } | Error::Probe(_) | Error::Command { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Validation/state errors - don't retry automatically
            Error::Configuration(_)
            | Error::Validation(_)
            | Error::UnsupportedInitConfigVersion(_)
            | Error::State(_)
            | Error::NotFound { .. }
            | Error::NoMatchingResourcesFound
            | Error::NoDrivesToInit
            | Error::Auth(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => resp.code >= 500 || resp.code == 429,
            Error::Kube(_) | Error::Watch(_) | Error::Http(_) => true,
            _ => false,
        }
    }

    /// Check if this error reports a missing resource
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// Check if this error was raised before any side effect
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::UnsupportedInitConfigVersion(_) | Error::NoDrivesToInit
        )
    }

    /// Process exit code for an admin command failing with this error
    pub fn exit_code(&self) -> i32 {
        if self.is_validation() {
            255
        } else {
            1
        }
    }
}

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;

/// Ignore a not-found error, mapping it to `None`
pub fn ignore_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_error_actions() {
        let err = Error::FinalizersPresent {
            kind: "DirectPVDrive".into(),
            name: "d1".into(),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(30))
        );

        let err = Error::Validation("empty node name".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::device("sda", "device state changed");
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_error_retryable() {
        let conflict = Error::conflict("DirectPVDrive", "d1");
        assert!(conflict.is_retryable());
        assert!(conflict.is_conflict());
        assert!(!conflict.is_transient());

        let state = Error::State("source drive is not cordoned".into());
        assert!(!state.is_retryable());
    }

    #[test]
    fn test_kube_api_error_classification() {
        let not_found = Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "not found".into(),
            reason: "NotFound".into(),
            code: 404,
        }));
        assert!(not_found.is_not_found());
        assert!(!not_found.is_transient());

        let unavailable = Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "etcdserver: leader changed".into(),
            reason: "ServiceUnavailable".into(),
            code: 503,
        }));
        assert!(unavailable.is_transient());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Validation("no drive selected".into()).exit_code(), 255);
        assert_eq!(Error::NoMatchingResourcesFound.exit_code(), 1);
        assert_eq!(Error::OperationFailed("unable to remove drive(s)".into()).exit_code(), 1);
    }

    #[test]
    fn test_ignore_not_found() {
        let missing: Result<u32> = Err(Error::not_found("DirectPVNode", "n1"));
        assert_matches!(ignore_not_found(missing), Ok(None));

        let other: Result<u32> = Err(Error::Timeout("timed out".into()));
        assert_matches!(ignore_not_found(other), Err(Error::Timeout(_)));

        assert_matches!(ignore_not_found(Ok(7)), Ok(Some(7)));
    }
}
