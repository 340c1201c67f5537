//! Error types for formsync.
//!
//! Every fallible operation in the crate returns [`Result`]. The predicates on
//! [`Error`] are what the submission client and the sync worker use to decide
//! between falling back to the queue, leaving a record pending, or surfacing
//! a failure to the user.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// The main error type for formsync operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// The local queue store could not be opened.
    ///
    /// Offline capability is disabled; online submission still works.
    #[error("local queue store unavailable at {path}: {source}")]
    StorageUnavailable {
        /// Path to the database file.
        path: PathBuf,
        /// What went wrong while opening, configuring or migrating it.
        #[source]
        source: Box<Error>,
    },

    /// An operation needed the local queue store, but none could be opened.
    #[error("offline storage is not available")]
    OfflineStorageDisabled,

    /// No pending record has this key.
    #[error("no pending submission with key {key}")]
    RecordNotFound {
        /// The local key that was looked up.
        key: i64,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Remote Errors ===
    /// A delivery or fetch request did not complete.
    #[error("network failure: {0}")]
    Network(String),

    /// The remote endpoint answered but declined the request.
    #[error("remote endpoint rejected the request ({status}): {body}")]
    RemoteRejection {
        /// HTTP status returned by the endpoint.
        status: StatusCode,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The configured base URL cannot be used to build request URLs.
    #[error("invalid base URL '{url}': {message}")]
    InvalidBaseUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    // === Submission Errors ===
    /// A submission failed field validation.
    #[error("invalid submission: {}", .problems.join("; "))]
    InvalidSubmission {
        /// One entry per failed field.
        problems: Vec<String>,
    },

    // === Background Task Errors ===
    /// The background task facility refused a registration.
    #[error("background task '{tag}' failed: {message}")]
    BackgroundTask {
        /// The sync tag.
        tag: String,
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for formsync operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl Error {
    /// Create a new network failure.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wrap a failure to open or prepare the queue store at `path`.
    #[must_use]
    pub fn storage_unavailable(path: impl Into<PathBuf>, source: impl Into<Error>) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            source: Box::new(source.into()),
        }
    }

    /// Create a remote rejection error.
    #[must_use]
    pub fn remote_rejection(status: StatusCode, body: impl Into<String>) -> Self {
        Self::RemoteRejection {
            status,
            body: body.into(),
        }
    }

    /// Create a background task error.
    #[must_use]
    pub fn background_task(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackgroundTask {
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// Check if the request never got an answer from the remote endpoint.
    #[must_use]
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Check if the remote endpoint answered with a non-success status.
    #[must_use]
    pub fn is_remote_rejection(&self) -> bool {
        matches!(self, Self::RemoteRejection { .. })
    }

    /// Check if the local queue store could not be opened.
    #[must_use]
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_error() -> Option<rusqlite::Error> {
        rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )
        .err()
    }

    #[test]
    fn test_remote_rejection_display() {
        let err = Error::remote_rejection(StatusCode::BAD_REQUEST, "email is invalid");
        let msg = err.to_string();
        assert!(msg.contains("400"));
        assert!(msg.contains("email is invalid"));
        assert!(err.is_remote_rejection());
        assert!(!err.is_network_failure());
    }

    #[test]
    fn test_network_failure() {
        let err = Error::network("connection refused");
        assert_eq!(err.to_string(), "network failure: connection refused");
        assert!(err.is_network_failure());
        assert!(!err.is_remote_rejection());
    }

    #[test]
    fn test_invalid_submission_joins_problems() {
        let err = Error::InvalidSubmission {
            problems: vec!["name is required".to_string(), "email is required".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "invalid submission: name is required; email is required"
        );
    }

    #[test]
    fn test_storage_unavailable() {
        if let Some(source) = open_error() {
            let err = Error::storage_unavailable("/nonexistent/path/db.sqlite", source);
            assert!(err.is_storage_unavailable());
            assert!(std::error::Error::source(&err).is_some());
            assert!(err.to_string().contains("/nonexistent/path/db.sqlite"));
        }
    }

    #[test]
    fn test_from_rusqlite_error() {
        if let Some(sqlite_err) = open_error() {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
            assert!(!err.is_storage_unavailable());
        }
    }

    #[test]
    fn test_record_not_found_display() {
        let err = Error::RecordNotFound { key: 12 };
        assert_eq!(err.to_string(), "no pending submission with key 12");
        assert_eq!(
            Error::OfflineStorageDisabled.to_string(),
            "offline storage is not available"
        );
    }

    #[test]
    fn test_background_task_error() {
        let err = Error::background_task("sync-form", "facility offline");
        let msg = err.to_string();
        assert!(msg.contains("sync-form"));
        assert!(msg.contains("facility offline"));
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "base_url is empty".to_string(),
        };
        assert!(err.to_string().contains("base_url is empty"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
