//! Error types for the support archive operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the archive, domain or path it concerns so that a
//! single log line is enough to locate the failing piece of work.

use std::path::Path;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for support archive operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for a SupportArchive spec
    #[error("validation error for {archive}: {message}")]
    Validation {
        /// Archive (`namespace/name`) with the invalid configuration
        archive: String,
        /// Description of what's invalid
        message: String,
    },

    /// Filesystem error in the work tree or the archive directory
    #[error("storage error at {path}: {message}")]
    Storage {
        /// Path that could not be read or written
        path: String,
        /// Description of what failed
        message: String,
    },

    /// A collector failed to produce its records
    #[error("collection error [{domain}]: {message}")]
    Collection {
        /// Collector domain that failed
        domain: String,
        /// Description of what failed
        message: String,
    },

    /// The record stream between producer and consumer broke
    #[error("stream error: {message}")]
    Stream {
        /// Description of what failed
        message: String,
    },

    /// The operation observed a fired cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Building or removing a zip artifact failed
    #[error("archive error for {archive}: {message}")]
    Archive {
        /// Archive (`namespace/name`) being assembled
        archive: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Metrics backend query failed
    #[error("metrics error for query '{query}': {message}")]
    Metrics {
        /// Query sent to the backend
        query: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "sync", "gc", "reconciler")
        context: String,
    },

    /// Several independent operations failed
    #[error("{} errors: {}", errors.len(), join_messages(errors))]
    Multiple {
        /// The individual failures, in the order they occurred
        errors: Vec<Error>,
    },
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a validation error with archive context
    pub fn validation_for(archive: impl std::fmt::Display, msg: impl Into<String>) -> Self {
        Self::Validation {
            archive: archive.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error without archive context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::validation_for(UNKNOWN_CONTEXT, msg)
    }

    /// Create a storage error for the given path
    pub fn storage(path: impl AsRef<Path>, msg: impl Into<String>) -> Self {
        Self::Storage {
            path: path.as_ref().display().to_string(),
            message: msg.into(),
        }
    }

    /// Wrap an I/O error that happened at `path`
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::storage(path, source.to_string())
    }

    /// Create a collection error for a domain
    pub fn collection(domain: impl std::fmt::Display, msg: impl Into<String>) -> Self {
        Self::Collection {
            domain: domain.to_string(),
            message: msg.into(),
        }
    }

    /// Create a stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream {
            message: msg.into(),
        }
    }

    /// Create an archive error with archive context
    pub fn archive(archive: impl std::fmt::Display, msg: impl Into<String>) -> Self {
        Self::Archive {
            archive: archive.to_string(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a metrics error for the given query
    pub fn metrics(query: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Metrics {
            query: query.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::internal_with_context(UNKNOWN_CONTEXT, msg)
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Aggregate independent failures into a single result
    ///
    /// No errors is `Ok(())`, a single error is returned unchanged and
    /// anything more is wrapped in [`Error::Multiple`].
    pub fn join(mut errors: Vec<Error>) -> Result<(), Error> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple { errors }),
        }
    }

    /// Check if this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec or code fix.
    /// Everything touching the API server, the filesystem or a collector is
    /// expected to succeed on a later reconcile.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Multiple { errors } => errors.iter().any(Error::is_retryable),
            Error::Storage { .. }
            | Error::Collection { .. }
            | Error::Stream { .. }
            | Error::Cancelled
            | Error::Archive { .. }
            | Error::Metrics { .. }
            | Error::Internal { .. } => true,
        }
    }
}
