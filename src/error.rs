//! Error handling for the ElasticBLAST orchestrator
//!
//! All failures are mapped to one of six [`ErrorKind`] categories, each with
//! a fixed process exit code. Leaf operations construct errors through the
//! helper constructors below; the command layer converts the final error to
//! an exit code and prints the message to stderr.

use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Essential external errors that can't be consolidated
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // Consolidated error variant carrying the taxonomy kind
    #[error("{kind}: {message}")]
    Report {
        kind: ErrorKind,
        message: Cow<'static, str>,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Error categories with their process exit codes.
///
/// `Transient` has no exit code of its own: it is retried at the call site
/// and promoted to `Cluster` when the retry budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed CLI arguments, configuration, or query input
    Input,
    /// Quota exceeded or a required cloud tool is missing
    Dependency,
    /// Cluster provisioning, job submission, or teardown failed
    Cluster,
    /// Credentials rejected by the cloud provider
    Permission,
    /// Retryable condition (network timeout, throttling)
    Transient,
    /// Broken invariant inside the orchestrator
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "Input error",
            Self::Dependency => "Dependency error",
            Self::Cluster => "Cluster error",
            Self::Permission => "Permission error",
            Self::Transient => "Transient error",
            Self::Internal => "Internal error",
        }
    }

    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Input => 1,
            Self::Dependency => 2,
            // Transient errors that escape the retry loop are cluster errors
            Self::Cluster | Self::Transient => 3,
            Self::Permission => 4,
            Self::Internal => 5,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Input,
            Self::Json(_) | Self::Yaml(_) | Self::Anyhow(_) => ErrorKind::Internal,
            Self::Report { kind, .. } => *kind,
        }
    }

    /// Exit code reported to the shell for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// True for errors worth retrying with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Create an input error
    pub fn input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Report {
            kind: ErrorKind::Input,
            message: message.into(),
        }
    }

    /// Create a malformed-input error for a query stream that is not what
    /// its name or contents claim (wrong magic bytes, non-FASTA data)
    pub fn malformed_input(message: impl Into<String>) -> Self {
        Self::Report {
            kind: ErrorKind::Input,
            message: Cow::Owned(format!("Malformed input: {}", message.into())),
        }
    }

    /// Create an empty-input error, raised only when a caller requires at
    /// least one query batch
    pub fn empty_input(message: impl Into<String>) -> Self {
        Self::Report {
            kind: ErrorKind::Input,
            message: Cow::Owned(format!("Empty input: {}", message.into())),
        }
    }

    /// Create an already-exists error for a results URI owned by another
    /// search
    pub fn already_exists(results: impl Into<String>) -> Self {
        Self::Report {
            kind: ErrorKind::Input,
            message: Cow::Owned(format!(
                "Results {} already hold an ElasticBLAST search with a different configuration. Use a fresh results URI or delete the existing search first",
                results.into()
            )),
        }
    }

    /// Create a not-found error for a missing object or file
    pub fn not_found(uri: impl Into<String>) -> Self {
        Self::Report {
            kind: ErrorKind::Input,
            message: Cow::Owned(format!("{} was not found", uri.into())),
        }
    }

    /// Create a dependency error (quota, missing external tool)
    pub fn dependency(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Report {
            kind: ErrorKind::Dependency,
            message: message.into(),
        }
    }

    /// Create a cluster error
    pub fn cluster(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Report {
            kind: ErrorKind::Cluster,
            message: message.into(),
        }
    }

    /// Create a permission error
    pub fn permission(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Report {
            kind: ErrorKind::Permission,
            message: message.into(),
        }
    }

    /// Create a transient error, retried at the call site
    pub fn transient(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Report {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Report {
            kind: ErrorKind::Internal,
            message: message.into(),
        }
    }

    /// Promote a transient error to a cluster error after the retry budget
    /// is exhausted; other kinds pass through unchanged.
    #[must_use]
    pub fn promote(self, attempts: u32) -> Self {
        match self {
            Self::Report {
                kind: ErrorKind::Transient,
                message,
            } => Self::Report {
                kind: ErrorKind::Cluster,
                message: Cow::Owned(format!("gave up after {attempts} attempts: {message}")),
            },
            other => other,
        }
    }

    /// Add context to an error for better user messaging
    #[must_use]
    pub fn with_context(self, context: &str) -> Self {
        match self {
            Self::Report { kind, message } => Self::Report {
                kind,
                message: Cow::Owned(format!("{context}: {message}")),
            },
            Self::Io(e) => Self::Report {
                kind: ErrorKind::Input,
                message: Cow::Owned(format!("{context}: {e}")),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
