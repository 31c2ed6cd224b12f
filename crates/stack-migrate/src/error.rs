//! Error types for stack-migrate.
//!
//! Errors fall into the classes the engine treats differently: transient
//! remote failures are retried, item-level failures are recorded and
//! skipped, and structural failures abort the module (and with it the
//! branch and the run).

use thiserror::Error;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while exporting or importing a stack.
///
/// Error codes follow the pattern `MIG-XXX` so log lines can be grepped.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration (MIG-001).
    #[error("[MIG-001] Configuration error: {0}")]
    Config(String),

    /// IO error (MIG-002).
    #[error("[MIG-002] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error (MIG-003).
    #[error("[MIG-003] Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse error (MIG-004).
    #[error("[MIG-004] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Transport-level HTTP failure (MIG-005).
    #[error("[MIG-005] HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote API rate limit hit; value is the suggested wait in seconds (MIG-006).
    #[error("[MIG-006] Rate limited, retry after {0}s")]
    RateLimit(u64),

    /// Credentials rejected by the remote API (MIG-007).
    #[error("[MIG-007] Authentication failed: {0}")]
    Authentication(String),

    /// Remote API returned an unexpected status (MIG-008).
    #[error("[MIG-008] API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message returned by the API.
        message: String,
    },

    /// Requested entity does not exist on the remote stack (MIG-009).
    #[error("[MIG-009] Not found: {0}")]
    NotFound(String),

    /// Entity already exists on the target stack (MIG-010).
    #[error("[MIG-010] Already exists: {0}")]
    Conflict(String),

    /// Failure that makes the current module impossible to complete (MIG-011).
    #[error("[MIG-011] Structural error: {0}")]
    Structural(String),

    /// A module failed; wraps the underlying cause (MIG-012).
    #[error("[MIG-012] Module '{module}' failed: {source}")]
    Module {
        /// Display name of the failing module.
        module: String,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// A branch failed; aborts the whole run (MIG-013).
    #[error("[MIG-013] Branch '{branch}' failed: {source}")]
    Branch {
        /// UID of the failing branch.
        branch: String,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns the error code (e.g., "MIG-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "MIG-001",
            Self::Io(_) => "MIG-002",
            Self::Serialization(_) => "MIG-003",
            Self::Yaml(_) => "MIG-004",
            Self::Http(_) => "MIG-005",
            Self::RateLimit(_) => "MIG-006",
            Self::Authentication(_) => "MIG-007",
            Self::Api { .. } => "MIG-008",
            Self::NotFound(_) => "MIG-009",
            Self::Conflict(_) => "MIG-010",
            Self::Structural(_) => "MIG-011",
            Self::Module { .. } => "MIG-012",
            Self::Branch { .. } => "MIG-013",
        }
    }

    /// Wraps this error as a failure of `module`.
    #[must_use]
    pub fn in_module(self, module: &str) -> Self {
        Self::Module {
            module: module.to_string(),
            source: Box::new(self),
        }
    }

    /// Wraps this error as a failure of `branch`.
    #[must_use]
    pub fn in_branch(self, branch: &str) -> Self {
        Self::Branch {
            branch: branch.to_string(),
            source: Box::new(self),
        }
    }

    /// Returns true for transient failures worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit(_) | Self::Io(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Module { source, .. } | Self::Branch { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::Config("x".into()).code(), "MIG-001");
        assert_eq!(Error::Conflict("x".into()).code(), "MIG-010");
        assert_eq!(
            Error::Structural("x".into()).in_module("assets").code(),
            "MIG-012"
        );
    }

    #[test]
    fn test_branch_error_names_branch() {
        let err = Error::Structural("boom".into())
            .in_module("entries")
            .in_branch("develop");
        let msg = err.to_string();
        assert!(msg.contains("develop"));
        assert!(msg.contains("entries"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::RateLimit(1).is_retryable());
        assert!(Error::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!Error::Api {
            status: 422,
            message: "invalid".into()
        }
        .is_retryable());
        assert!(!Error::Authentication("401".into()).is_retryable());
        assert!(!Error::Conflict("dup".into()).is_retryable());
    }
}
