//! Error types for componator handlers
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant names the resource it concerns (a role name, a policy ARN)
//! so that log lines and status messages point at the failing object.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for componator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Cloud provider API error
    #[error("provider error [{operation}] for {resource}: {message}")]
    Provider {
        /// Resource the call was made against
        resource: String,
        /// Provider operation that failed (e.g., "AttachRolePolicy")
        operation: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// The provider reported that the target entity does not exist
    #[error("not found: {resource}: {message}")]
    NotFound {
        /// Resource that could not be found
        resource: String,
        /// Description from the provider
        message: String,
    },

    /// Validation error for handler configuration
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "managedPolicyArns")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The kind of payload being processed (if known)
        kind: Option<String>,
    },

    /// The convergence pass was cancelled before it finished
    #[error("convergence pass for {resource} cancelled")]
    Cancelled {
        /// Resource whose pass was cancelled
        resource: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a retryable provider error
    pub fn provider(
        resource: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            resource: resource.into(),
            operation: operation.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error (malformed input, access denied)
    pub fn provider_permanent(
        resource: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            resource: resource.into(),
            operation: operation.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without resource context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with payload kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a cancellation error for the given resource
    pub fn cancelled(resource: impl Into<String>) -> Self {
        Self::Cancelled {
            resource: resource.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are not retryable (require config fix).
    /// An unexpected not-found is not retryable either: the parent resource is gone.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider { retryable, .. } => *retryable,
            Error::NotFound { .. } => false,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Cancelled { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Check if the provider reported the target as missing
    ///
    /// Delete and detach calls treat this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Get the resource name if this error is associated with one
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Provider { resource, .. } => Some(resource),
            Error::NotFound { resource, .. } => Some(resource),
            Error::Validation { resource, .. } => Some(resource),
            Error::Cancelled { resource } => Some(resource),
            Error::Serialization { .. } => None,
            Error::Internal { .. } => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
            kind: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation in Convergence Passes
    // ==========================================================================

    /// Story: Throttling during an attach is retried on the next pass
    #[test]
    fn story_throttled_provider_call_is_retryable() {
        let err = Error::provider("app-role", "AttachRolePolicy", "Throttling: Rate exceeded");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("AttachRolePolicy"));
        assert!(err.to_string().contains("app-role"));
        assert_eq!(err.resource(), Some("app-role"));
    }

    /// Story: A malformed policy document is rejected permanently
    #[test]
    fn story_malformed_document_is_permanent() {
        let err = Error::provider_permanent(
            "arn:aws:iam::123456789012:policy/app",
            "CreatePolicyVersion",
            "MalformedPolicyDocument: Syntax errors in policy",
        );
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("MalformedPolicyDocument"));
    }

    /// Story: Not-found is distinguishable so deletes can stay idempotent
    #[test]
    fn story_not_found_is_typed() {
        let err = Error::not_found("app-role", "NoSuchEntity: role app-role cannot be found");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert!(!Error::provider("r", "op", "boom").is_not_found());
    }

    /// Story: Config validation failures point at the offending field
    #[test]
    fn story_validation_errors_carry_field() {
        let err = Error::validation_for_field(
            "app-role",
            "managedPolicyArns",
            "must contain at least one policy ARN",
        );
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("managedPolicyArns"));
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());

        let err = Error::validation("anything");
        assert_eq!(err.resource(), Some(UNKNOWN_CONTEXT));
    }

    #[test]
    fn cancelled_pass_is_retryable() {
        let err = Error::cancelled("app-role");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!err.is_retryable());
        assert_eq!(err.resource(), None);
    }

    #[test]
    fn internal_error_with_context() {
        let err = Error::internal_with_context("reconciler", "unexpected state");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[reconciler]"));
    }
}
