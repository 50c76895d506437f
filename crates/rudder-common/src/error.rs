//! Error types for rudder-federation
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants follow the failure categories of a fan-out call: failures that
//! abort a call before any cluster is touched (classification, discovery,
//! substitution) and failures scoped to one target (configuration, execution).

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for rudder-federation operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A manifest document could not be parsed
    #[error("malformed manifest: {message}")]
    Classification {
        /// Description of what's malformed
        message: String,
        /// Zero-based index of the offending document (if known)
        document: Option<usize>,
    },

    /// The federation cluster registry could not be queried
    #[error("fleet discovery failed: {message}")]
    Discovery {
        /// Description of what failed
        message: String,
    },

    /// Control-plane credentials are missing or invalid
    #[error("configuration error [{target}]: {message}")]
    Configuration {
        /// Target the configuration belongs to
        target: String,
        /// Description of what's missing or invalid
        message: String,
    },

    /// A per-target create/update/get/delete failed
    #[error("{operation} failed on {target}: {message}")]
    Execution {
        /// Identity of the cluster the operation ran against
        target: String,
        /// Operation that failed (create, update, get, delete)
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// Template or regex failure while rewriting an install manifest
    #[error("substitution error: {message}")]
    Substitution {
        /// Description of what failed
        message: String,
        /// The replacement pattern being processed (if known)
        pattern: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "fanout", "startup")
        context: String,
    },
}

impl Error {
    /// Create a classification error pointing at one document
    pub fn classification_at(document: usize, msg: impl Into<String>) -> Self {
        Self::Classification {
            message: msg.into(),
            document: Some(document),
        }
    }

    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery {
            message: msg.into(),
        }
    }

    /// Create a configuration error without a specific target
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            target: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a configuration error for a specific target
    pub fn configuration_for(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create an execution error for an operation on a target
    pub fn execution_for(
        target: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Execution {
            target: target.into(),
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a substitution error
    pub fn substitution(msg: impl Into<String>) -> Self {
        Self::Substitution {
            message: msg.into(),
            pattern: None,
        }
    }

    /// Create a substitution error for a specific replacement pattern
    pub fn substitution_for_pattern(pattern: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Substitution {
            message: msg.into(),
            pattern: Some(pattern.into()),
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

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
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
    /// Malformed input (classification, substitution, serialization) and
    /// configuration problems need an operator fix. Discovery and execution
    /// failures are usually transient at the cluster level.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Don't retry on 4xx errors (validation, not found, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Classification { .. } => false,
            Error::Discovery { .. } => true,
            Error::Configuration { .. } => false,
            Error::Execution { .. } => true,
            Error::Substitution { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the target identity if this error is scoped to one cluster
    pub fn target(&self) -> Option<&str> {
        match self {
            Error::Configuration { target, .. } => Some(target),
            Error::Execution { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Whether this error aborts a call before any cluster is touched
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(
            self,
            Error::Classification { .. } | Error::Discovery { .. } | Error::Substitution { .. }
        )
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: How failures surface from a federated release call
    // ==========================================================================

    /// Story: A broken manifest is rejected before any cluster is contacted
    #[test]
    fn story_malformed_manifest_aborts_before_dispatch() {
        let err = Error::classification_at(2, "document is not a mapping");
        assert!(err.to_string().contains("malformed manifest"));
        assert!(err.is_pre_dispatch());
        assert!(!err.is_retryable());

        match err {
            Error::Classification { document, .. } => assert_eq!(document, Some(2)),
            _ => panic!("Expected Classification variant"),
        }
    }

    /// Story: The registry being unreachable is transient and total
    #[test]
    fn story_registry_outage_is_retryable_discovery_failure() {
        let err = Error::discovery("connection refused");
        assert!(err.to_string().contains("fleet discovery failed"));
        assert!(err.is_pre_dispatch());
        assert!(err.is_retryable());
        assert_eq!(err.target(), None);
    }

    /// Story: Missing control-plane credentials only affect that target
    #[test]
    fn story_missing_credentials_scoped_to_control_plane() {
        let err = Error::configuration_for("federation", "credentials unavailable");
        assert_eq!(err.target(), Some("federation"));
        assert!(!err.is_pre_dispatch());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("[federation]"));
    }

    /// Story: A member failure names the member and the operation
    #[test]
    fn story_execution_error_names_target_and_operation() {
        let err = Error::execution_for("https://10.0.0.7:6443", "create", "already exists");
        let msg = err.to_string();
        assert!(msg.contains("create failed on https://10.0.0.7:6443"));
        assert!(msg.contains("already exists"));
        assert_eq!(err.target(), Some("https://10.0.0.7:6443"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_substitution_error_keeps_pattern() {
        let err = Error::substitution_for_pattern("mariadb-(", "unclosed group");
        match &err {
            Error::Substitution { pattern, .. } => assert_eq!(pattern.as_deref(), Some("mariadb-(")),
            _ => panic!("Expected Substitution variant"),
        }
        assert!(err.is_pre_dispatch());
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
    }

    #[test]
    fn test_internal_error_with_context() {
        let err = Error::internal_with_context("fanout", "task panicked");
        assert_eq!(err.context(), Some("fanout"));
        assert!(err.to_string().contains("[fanout]"));
    }

    #[test]
    fn test_serialization_for_kind() {
        let err = Error::serialization_for_kind("Deployment", "missing field 'spec'");
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Deployment")),
            _ => panic!("Expected Serialization variant"),
        }
        assert!(!err.is_retryable());
    }
}
