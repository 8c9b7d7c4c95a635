//! Error types for the fleetconfig operator

use thiserror::Error;

/// Main error type for fleetconfig operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// clusteradm invocation error
    #[error("clusteradm error: {0}")]
    Clusteradm(String),

    /// Kubeconfig resolution or materialization error
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Hub initialization or upgrade error
    #[error("hub error: {0}")]
    Hub(String),

    /// Spoke join, upgrade, or deregistration error
    #[error("spoke error: {0}")]
    Spoke(String),

    /// Bundle version detection error
    #[error("version error: {0}")]
    Version(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cleanup preflight or teardown error
    #[error("cleanup error: {0}")]
    Cleanup(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a clusteradm error with the given message
    pub fn clusteradm(msg: impl Into<String>) -> Self {
        Self::Clusteradm(msg.into())
    }

    /// Create a kubeconfig error with the given message
    pub fn kubeconfig(msg: impl Into<String>) -> Self {
        Self::Kubeconfig(msg.into())
    }

    /// Create a hub error with the given message
    pub fn hub(msg: impl Into<String>) -> Self {
        Self::Hub(msg.into())
    }

    /// Create a spoke error with the given message
    pub fn spoke(msg: impl Into<String>) -> Self {
        Self::Spoke(msg.into())
    }

    /// Create a version error with the given message
    pub fn version(msg: impl Into<String>) -> Self {
        Self::Version(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a cleanup error with the given message
    pub fn cleanup(msg: impl Into<String>) -> Self {
        Self::Cleanup(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation in Fleet Operations
    // ==========================================================================
    //
    // These tests demonstrate how errors flow through the system during
    // hub and spoke lifecycle operations. Each error type represents a
    // different failure category with specific handling requirements.

    /// Story: admission validation catches misconfigurations before reconcile
    ///
    /// When a user creates a FleetConfig with an invalid kubeconfig reference,
    /// the validation layer rejects it with a clear error message.
    #[test]
    fn story_validation_prevents_invalid_fleetconfig_creation() {
        // Scenario: kubeconfig specifies neither form
        let err = Error::validation(
            "either secretReference or inCluster must be specified for the kubeconfig",
        );
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("secretReference"));

        // Scenario: hosted-mode spoke is missing its managed cluster kubeconfig
        let err = Error::validation("managedClusterKubeconfig is required in hosted mode");
        assert!(err.to_string().contains("hosted mode"));

        match Error::validation("any message") {
            Error::Validation(msg) => assert_eq!(msg, "any message"),
            _ => panic!("Expected Validation variant"),
        }
    }

    /// Story: clusteradm failures carry the subprocess output
    ///
    /// When a clusteradm invocation fails, the combined stdout+stderr is
    /// preserved in the error so the condition message names what went wrong.
    #[test]
    fn story_clusteradm_errors_preserve_output() {
        let err = Error::clusteradm(
            "failed to init hub: exit status 1, output: error: namespace already exists",
        );
        assert!(err.to_string().contains("clusteradm error"));
        assert!(err.to_string().contains("namespace already exists"));

        match Error::clusteradm("join failed") {
            Error::Clusteradm(msg) => assert_eq!(msg, "join failed"),
            _ => panic!("Expected Clusteradm variant"),
        }
    }

    /// Story: cleanup errors block deletion until resolved
    ///
    /// The deletion path surfaces cleanup errors on the CleanupFailed
    /// condition while the finalizer holds the object alive.
    #[test]
    fn story_cleanup_errors_name_the_blocking_cluster() {
        let err = Error::cleanup(
            "Found manifestWorks for ManagedCluster spoke-a; cannot clean hub while any ManagedClusters have active ManifestWorks",
        );
        assert!(err.to_string().contains("cleanup error"));
        assert!(err.to_string().contains("spoke-a"));
    }

    /// Story: version detection failures abort upgrade decisions
    #[test]
    fn story_version_errors_during_upgrade_detection() {
        let err = Error::version("no valid bundle versions detected");
        assert!(err.to_string().contains("version error"));
        assert!(err.to_string().contains("no valid bundle versions"));
    }

    /// Story: error helper functions accept both String and &str
    #[test]
    fn story_error_construction_ergonomics() {
        let dynamic_msg = format!("spoke {} not found", "edge-1");
        let err = Error::hub(dynamic_msg);
        assert!(err.to_string().contains("edge-1"));

        let err = Error::kubeconfig("static message");
        assert!(err.to_string().contains("static message"));
    }
}
