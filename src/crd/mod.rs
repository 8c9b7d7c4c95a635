//! Custom Resource Definitions for the fleetconfig operator
//!
//! The FleetConfig CRD declares a federated fleet topology: one hub cluster
//! and a set of spoke clusters registered with it.

mod fleetconfig;
mod types;
pub mod validation;

pub use fleetconfig::{FleetConfig, FleetConfigSpec, FleetConfigStatus};
pub use types::{
    extract_feature_gates, ClusterManager, Condition, ConditionStatus, FleetConfigPhase, Helm, Hub,
    JoinedSpoke, Klusterlet, KlusterletMode, Kubeconfig, OCMSource, QosClass, RegistrationAuth,
    RegistrationDriver, ResourceSpec, ResourceValues, SecretReference, SingletonControlPlane,
    Spoke,
};

/// API group of the FleetConfig CRD
pub const GROUP: &str = "fleetconfig.open-cluster-management.io";

/// Finalizer guaranteeing cleanup runs before deletion completes
pub const FLEETCONFIG_FINALIZER: &str = "fleetconfig.open-cluster-management.io/cleanup";

/// Condition type recording that the hub has been initialized
pub const CONDITION_HUB_INITIALIZED: &str = "HubInitialized";

/// Condition type recording that a failure occurred during cleanup
pub const CONDITION_CLEANUP_FAILED: &str = "CleanupFailed";

/// Reason recorded on every controller-authored condition
pub const CONDITION_REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";

/// Label key recording the role of a ManagedCluster in the fleet
pub const LABEL_MANAGED_CLUSTER_TYPE: &str =
    "fleetconfig.open-cluster-management.io/managedClusterType";

/// ManagedCluster type label value for a cluster that is both hub and spoke
pub const MANAGED_CLUSTER_TYPE_HUB_AS_SPOKE: &str = "hub-as-spoke";

/// Label OCM places on CertificateSigningRequests raised during registration
pub const CSR_CLUSTER_NAME_LABEL: &str = "open-cluster-management.io/cluster-name";

/// The OCM feature gate controlling transitive resource cleanup
pub const RESOURCE_CLEANUP_FEATURE_GATE: &str = "ResourceCleanup";

/// Default registry serving OCM images
pub const DEFAULT_OCM_REGISTRY: &str = "quay.io/open-cluster-management";
