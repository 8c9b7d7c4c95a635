//! Supporting types for the FleetConfig CRD

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{CONDITION_REASON_RECONCILE_SUCCESS, DEFAULT_OCM_REGISTRY};

/// FleetConfig lifecycle phase
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum FleetConfigPhase {
    /// The Hub and Spoke(s) are being initialized / joined
    Initializing,
    /// The Hub is initialized and all Spoke(s) have joined successfully
    Running,
    /// A failure occurred during Hub initialization and/or a Spoke join attempt
    Unhealthy,
    /// The FleetConfig is being deleted
    Deleting,
}

impl std::fmt::Display for FleetConfigPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "Initializing"),
            Self::Running => write!(f, "Running"),
            Self::Unhealthy => write!(f, "Unhealthy"),
            Self::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A typed status fact on a FleetConfig.
///
/// In addition to the standard Kubernetes condition fields, each condition
/// records the status value that indicates success (`wantStatus`), so the
/// phase machine can detect misaligned conditions generically.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. HubInitialized)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// The status value that indicates success for this condition
    pub want_status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        message: impl Into<String>,
        type_: impl Into<String>,
        status: ConditionStatus,
        want_status: ConditionStatus,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            want_status,
            reason: CONDITION_REASON_RECONCILE_SUCCESS.to_string(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Returns true if the condition is identical to the supplied condition,
    /// ignoring the last transition time
    pub fn equal(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.want_status == other.want_status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Specification for an OCM hub cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hub {
    /// ClusterManager configuration
    #[serde(default = "default_cluster_manager")]
    pub cluster_manager: Option<ClusterManager>,

    /// If true, create the open-cluster-management namespace, otherwise use an
    /// existing one
    #[serde(default = "default_true")]
    pub create_namespace: bool,

    /// If set, the hub will be reinitialized
    #[serde(default)]
    pub force: bool,

    /// Kubeconfig details for the Hub cluster
    pub kubeconfig: Kubeconfig,

    /// Singleton control plane configuration. If provided, deploy a singleton
    /// control plane instead of a clustermanager. This is an alpha stage flag.
    #[serde(default, rename = "singleton", skip_serializing_if = "Option::is_none")]
    pub singleton_control_plane: Option<SingletonControlPlane>,

    /// API server URL for the Hub cluster. If provided, spokes are joined
    /// using this API server instead of the one in the obtained kubeconfig.
    /// Useful when an in-cluster kubeconfig would advertise an unreachable
    /// server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<String>,
}

fn default_cluster_manager() -> Option<ClusterManager> {
    Some(ClusterManager::default())
}

fn default_true() -> bool {
    true
}

/// Configuration for a singleton control plane
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SingletonControlPlane {
    /// The name of the singleton control plane
    #[serde(default = "default_singleton_name")]
    pub name: String,

    /// Helm configuration for the multicluster-controlplane chart
    #[serde(default)]
    pub helm: Helm,
}

fn default_singleton_name() -> String {
    "singleton-controlplane".to_string()
}

/// Helm value overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Helm {
    /// Raw, YAML-formatted Helm values
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub values: String,

    /// Comma-separated Helm values, e.g. key1=val1,key2=val2
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set: Vec<String>,

    /// Comma-separated Helm JSON values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_json: Vec<String>,

    /// Comma-separated Helm literal STRING values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_literal: Vec<String>,

    /// Comma-separated Helm STRING values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_string: Vec<String>,
}

/// Configuration for a cluster manager
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManager {
    /// A set of comma-separated key=value pairs describing feature gates for
    /// alpha/experimental features, e.g. "AddonManagement=true,ResourceCleanup=true"
    #[serde(default = "default_hub_feature_gates")]
    pub feature_gates: String,

    /// If set, the cluster manager operator will be purged and the
    /// open-cluster-management namespace deleted when the FleetConfig is
    /// deleted
    #[serde(default = "default_true")]
    pub purge_operator: bool,

    /// Resource specifications for all clustermanager-managed containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,

    /// Version and image registry details for the cluster manager
    #[serde(default = "default_source")]
    pub source: Option<OCMSource>,

    /// If set, a bootstrap token is used instead of a service account token
    #[serde(default)]
    pub use_bootstrap_token: bool,
}

fn default_hub_feature_gates() -> String {
    "AddonManagement=true".to_string()
}

fn default_source() -> Option<OCMSource> {
    Some(OCMSource::default())
}

impl Default for ClusterManager {
    fn default() -> Self {
        Self {
            feature_gates: default_hub_feature_gates(),
            purge_operator: true,
            resources: None,
            source: default_source(),
            use_bootstrap_token: false,
        }
    }
}

/// Version and registry source for OCM images
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OCMSource {
    /// The version of predefined compatible image versions (e.g. v0.6.0).
    /// "default" selects the latest released version; "latest" installs the
    /// latest development version.
    #[serde(default = "default_bundle_version")]
    pub bundle_version: String,

    /// The image registry serving OCM images, used for all OCM components
    #[serde(default = "default_registry")]
    pub registry: String,
}

fn default_bundle_version() -> String {
    "default".to_string()
}

fn default_registry() -> String {
    DEFAULT_OCM_REGISTRY.to_string()
}

impl Default for OCMSource {
    fn default() -> Self {
        Self {
            bundle_version: default_bundle_version(),
            registry: default_registry(),
        }
    }
}

/// How to obtain a kubeconfig for a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Kubeconfig {
    /// A reference to an existing secret containing a kubeconfig. Must be
    /// provided for remote clusters; for same-cluster operations it must be
    /// provided unless inCluster is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_reference: Option<SecretReference>,

    /// If set, the kubeconfig is derived from the cluster the controller runs
    /// in. Only applicable for same-cluster operations
    #[serde(default)]
    pub in_cluster: bool,

    /// The context to use in the kubeconfig file
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
}

/// How to retrieve a kubeconfig stored as a secret
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// The name of the secret
    pub name: String,

    /// The namespace the secret is in
    pub namespace: String,

    /// The map key to access the kubeconfig. Leave empty to use 'kubeconfig'
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_key: Option<String>,
}

/// Specification for joining and potentially upgrading a spoke cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Spoke {
    /// The name of the spoke cluster
    #[schemars(length(max = 63), regex(pattern = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$"))]
    pub name: String,

    /// If true, create the open-cluster-management namespace and agent
    /// namespace, otherwise use existing ones
    #[serde(default = "default_true")]
    pub create_namespace: bool,

    /// If true, sync the labels from klusterlet to all agent resources
    #[serde(default)]
    pub sync_labels: bool,

    /// Kubeconfig details for the Spoke cluster
    pub kubeconfig: Kubeconfig,

    /// Hub cluster CA certificate, optional
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca: String,

    /// Proxy CA certificate, optional
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy_ca: String,

    /// URL of a forward proxy server used by agents to connect to the Hub
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy_url: String,

    /// Klusterlet configuration
    #[serde(default)]
    pub klusterlet: Klusterlet,

    /// ARN of the spoke cluster, optionally used for AWS IRSA registration
    /// authentication
    #[serde(default, rename = "clusterARN", skip_serializing_if = "String::is_empty")]
    pub cluster_arn: String,
}

impl Spoke {
    /// Status condition type indicating that this spoke has joined the Hub
    pub fn join_type(&self) -> String {
        format!("spoke-cluster-{}-joined", self.condition_name())
    }

    fn condition_name(&self) -> &str {
        // account for the extra 21 chars in the condition type (max. total of 63)
        truncate(&self.name, 42)
    }
}

/// The status echo of a successfully joined spoke. Retained so deletion knows
/// what to unjoin even if the spec has diverged.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinedSpoke {
    /// The name of the spoke cluster
    pub name: String,

    /// Kubeconfig details for the Spoke cluster
    pub kubeconfig: Kubeconfig,

    /// If set, the klusterlet operator is purged and all
    /// open-cluster-management namespaces deleted when the klusterlet is
    /// unjoined from its Hub
    #[serde(default = "default_true")]
    pub purge_klusterlet_operator: bool,
}

impl JoinedSpoke {
    /// Status condition type indicating that this spoke has been removed from
    /// the Hub
    pub fn unjoin_type(&self) -> String {
        format!("spoke-cluster-{}-unjoined", self.condition_name())
    }

    fn condition_name(&self) -> &str {
        // account for the extra 23 chars in the condition type (max. total of 63)
        truncate(&self.name, 40)
    }
}

fn truncate(name: &str, max: usize) -> &str {
    if name.len() > max {
        &name[..max]
    } else {
        name
    }
}

/// Deployment mode for a klusterlet
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum KlusterletMode {
    /// Klusterlet components run on the managed cluster itself
    #[default]
    Default,
    /// Klusterlet components run outside the managed cluster
    Hosted,
}

impl std::fmt::Display for KlusterletMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Hosted => write!(f, "Hosted"),
        }
    }
}

/// Configuration for a klusterlet
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Klusterlet {
    /// A set of comma-separated key=value pairs describing feature gates for
    /// alpha/experimental features
    #[serde(default = "default_klusterlet_feature_gates")]
    pub feature_gates: String,

    /// Deployment mode for the klusterlet
    #[serde(default)]
    pub mode: KlusterletMode,

    /// If set, the klusterlet operator is purged and all
    /// open-cluster-management namespaces deleted when the klusterlet is
    /// unjoined from its Hub
    #[serde(default = "default_true")]
    pub purge_operator: bool,

    /// If true, the installed klusterlet agent starts cluster registration by
    /// looking up the internal endpoint from the public cluster-info in the
    /// Hub cluster instead of using hubApiServer
    #[serde(default)]
    pub force_internal_endpoint_lookup: bool,

    /// External managed cluster kubeconfig, required if using hosted mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_cluster_kubeconfig: Option<Kubeconfig>,

    /// If true, the klusterlet accesses the managed cluster using the internal
    /// endpoint from the public cluster-info in the managed cluster instead of
    /// using managedClusterKubeconfig
    #[serde(default)]
    pub force_internal_endpoint_lookup_managed: bool,

    /// Resource specifications for all klusterlet-managed containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,

    /// If true, deploy the klusterlet in singleton mode, with registration and
    /// work agents running in a single pod. This is an alpha stage flag.
    #[serde(default)]
    pub singleton: bool,

    /// Version and image registry details for the klusterlet
    #[serde(default = "default_source")]
    pub source: Option<OCMSource>,
}

fn default_klusterlet_feature_gates() -> String {
    "AddonManagement=true,ClusterClaim=true".to_string()
}

impl Default for Klusterlet {
    fn default() -> Self {
        Self {
            feature_gates: default_klusterlet_feature_gates(),
            mode: KlusterletMode::Default,
            purge_operator: true,
            force_internal_endpoint_lookup: false,
            managed_cluster_kubeconfig: None,
            force_internal_endpoint_lookup_managed: false,
            resources: None,
            singleton: false,
            source: default_source(),
        }
    }
}

/// Resource QoS class for operator-managed containers
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum QosClass {
    /// Default QoS
    #[default]
    Default,
    /// Best-effort QoS
    BestEffort,
    /// Explicit resource requirements
    ResourceRequirement,
}

impl std::fmt::Display for QosClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::BestEffort => write!(f, "BestEffort"),
            Self::ResourceRequirement => write!(f, "ResourceRequirement"),
        }
    }
}

/// Resource limits and requests for operator-managed containers
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Resource limits of all the containers managed by the Cluster Manager or
    /// Klusterlet operators
    #[serde(default)]
    pub limits: ResourceValues,

    /// Resource requests of all the containers managed by the Cluster Manager
    /// or Klusterlet operators
    #[serde(default)]
    pub requests: ResourceValues,

    /// Resource QoS class of all the containers managed by the Cluster Manager
    /// or Klusterlet operators
    #[serde(default)]
    pub qos_class: QosClass,
}

/// Container resource constraints
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceValues {
    /// The number of CPU units to request, e.g. '800m'
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu: String,

    /// The amount of memory to request, e.g. '8Gi'
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory: String,
}

impl std::fmt::Display for ResourceValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.cpu.is_empty(), self.memory.is_empty()) {
            (false, false) => write!(f, "cpu={},memory={}", self.cpu, self.memory),
            (false, true) => write!(f, "cpu={}", self.cpu),
            (true, false) => write!(f, "memory={}", self.memory),
            (true, true) => Ok(()),
        }
    }
}

/// Registration authentication driver
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationDriver {
    /// Default CSR-based registration authentication
    #[default]
    Csr,
    /// AWS IAM Role for Service Accounts (IRSA) registration authentication
    Awsirsa,
}

impl std::fmt::Display for RegistrationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csr => write!(f, "csr"),
            Self::Awsirsa => write!(f, "awsirsa"),
        }
    }
}

/// Specification for registration authentication
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationAuth {
    /// The registration authentication driver to use
    #[serde(default)]
    pub driver: RegistrationDriver,

    /// The Hub cluster ARN for awsirsa registration authentication. Required
    /// when the driver is awsirsa, otherwise ignored
    #[serde(default, rename = "hubClusterARN", skip_serializing_if = "String::is_empty")]
    pub hub_cluster_arn: String,

    /// AWS EKS ARN patterns; any EKS cluster matching one of these patterns is
    /// auto-accepted when joining the hub.
    /// Example pattern: "arn:aws:eks:us-west-2:123456789013:cluster/.*"
    #[serde(default, rename = "autoApprovedARNPatterns", skip_serializing_if = "Vec::is_empty")]
    pub auto_approved_arn_patterns: Vec<String>,
}

impl RegistrationAuth {
    /// The registration driver for an optional RegistrationAuth, defaulting to
    /// csr when unset
    pub fn driver_or_default(ra: Option<&RegistrationAuth>) -> RegistrationDriver {
        ra.map(|r| r.driver.clone()).unwrap_or_default()
    }
}

/// Parse a comma-separated `key=value` feature gates string into a map.
///
/// Whitespace around tokens is tolerated; entries without exactly one `=` or
/// with a non-boolean value are skipped.
pub fn extract_feature_gates(feature_gates: &str) -> HashMap<String, bool> {
    let mut gates = HashMap::new();
    if feature_gates.is_empty() {
        return gates;
    }
    for gate in feature_gates.split(',') {
        let parts: Vec<&str> = gate.trim().split('=').collect();
        if parts.len() != 2 {
            continue;
        }
        let feature = parts[0].trim();
        match parts[1].trim().parse::<bool>() {
            Ok(enabled) => {
                gates.insert(feature.to_string(), enabled);
            }
            Err(_) => continue,
        }
    }
    gates
}
