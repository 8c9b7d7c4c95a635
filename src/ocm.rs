//! OCM registration resource access
//!
//! The controller consumes hub- and spoke-side OCM kinds (ClusterManager,
//! Klusterlet, ManagedCluster, ManifestWork) without compiling against their
//! Go types: each is addressed as a `DynamicObject` through a fixed
//! `ApiResource`, and the fields the controller cares about are read from the
//! raw JSON. Clients are built per reconciliation from resolved kubeconfig
//! bytes.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::json;

use crate::{Error, Result};

/// Name of the singleton ClusterManager resource on a hub
pub const CLUSTER_MANAGER_NAME: &str = "cluster-manager";

/// Name of the singleton Klusterlet resource on a spoke
pub const KLUSTERLET_NAME: &str = "klusterlet";

/// Condition type a ManagedCluster reports once its agent has joined
pub const MANAGED_CLUSTER_JOINED_CONDITION: &str = "ManagedClusterJoined";

fn managed_cluster_resource() -> ApiResource {
    ApiResource {
        group: "cluster.open-cluster-management.io".to_string(),
        version: "v1".to_string(),
        api_version: "cluster.open-cluster-management.io/v1".to_string(),
        kind: "ManagedCluster".to_string(),
        plural: "managedclusters".to_string(),
    }
}

fn cluster_manager_resource() -> ApiResource {
    ApiResource {
        group: "operator.open-cluster-management.io".to_string(),
        version: "v1".to_string(),
        api_version: "operator.open-cluster-management.io/v1".to_string(),
        kind: "ClusterManager".to_string(),
        plural: "clustermanagers".to_string(),
    }
}

fn klusterlet_resource() -> ApiResource {
    ApiResource {
        group: "operator.open-cluster-management.io".to_string(),
        version: "v1".to_string(),
        api_version: "operator.open-cluster-management.io/v1".to_string(),
        kind: "Klusterlet".to_string(),
        plural: "klusterlets".to_string(),
    }
}

fn manifest_work_resource() -> ApiResource {
    ApiResource {
        group: "work.open-cluster-management.io".to_string(),
        version: "v1".to_string(),
        api_version: "work.open-cluster-management.io/v1".to_string(),
        kind: "ManifestWork".to_string(),
        plural: "manifestworks".to_string(),
    }
}

/// Trait abstracting OCM resource operations against a single cluster
///
/// Implemented over a `kube::Client` for the real control planes and mocked
/// in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OcmApi: Send + Sync {
    /// Get the `cluster-manager` ClusterManager, if present
    async fn get_cluster_manager(&self) -> Result<Option<DynamicObject>>;

    /// Get the `klusterlet` Klusterlet, if present
    async fn get_klusterlet(&self) -> Result<Option<DynamicObject>>;

    /// Get a ManagedCluster by name, if present
    async fn get_managed_cluster(&self, name: &str) -> Result<Option<DynamicObject>>;

    /// List all ManagedClusters; `None` when the kind itself is not served
    async fn list_managed_clusters(&self) -> Result<Option<Vec<DynamicObject>>>;

    /// Delete all ManagedClusters with foreground propagation
    async fn delete_all_managed_clusters(&self) -> Result<()>;

    /// Delete one ManagedCluster, tolerating absence
    async fn delete_managed_cluster(&self, name: &str) -> Result<()>;

    /// Merge a label onto a ManagedCluster
    async fn label_managed_cluster(&self, name: &str, key: &str, value: &str) -> Result<()>;

    /// List ManifestWorks in the given namespace
    async fn list_manifest_works(&self, namespace: &str) -> Result<Vec<DynamicObject>>;
}

/// Trait building an [`OcmApi`] from raw kubeconfig bytes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OcmConnector: Send + Sync {
    /// Connect to the cluster the kubeconfig points at
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn OcmApi>>;
}

/// Real OCM client over a `kube::Client`
pub struct RealOcmApi {
    client: Client,
}

impl RealOcmApi {
    /// Wrap an established client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn all(&self, ar: &ApiResource) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), ar)
    }
}

fn ignore_not_found<T>(res: kube::Result<T>) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(Error::Kube(e)),
    }
}

#[async_trait]
impl OcmApi for RealOcmApi {
    async fn get_cluster_manager(&self) -> Result<Option<DynamicObject>> {
        ignore_not_found(self.all(&cluster_manager_resource()).get(CLUSTER_MANAGER_NAME).await)
    }

    async fn get_klusterlet(&self) -> Result<Option<DynamicObject>> {
        ignore_not_found(self.all(&klusterlet_resource()).get(KLUSTERLET_NAME).await)
    }

    async fn get_managed_cluster(&self, name: &str) -> Result<Option<DynamicObject>> {
        ignore_not_found(self.all(&managed_cluster_resource()).get(name).await)
    }

    async fn list_managed_clusters(&self) -> Result<Option<Vec<DynamicObject>>> {
        let res = self
            .all(&managed_cluster_resource())
            .list(&ListParams::default())
            .await;
        Ok(ignore_not_found(res)?.map(|list| list.items))
    }

    async fn delete_all_managed_clusters(&self) -> Result<()> {
        let res = self
            .all(&managed_cluster_resource())
            .delete_collection(&DeleteParams::foreground(), &ListParams::default())
            .await;
        ignore_not_found(res)?;
        Ok(())
    }

    async fn delete_managed_cluster(&self, name: &str) -> Result<()> {
        let res = self
            .all(&managed_cluster_resource())
            .delete(name, &DeleteParams::default())
            .await;
        ignore_not_found(res)?;
        Ok(())
    }

    async fn label_managed_cluster(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let mut labels = serde_json::Map::new();
        labels.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        let patch = json!({ "metadata": { "labels": labels } });
        self.all(&managed_cluster_resource())
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_manifest_works(&self, namespace: &str) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &manifest_work_resource());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

/// Connector that builds clients from raw kubeconfig bytes
pub struct KubeconfigConnector;

#[async_trait]
impl OcmConnector for KubeconfigConnector {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn OcmApi>> {
        let yaml = std::str::from_utf8(kubeconfig)
            .map_err(|e| Error::kubeconfig(format!("kubeconfig is not valid UTF-8: {e}")))?;
        let parsed = kube::config::Kubeconfig::from_yaml(yaml)
            .map_err(|e| Error::kubeconfig(format!("failed to load kubeconfig: {e}")))?;
        let config = kube::Config::from_custom_kubeconfig(
            parsed,
            &kube::config::KubeConfigOptions::default(),
        )
        .await
        .map_err(|e| Error::kubeconfig(format!("failed to build client config: {e}")))?;
        let client = Client::try_from(config)
            .map_err(|e| Error::kubeconfig(format!("failed to build client: {e}")))?;
        Ok(Arc::new(RealOcmApi::new(client)))
    }
}

/// Find a condition by type in a resource's `status.conditions`
pub fn find_condition<'a>(obj: &'a DynamicObject, ctype: &str) -> Option<&'a serde_json::Value> {
    obj.data
        .get("status")?
        .get("conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(|t| t.as_str()) == Some(ctype))
}

/// The `status` field of a condition value
pub fn condition_status(cond: &serde_json::Value) -> Option<&str> {
    cond.get("status").and_then(|s| s.as_str())
}

/// The `message` field of a condition value
pub fn condition_message(cond: &serde_json::Value) -> &str {
    cond.get("message").and_then(|m| m.as_str()).unwrap_or("")
}

/// Read a non-empty string field from a resource's `spec`
pub fn spec_string(obj: &DynamicObject, field: &str) -> Option<String> {
    let value = obj.data.get("spec")?.get(field)?.as_str()?;
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Build a DynamicObject fixture with the given name and raw data
#[cfg(test)]
pub(crate) fn dynamic_fixture(name: &str, data: serde_json::Value) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &managed_cluster_resource());
    obj.data = data;
    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story: Reading Remote Resource State Without Typed Bindings
    //
    // The controller makes join and upgrade decisions off a handful of fields
    // on foreign CRDs. These helpers are the only place that raw JSON paths
    // appear.
    // ==========================================================================

    /// A condition is found by its type and exposes status and message
    #[test]
    fn find_condition_locates_the_requested_type() {
        let obj = dynamic_fixture(
            "spoke-a",
            json!({
                "status": {
                    "conditions": [
                        { "type": "HubAcceptedManagedCluster", "status": "True" },
                        { "type": "ManagedClusterJoined", "status": "True", "message": "joined" },
                    ]
                }
            }),
        );

        let cond = find_condition(&obj, MANAGED_CLUSTER_JOINED_CONDITION).unwrap();
        assert_eq!(condition_status(cond), Some("True"));
        assert_eq!(condition_message(cond), "joined");
    }

    /// Missing status, conditions, or type all yield None
    #[test]
    fn find_condition_tolerates_missing_structure() {
        let no_status = dynamic_fixture("a", json!({}));
        assert!(find_condition(&no_status, "Any").is_none());

        let no_conditions = dynamic_fixture("b", json!({ "status": {} }));
        assert!(find_condition(&no_conditions, "Any").is_none());

        let other_types = dynamic_fixture(
            "c",
            json!({ "status": { "conditions": [ { "type": "Other" } ] } }),
        );
        assert!(find_condition(&other_types, "Any").is_none());
    }

    /// Spec strings are surfaced only when present and non-empty
    #[test]
    fn spec_string_skips_empty_and_missing_fields() {
        let obj = dynamic_fixture(
            "cm",
            json!({
                "spec": {
                    "registrationImagePullSpec": "quay.io/ocm/registration:v0.6.0",
                    "workImagePullSpec": "",
                }
            }),
        );

        assert_eq!(
            spec_string(&obj, "registrationImagePullSpec").as_deref(),
            Some("quay.io/ocm/registration:v0.6.0")
        );
        assert!(spec_string(&obj, "workImagePullSpec").is_none());
        assert!(spec_string(&obj, "placementImagePullSpec").is_none());
    }

    /// A message-less condition renders as an empty message rather than
    /// panicking
    #[test]
    fn condition_message_defaults_to_empty() {
        let obj = dynamic_fixture(
            "spoke-a",
            json!({
                "status": { "conditions": [ { "type": "ManagedClusterJoined", "status": "False" } ] }
            }),
        );
        let cond = find_condition(&obj, MANAGED_CLUSTER_JOINED_CONDITION).unwrap();
        assert_eq!(condition_message(cond), "");
    }
}
