//! FleetConfig reconciliation loop
//!
//! One reconciliation drives the hub first, then every declared spoke, and
//! persists all status mutations in a single deferred patch. Deletion is
//! gated by a finalizer: cleanup must succeed at least once before the
//! finalizer is released and the object disappears.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::crd::{
    extract_feature_gates, Condition, ConditionStatus, FleetConfig, FleetConfigPhase,
    FleetConfigStatus, Kubeconfig, ResourceSpec, CONDITION_CLEANUP_FAILED,
    CONDITION_HUB_INITIALIZED, CSR_CLUSTER_NAME_LABEL, FLEETCONFIG_FINALIZER,
    RESOURCE_CLEANUP_FEATURE_GATE,
};
use crate::exec::{Clusteradm, ClusteradmCli};
use crate::kubeconfig;
use crate::ocm::{KubeconfigConnector, OcmApi, OcmConnector};
use crate::{Error, Result};

use super::{hub, spoke};

/// Steady-state requeue cadence
pub(crate) const REQUEUE: Duration = Duration::from_secs(30);

/// Poll interval for cleanup-time deletion waits
pub(crate) const CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

/// Trait abstracting local-cluster operations for the controller
///
/// Everything the reconciler does against the cluster it runs in goes through
/// this seam, so the full reconcile flow is testable without an API server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FleetApi: Send + Sync {
    /// Fetch a secret, `None` when absent
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Patch the status subresource of a FleetConfig
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &FleetConfigStatus,
    ) -> Result<()>;

    /// Replace the finalizer list of a FleetConfig
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()>;

    /// Delete a namespace, tolerating absence
    async fn delete_namespace(&self, name: &str, foreground: bool) -> Result<()>;

    /// Whether a namespace currently exists
    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    /// List CertificateSigningRequests carrying the OCM cluster-name label
    async fn list_cluster_csrs(&self) -> Result<Vec<CertificateSigningRequest>>;

    /// Delete a CertificateSigningRequest, tolerating absence
    async fn delete_csr(&self, name: &str) -> Result<()>;

    /// Raw kubeconfig bytes for the cluster the controller runs in
    fn in_cluster_kubeconfig(&self) -> Result<Vec<u8>>;
}

/// Real local-cluster implementation over a `kube::Client`
pub struct RealFleetApi {
    client: Client,
}

impl RealFleetApi {
    /// Wrap an established client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn swallow_not_found<T>(res: kube::Result<T>) -> Result<()> {
    match res {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(Error::Kube(e)),
    }
}

#[async_trait]
impl FleetApi for RealFleetApi {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &FleetConfigStatus,
    ) -> Result<()> {
        let api: Api<FleetConfig> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let api: Api<FleetConfig> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str, foreground: bool) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params = if foreground {
            DeleteParams::foreground()
        } else {
            DeleteParams::default()
        };
        swallow_not_found(api.delete(name, &params).await)
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn list_cluster_csrs(&self) -> Result<Vec<CertificateSigningRequest>> {
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        let params = ListParams::default().labels(CSR_CLUSTER_NAME_LABEL);
        Ok(api.list(&params).await?.items)
    }

    async fn delete_csr(&self, name: &str) -> Result<()> {
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        swallow_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    fn in_cluster_kubeconfig(&self) -> Result<Vec<u8>> {
        kubeconfig::in_cluster_raw()
    }
}

/// Controller context containing shared state and clients
///
/// The context is shared across all reconciliation calls and holds the trait
/// objects for the local cluster, remote cluster connections, and the
/// clusteradm runner.
pub struct Context {
    /// Local-cluster operations
    pub fleet: Arc<dyn FleetApi>,
    /// Builds OCM clients from resolved kubeconfig bytes
    pub ocm: Arc<dyn OcmConnector>,
    /// clusteradm subprocess runner
    pub clusteradm: Arc<dyn Clusteradm>,
}

impl Context {
    /// Create a new controller context with the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self {
            fleet: Arc::new(RealFleetApi::new(client)),
            ocm: Arc::new(KubeconfigConnector),
            clusteradm: Arc::new(ClusteradmCli::new()),
        }
    }

    /// Create a context with custom implementations, primarily for tests
    pub fn with_clients(
        fleet: Arc<dyn FleetApi>,
        ocm: Arc<dyn OcmConnector>,
        clusteradm: Arc<dyn Clusteradm>,
    ) -> Self {
        Self {
            fleet,
            ocm,
            clusteradm,
        }
    }
}

/// Resolve raw kubeconfig bytes for a kubeconfig spec: either the in-cluster
/// identity or the referenced secret.
pub(crate) async fn resolve_kubeconfig(
    fleet: &dyn FleetApi,
    kc: &Kubeconfig,
) -> Result<Vec<u8>> {
    if kc.in_cluster {
        return fleet.in_cluster_kubeconfig();
    }
    if let Some(secret_ref) = &kc.secret_reference {
        let secret = fleet
            .get_secret(&secret_ref.namespace, &secret_ref.name)
            .await?
            .ok_or_else(|| {
                Error::kubeconfig(format!(
                    "kubeconfig secret {}/{} not found",
                    secret_ref.namespace, secret_ref.name
                ))
            })?;
        return kubeconfig::from_secret(&secret, kc);
    }
    Err(Error::kubeconfig(
        "either secretReference or inCluster must be specified for the kubeconfig",
    ))
}

/// Render resource sizing flags for clusteradm init/join
pub(crate) fn resource_flags(resources: &ResourceSpec) -> Vec<String> {
    let mut flags = vec![
        "--resource-qos-class".to_string(),
        resources.qos_class.to_string(),
    ];
    let requests = resources.requests.to_string();
    if !requests.is_empty() {
        flags.push("--resource-requests".to_string());
        flags.push(requests);
    }
    let limits = resources.limits.to_string();
    if !limits.is_empty() {
        flags.push("--resource-limits".to_string());
        flags.push(limits);
    }
    flags
}

fn is_not_found(err: &Error) -> bool {
    matches!(err, Error::Kube(kube::Error::Api(ae)) if ae.code == 404)
}

fn set_phase(fc: &mut FleetConfig, phase: FleetConfigPhase) {
    fc.status.get_or_insert_with(Default::default).phase = Some(phase);
}

fn phase(fc: &FleetConfig) -> Option<FleetConfigPhase> {
    fc.status.as_ref().and_then(|s| s.phase.clone())
}

/// Reconcile a FleetConfig resource
///
/// Observes the declared fleet topology, drives the hub and spokes toward
/// it, and records progress as conditions. All status mutations made during
/// the pass are persisted at the end, including on the error path.
#[instrument(skip(fc, ctx), fields(fleetconfig = %fc.name_any()))]
pub async fn reconcile(fc: Arc<FleetConfig>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = fc.namespace().unwrap_or_default();
    let name = fc.name_any();
    info!("reconciling fleetconfig");

    let original = (*fc).clone();
    let mut fc = (*fc).clone();

    let outcome = reconcile_inner(&mut fc, &ctx).await;

    persist(&ctx, &namespace, &name, &original, &fc).await;

    outcome
}

async fn reconcile_inner(fc: &mut FleetConfig, ctx: &Context) -> Result<Action> {
    // Finalizer insertion precedes any work so cleanup is guaranteed to run
    if !fc
        .finalizers()
        .iter()
        .any(|f| f == FLEETCONFIG_FINALIZER)
    {
        fc.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(FLEETCONFIG_FINALIZER.to_string());
        return Ok(Action::requeue(Duration::ZERO));
    }

    // Deletion path excludes the normal path entirely
    if fc.metadata.deletion_timestamp.is_some() {
        if phase(fc) != Some(FleetConfigPhase::Deleting) {
            set_phase(fc, FleetConfigPhase::Deleting);
            return Ok(Action::requeue(Duration::ZERO));
        }
        if let Err(e) = cleanup(ctx, fc).await {
            fc.set_conditions(
                true,
                [Condition::new(
                    e.to_string(),
                    CONDITION_CLEANUP_FAILED,
                    ConditionStatus::True,
                    ConditionStatus::False,
                )],
            );
            return Err(e);
        }
        // cleanup released the finalizer; the object disappears now
        return Ok(Action::await_change());
    }

    // Initialize phase & conditions
    let previous_phase = phase(fc);
    set_phase(fc, FleetConfigPhase::Initializing);
    let mut init_conditions = vec![
        Condition::new(
            CONDITION_HUB_INITIALIZED,
            CONDITION_HUB_INITIALIZED,
            ConditionStatus::False,
            ConditionStatus::True,
        ),
        Condition::new(
            CONDITION_CLEANUP_FAILED,
            CONDITION_CLEANUP_FAILED,
            ConditionStatus::False,
            ConditionStatus::False,
        ),
    ];
    for s in &fc.spec.spokes {
        init_conditions.push(Condition::new(
            "",
            s.join_type(),
            ConditionStatus::False,
            ConditionStatus::True,
        ));
    }
    fc.set_conditions(false, init_conditions);

    if previous_phase.is_none() {
        // first pass: record initial phase/conditions, then requeue
        return Ok(Action::requeue(Duration::ZERO));
    }

    // Handle Hub cluster: initialization and/or upgrade. The hub must have
    // reached HubInitialized=True on a previous pass before spokes are
    // touched.
    let hub_initialized = fc.condition_is_true(CONDITION_HUB_INITIALIZED);
    if let Err(e) = hub::handle_hub(ctx, fc).await {
        error!(error = %e, "failed to handle hub operations");
        set_phase(fc, FleetConfigPhase::Unhealthy);
    }
    if !hub_initialized {
        return Ok(Action::requeue(Duration::ZERO));
    }

    // Handle Spoke clusters: join and/or upgrade
    if let Err(e) = spoke::handle_spokes(ctx, fc).await {
        error!(error = %e, "failed to handle spoke operations");
        set_phase(fc, FleetConfigPhase::Unhealthy);
    }

    // Finalize phase
    let misaligned = fc
        .status
        .as_ref()
        .and_then(|s| s.conditions.iter().find(|c| c.status != c.want_status))
        .cloned();
    if let Some(c) = misaligned {
        warn!(
            condition = %c.type_,
            status = %c.status,
            want_status = %c.want_status,
            message = %c.message,
            "condition does not have the desired status"
        );
        set_phase(fc, FleetConfigPhase::Unhealthy);
        return Ok(Action::requeue(REQUEUE));
    }
    if phase(fc) == Some(FleetConfigPhase::Initializing) {
        set_phase(fc, FleetConfigPhase::Running);
    }

    Ok(Action::requeue(REQUEUE))
}

/// Persist finalizer and status mutations, ignoring a racing deletion
async fn persist(
    ctx: &Context,
    namespace: &str,
    name: &str,
    original: &FleetConfig,
    fc: &FleetConfig,
) {
    if original.metadata.finalizers != fc.metadata.finalizers {
        let finalizers = fc.finalizers().to_vec();
        if let Err(e) = ctx.fleet.set_finalizers(namespace, name, finalizers).await {
            if !is_not_found(&e) {
                error!(error = %e, "failed to patch FleetConfig finalizers");
            }
        }
    }

    let status = fc.status.clone().unwrap_or_default();
    let unchanged = original
        .status
        .as_ref()
        .map(|s| s.equal(&status) && s.joined_spokes == status.joined_spokes)
        .unwrap_or(false);
    if !unchanged {
        if let Err(e) = ctx.fleet.patch_status(namespace, name, &status).await {
            if !is_not_found(&e) {
                error!(error = %e, "failed to patch FleetConfig status");
            }
        }
    }
}

/// Error policy for the controller
///
/// Called when reconciliation fails; requeues with a short delay and relies
/// on repeated failures backing off at the framework level.
pub fn error_policy(fc: Arc<FleetConfig>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, fleetconfig = %fc.name_any(), "reconciliation failed");
    Action::requeue(Duration::from_secs(5))
}

/// Clean up a FleetConfig and its associated resources, then release the
/// finalizer.
async fn cleanup(ctx: &Context, fc: &mut FleetConfig) -> Result<()> {
    let hub_kubeconfig = resolve_kubeconfig(ctx.fleet.as_ref(), &fc.spec.hub.kubeconfig).await?;

    let gates = fc
        .spec
        .hub
        .cluster_manager
        .as_ref()
        .map(|cm| extract_feature_gates(&cm.feature_gates))
        .unwrap_or_default();

    let hub_api = ctx.ocm.connect(&hub_kubeconfig).await?;
    let do_cleanup = cleanup_preflight(hub_api.as_ref(), &gates).await?;
    if do_cleanup {
        spoke::cleanup_spokes(ctx, fc).await?;
        hub::clean_hub(ctx, fc, hub_api.as_ref()).await?;
        for csr in ctx.fleet.list_cluster_csrs().await? {
            ctx.fleet.delete_csr(&csr.name_any()).await?;
        }
    }

    if let Some(finalizers) = fc.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != FLEETCONFIG_FINALIZER);
    }
    Ok(())
}

/// Preflight checks before attempting FleetConfig cleanup.
///
/// Returns false when there is nothing to clean (the ManagedCluster kind is
/// not served). Refuses with an error when any ManagedCluster holds live
/// ManifestWorks and the ResourceCleanup feature gate is not enabled.
async fn cleanup_preflight(
    hub_api: &dyn OcmApi,
    enabled_feature_gates: &HashMap<String, bool>,
) -> Result<bool> {
    let Some(managed_clusters) = hub_api.list_managed_clusters().await? else {
        info!("ManagedCluster resource not found; nothing to do");
        return Ok(false);
    };

    let resource_cleanup_enabled = enabled_feature_gates
        .get(RESOURCE_CLEANUP_FEATURE_GATE)
        .copied()
        .unwrap_or(false);

    for managed_cluster in &managed_clusters {
        let name = managed_cluster.name_any();
        let manifest_works = hub_api.list_manifest_works(&name).await.map_err(|e| {
            Error::cleanup(format!(
                "failed to list manifestWorks for managedCluster {name}: {e}"
            ))
        })?;
        if !manifest_works.is_empty() && !resource_cleanup_enabled {
            let msg = format!(
                "Found manifestWorks for ManagedCluster {name}; cannot clean hub while any ManagedClusters have active ManifestWorks"
            );
            info!("{msg}");
            return Err(Error::cleanup(msg));
        }
    }

    Ok(true)
}
