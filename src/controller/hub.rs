//! Hub cluster lifecycle: init, degraded detection, upgrade, clean

use kube::api::DynamicObject;
use kube::ResourceExt;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::crd::{
    Condition, ConditionStatus, FleetConfig, RegistrationDriver, CONDITION_HUB_INITIALIZED,
};
use crate::kubeconfig;
use crate::ocm::{spec_string, OcmApi};
use crate::version::lowest_bundle_version;
use crate::{Error, Result};

use super::fleetconfig::{resolve_kubeconfig, resource_flags, Context, CLEANUP_INTERVAL};

/// ClusterManager spec fields that encode the active bundle version
const CLUSTER_MANAGER_IMAGE_FIELDS: [&str; 4] = [
    "addOnManagerImagePullSpec",
    "placementImagePullSpec",
    "registrationImagePullSpec",
    "workImagePullSpec",
];

/// Manage Hub cluster init and upgrade operations
pub(crate) async fn handle_hub(ctx: &Context, fc: &mut FleetConfig) -> Result<()> {
    info!(fleetconfig = %fc.name_any(), "handleHub");

    // check if the hub is already initialized
    let hub_kubeconfig = resolve_kubeconfig(ctx.fleet.as_ref(), &fc.spec.hub.kubeconfig).await?;
    let hub_api = ctx.ocm.connect(&hub_kubeconfig).await?;
    let cluster_manager = hub_api.get_cluster_manager().await?;

    // if a clustermanager already reports conditions, we don't need to init
    let mut initialized = false;
    if let Some(cm) = &cluster_manager {
        if cm.data.get("status").and_then(|s| s.get("conditions")).is_some() {
            initialized = true;
            let msgs = degraded_messages(cm);
            if !msgs.is_empty() {
                let msg = format!("hub pending/degraded: {}", msgs.join("; "));
                fc.set_conditions(
                    true,
                    [Condition::new(
                        msg.clone(),
                        CONDITION_HUB_INITIALIZED,
                        ConditionStatus::False,
                        ConditionStatus::True,
                    )],
                );
                return Err(Error::hub(msg));
            }
        }
    }
    if !initialized {
        initialize_hub(ctx, fc, &hub_kubeconfig).await?;
    }

    fc.set_conditions(
        true,
        [Condition::new(
            CONDITION_HUB_INITIALIZED,
            CONDITION_HUB_INITIALIZED,
            ConditionStatus::True,
            ConditionStatus::True,
        )],
    );

    // attempt an upgrade whenever the clustermanager's bundleVersion changes
    let upgrade = hub_needs_upgrade(fc, hub_api.as_ref())
        .await
        .map_err(|e| Error::hub(format!("failed to check if hub needs upgrade: {e}")))?;
    if upgrade {
        return upgrade_hub(ctx, fc).await;
    }

    Ok(())
}

/// Conditions indicating the clustermanager is still progressing or degraded
fn degraded_messages(cluster_manager: &DynamicObject) -> Vec<String> {
    let Some(conditions) = cluster_manager
        .data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(|c| c.as_array())
    else {
        return Vec::new();
    };

    let mut msgs = Vec::new();
    for c in conditions {
        let ctype = c.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let status = c.get("status").and_then(|s| s.as_str()).unwrap_or("");
        let message = c.get("message").and_then(|m| m.as_str()).unwrap_or("");
        let flagged = matches!(
            (ctype, status),
            ("Progressing", "True")
                | ("ClusterManagerApplied", "False")
                | ("HubRegistrationDegraded", "True")
                | ("HubPlacementDegraded", "True")
        );
        if flagged {
            msgs.push(format!("{ctype}: {message}"));
        }
    }
    msgs
}

/// Assemble the 'clusteradm init' argument vector from the spec. Returned
/// guards hold any materialized Helm values files alive for the invocation.
fn init_args(fc: &FleetConfig) -> Result<(Vec<String>, Vec<NamedTempFile>)> {
    let hub = &fc.spec.hub;
    let mut args = vec![
        "init".to_string(),
        format!("--create-namespace={}", hub.create_namespace),
        format!("--force={}", hub.force),
        "--wait=true".to_string(),
    ];
    let mut guards = Vec::new();

    if let Some(ra) = &fc.spec.registration_auth {
        if ra.driver == RegistrationDriver::Awsirsa {
            args.push(format!("--registration-drivers={}", ra.driver));
            if !ra.hub_cluster_arn.is_empty() {
                args.push(format!("--hub-cluster-arn={}", ra.hub_cluster_arn));
            }
            if !ra.auto_approved_arn_patterns.is_empty() {
                args.push(format!(
                    "--auto-approved-arn-patterns={}",
                    ra.auto_approved_arn_patterns.join(",")
                ));
            }
        }
    }

    // hub.clusterManager defaults to an empty object, so check the singleton
    // control plane first
    if let Some(singleton) = &hub.singleton_control_plane {
        args.push("--singleton=true".to_string());
        args.push("--singleton-name".to_string());
        args.push(singleton.name.clone());
        if !singleton.helm.values.is_empty() {
            let values = kubeconfig::write_temp(singleton.helm.values.as_bytes(), "values")?;
            args.push("--values".to_string());
            args.push(kubeconfig::path_string(values.path()));
            guards.push(values);
        }
        for s in &singleton.helm.set {
            args.push("--set".to_string());
            args.push(s.clone());
        }
        for s in &singleton.helm.set_json {
            args.push("--set-json".to_string());
            args.push(s.clone());
        }
        for s in &singleton.helm.set_literal {
            args.push("--set-literal".to_string());
            args.push(s.clone());
        }
        for s in &singleton.helm.set_string {
            args.push("--set-string".to_string());
            args.push(s.clone());
        }
    } else if let Some(cm) = &hub.cluster_manager {
        args.push("--feature-gates".to_string());
        args.push(cm.feature_gates.clone());
        args.push(format!("--use-bootstrap-token={}", cm.use_bootstrap_token));
        let source = cm.source.clone().unwrap_or_default();
        args.push("--bundle-version".to_string());
        args.push(source.bundle_version);
        args.push("--image-registry".to_string());
        args.push(source.registry);
        if let Some(resources) = &cm.resources {
            args.extend(resource_flags(resources));
        }
    } else {
        return Err(Error::validation(
            "unknown hub type, must specify either hub.clusterManager or hub.singletonControlPlane",
        ));
    }

    Ok((args, guards))
}

/// Initialize the Hub cluster via 'clusteradm init'
async fn initialize_hub(ctx: &Context, fc: &FleetConfig, hub_kubeconfig: &[u8]) -> Result<()> {
    info!(fleetconfig = %fc.name_any(), "initHub");

    let (mut args, _guards) = init_args(fc)?;
    let _kcfg = kubeconfig::kubeconfig_args(hub_kubeconfig, &fc.spec.hub.kubeconfig, &mut args)?;
    debug!(?args, "clusteradm init");

    let out = ctx
        .clusteradm
        .run(&args, "waiting for 'clusteradm init' to complete...")
        .await?;
    if !out.success {
        return Err(out.into_error("failed to init hub"));
    }
    debug!(output = %out.combined, "hub initialized");

    Ok(())
}

/// Check if the clustermanager on the Hub cluster has the desired bundle
/// version. "default" never upgrades, "latest" always does; otherwise the
/// lowest version referenced by the clustermanager's image pull specs is
/// compared against the desired bundle version.
async fn hub_needs_upgrade(fc: &FleetConfig, hub_api: &dyn OcmApi) -> Result<bool> {
    info!(fleetconfig = %fc.name_any(), "hubNeedsUpgrade");

    let Some(cm_spec) = &fc.spec.hub.cluster_manager else {
        return Ok(false);
    };
    let source = cm_spec.source.clone().unwrap_or_default();
    if source.bundle_version == "default" {
        info!("clustermanager bundleVersion is default, skipping upgrade");
        return Ok(false);
    }
    if source.bundle_version == "latest" {
        info!("clustermanager bundleVersion is latest, attempting upgrade");
        return Ok(true);
    }

    let cluster_manager = hub_api
        .get_cluster_manager()
        .await?
        .ok_or_else(|| Error::hub("cluster-manager not found on hub"))?;

    // identify the lowest bundleVersion referenced in the clustermanager spec
    let bundle_specs: Vec<String> = CLUSTER_MANAGER_IMAGE_FIELDS
        .iter()
        .filter_map(|field| spec_string(&cluster_manager, field))
        .collect();
    let active_bundle_version = lowest_bundle_version(&bundle_specs).map_err(|e| {
        Error::version(format!(
            "failed to detect bundleVersion from clustermanager spec: {e}"
        ))
    })?;

    info!(
        active_bundle_version = %active_bundle_version,
        desired_bundle_version = %source.bundle_version,
        "found clustermanager bundleVersions"
    );
    Ok(active_bundle_version == source.bundle_version)
}

/// Upgrade the Hub cluster's clustermanager to the specified version
async fn upgrade_hub(ctx: &Context, fc: &FleetConfig) -> Result<()> {
    info!(fleetconfig = %fc.name_any(), "upgradeHub");

    let source = fc
        .spec
        .hub
        .cluster_manager
        .as_ref()
        .and_then(|cm| cm.source.clone())
        .unwrap_or_default();
    let args = vec![
        "upgrade".to_string(),
        "clustermanager".to_string(),
        "--bundle-version".to_string(),
        source.bundle_version.clone(),
        "--image-registry".to_string(),
        source.registry,
        "--wait=true".to_string(),
    ];
    debug!(?args, "clusteradm upgrade clustermanager");

    let out = ctx
        .clusteradm
        .run(
            &args,
            "waiting for 'clusteradm upgrade clustermanager' to complete...",
        )
        .await?;
    if !out.success {
        return Err(out.into_error(&format!(
            "failed to upgrade hub clustermanager to {}",
            source.bundle_version
        )));
    }
    debug!(output = %out.combined, "clustermanager upgraded");

    Ok(())
}

/// Uninstall OCM components from the Hub cluster via 'clusteradm clean'.
/// All ManagedClusters and spoke namespaces are removed first and their
/// deletion confirmed before the hub itself is cleaned.
pub(crate) async fn clean_hub(
    ctx: &Context,
    fc: &FleetConfig,
    hub_api: &dyn OcmApi,
) -> Result<()> {
    info!(fleetconfig = %fc.name_any(), "cleanHub");

    clean_managed_clusters(hub_api).await?;
    clean_namespaces(ctx, fc).await?;

    let purge_operator = fc
        .spec
        .hub
        .cluster_manager
        .as_ref()
        .map(|cm| cm.purge_operator)
        .unwrap_or(true);
    // name is omitted, as the default name, 'cluster-manager', is always used
    let args = vec![
        "clean".to_string(),
        format!("--purge-operator={purge_operator}"),
    ];
    debug!(?args, "clusteradm clean");

    let out = ctx
        .clusteradm
        .run(&args, "waiting for 'clusteradm clean' to complete...")
        .await?;
    if !out.success {
        return Err(out.into_error("failed to clean hub cluster"));
    }
    debug!(output = %out.combined, "hub cleaned");

    Ok(())
}

/// Delete all ManagedClusters from the Hub and poll until they are gone
async fn clean_managed_clusters(hub_api: &dyn OcmApi) -> Result<()> {
    info!("cleanManagedClusters");

    hub_api
        .delete_all_managed_clusters()
        .await
        .map_err(|e| Error::cleanup(format!("failed to delete managedClusters: {e}")))?;

    info!("waiting for all ManagedClusters to be deleted");
    loop {
        match hub_api.list_managed_clusters().await? {
            None => break,
            Some(clusters) if clusters.is_empty() => break,
            Some(clusters) => {
                debug!(count = clusters.len(), "ManagedClusters still present");
            }
        }
        tokio::time::sleep(CLEANUP_INTERVAL).await;
    }

    info!("confirmed all ManagedClusters are deleted");
    Ok(())
}

/// Delete the namespace named after each declared spoke and poll until all
/// are gone
async fn clean_namespaces(ctx: &Context, fc: &FleetConfig) -> Result<()> {
    info!(fleetconfig = %fc.name_any(), "cleanNamespaces");

    let mut namespaces = Vec::with_capacity(fc.spec.spokes.len());
    for spoke in &fc.spec.spokes {
        ctx.fleet.delete_namespace(&spoke.name, true).await?;
        info!(spoke_namespace = %spoke.name, "deleted spoke namespace");
        namespaces.push(spoke.name.clone());
    }
    if namespaces.is_empty() {
        info!("no spoke namespaces to delete");
        return Ok(());
    }

    info!("waiting for all spoke namespaces to be deleted");
    loop {
        let mut pending = false;
        for namespace in &namespaces {
            if ctx.fleet.namespace_exists(namespace).await? {
                debug!(namespace = %namespace, "namespace still present");
                pending = true;
                break;
            }
        }
        if !pending {
            break;
        }
        tokio::time::sleep(CLEANUP_INTERVAL).await;
    }

    info!("confirmed all spoke namespaces are deleted");
    Ok(())
}
