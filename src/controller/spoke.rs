//! Spoke cluster lifecycle: join, accept, upgrade, unjoin, deregister
//!
//! Each reconciliation first deregisters spokes that have drifted out of the
//! spec (so a rename is a delete plus an add), then drives every declared
//! spoke toward joined, and finally rebuilds `status.joinedSpokes` from the
//! spokes whose join condition is True.

use std::sync::LazyLock;

use kube::ResourceExt;
use regex::Regex;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

use crate::crd::{
    Condition, ConditionStatus, FleetConfig, JoinedSpoke, KlusterletMode, Kubeconfig,
    RegistrationDriver, Spoke, LABEL_MANAGED_CLUSTER_TYPE, MANAGED_CLUSTER_TYPE_HUB_AS_SPOKE,
};
use crate::kubeconfig;
use crate::ocm::{
    condition_message, condition_status, find_condition, spec_string, OcmApi,
    MANAGED_CLUSTER_JOINED_CONDITION,
};
use crate::version::lowest_bundle_version;
use crate::{Error, Result};

use super::fleetconfig::{resolve_kubeconfig, resource_flags, Context};

/// Registration CSRs are named `<cluster>-<5 alphanum>`
static CSR_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-[a-zA-Z0-9]{5}$").expect("static pattern"));

/// Klusterlet spec fields that encode the active bundle version
const KLUSTERLET_IMAGE_FIELDS: [&str; 3] = [
    "imagePullSpec",
    "registrationImagePullSpec",
    "workImagePullSpec",
];

/// Whether a CSR belongs to a spoke: its name with the trailing
/// `-<5 alphanum>` suffix stripped must equal the spoke name
fn csr_matches_spoke(csr_name: &str, spoke_name: &str) -> bool {
    CSR_SUFFIX.replace(csr_name, "") == spoke_name
}

/// Manage Spoke cluster join and upgrade operations
pub(crate) async fn handle_spokes(ctx: &Context, fc: &mut FleetConfig) -> Result<()> {
    info!(fleetconfig = %fc.name_any(), "handleSpokes");

    let hub_kubeconfig = resolve_kubeconfig(ctx.fleet.as_ref(), &fc.spec.hub.kubeconfig).await?;
    let hub_api = ctx.ocm.connect(&hub_kubeconfig).await?;

    // clean up deregistered spokes
    let mut joined_spokes: Vec<JoinedSpoke> = Vec::new();
    let previously_joined = fc
        .status
        .as_ref()
        .map(|s| s.joined_spokes.clone())
        .unwrap_or_default();
    for js in previously_joined {
        let still_declared = fc
            .spec
            .spokes
            .iter()
            .any(|s| s.name == js.name && s.kubeconfig == js.kubeconfig);
        if still_declared {
            continue;
        }
        match deregister_spoke(ctx, hub_api.as_ref(), &js).await {
            Err(e) => {
                fc.set_conditions(
                    true,
                    [Condition::new(
                        e.to_string(),
                        js.unjoin_type(),
                        ConditionStatus::False,
                        ConditionStatus::True,
                    )],
                );
                joined_spokes.push(js);
            }
            Ok(()) => {
                fc.set_conditions(
                    true,
                    [Condition::new(
                        "unjoined",
                        js.unjoin_type(),
                        ConditionStatus::True,
                        ConditionStatus::True,
                    )],
                );
            }
        }
    }

    let spokes = fc.spec.spokes.clone();
    for spoke in &spokes {
        info!(name = %spoke.name, "handleSpokes: reconciling spoke cluster");

        // check if the spoke has already been joined to the hub
        let mut managed_cluster = match hub_api.get_managed_cluster(&spoke.name).await {
            Ok(mc) => mc,
            Err(e) => {
                error!(error = %e, spoke = %spoke.name, "failed to get managedCluster");
                continue;
            }
        };

        // attempt to join the spoke cluster if it hasn't already been joined
        if managed_cluster.is_none() {
            let token = get_token(ctx, fc)
                .await
                .map_err(|e| Error::spoke(format!("failed to get join token: {e}")))?;
            if let Err(e) = join_spoke(ctx, fc, spoke, &token).await {
                fc.set_conditions(
                    true,
                    [Condition::new(
                        e.to_string(),
                        spoke.join_type(),
                        ConditionStatus::False,
                        ConditionStatus::True,
                    )],
                );
                continue;
            }
            // run `clusteradm accept` even if auto acceptance is enabled, as
            // it's a no-op if the spoke is already accepted
            if let Err(e) = accept_cluster(ctx, &spoke.name).await {
                fc.set_conditions(
                    true,
                    [Condition::new(
                        e.to_string(),
                        spoke.join_type(),
                        ConditionStatus::False,
                        ConditionStatus::True,
                    )],
                );
                continue;
            }
            info!(name = %spoke.name, "handleSpokes: accepted spoke cluster");

            managed_cluster = match hub_api.get_managed_cluster(&spoke.name).await {
                Ok(mc) => mc,
                Err(e) => {
                    error!(error = %e, spoke = %spoke.name, "failed to get managedCluster after join");
                    continue;
                }
            };
        }

        // check the managed cluster's joined condition
        let joined = managed_cluster
            .as_ref()
            .and_then(|mc| find_condition(mc, MANAGED_CLUSTER_JOINED_CONDITION))
            .map(|c| {
                (
                    condition_status(c).unwrap_or("").to_string(),
                    condition_message(c).to_string(),
                )
            });
        let Some((status, message)) = joined else {
            info!(name = %spoke.name, "handleSpokes: waiting for spoke cluster to join");
            let msg = format!(
                "ManagedClusterJoined condition not found in ManagedCluster for spoke cluster {}",
                spoke.name
            );
            fc.set_conditions(
                true,
                [Condition::new(
                    msg,
                    spoke.join_type(),
                    ConditionStatus::False,
                    ConditionStatus::True,
                )],
            );
            continue;
        };

        info!(status = %status, message = %message, "handleSpokes: found join condition");
        if status != "True" {
            let msg = format!("failed to join spoke cluster {}: {}", spoke.name, message);
            fc.set_conditions(
                true,
                [Condition::new(
                    msg,
                    spoke.join_type(),
                    ConditionStatus::False,
                    ConditionStatus::True,
                )],
            );
            info!(status = %status, message = %message, "handleSpokes: join failed");
            continue;
        }

        // spoke cluster has joined successfully
        fc.set_conditions(
            true,
            [Condition::new(
                "Joined",
                spoke.join_type(),
                ConditionStatus::True,
                ConditionStatus::True,
            )],
        );

        // Label the ManagedCluster corresponding to the hub if in hub-as-spoke
        // mode, so consumers can tell it apart from ordinary spokes.
        if spoke.kubeconfig.in_cluster {
            hub_api
                .label_managed_cluster(
                    &spoke.name,
                    LABEL_MANAGED_CLUSTER_TYPE,
                    MANAGED_CLUSTER_TYPE_HUB_AS_SPOKE,
                )
                .await?;
            info!(name = %spoke.name, "handleSpokes: labeled ManagedCluster as hub-as-spoke");
        }

        // attempt an upgrade whenever the klusterlet's bundleVersion changes
        let upgrade = spoke_needs_upgrade(ctx, spoke)
            .await
            .map_err(|e| Error::spoke(format!("failed to check if spoke cluster needs upgrade: {e}")))?;
        if upgrade {
            upgrade_spoke(ctx, spoke).await.map_err(|e| {
                Error::spoke(format!("failed to upgrade spoke cluster {}: {e}", spoke.name))
            })?;
        }
    }

    // Only spokes which are joined are eligible to be unjoined
    for spoke in &spokes {
        if !fc.condition_is_true(&spoke.join_type()) {
            continue;
        }
        joined_spokes.push(JoinedSpoke {
            name: spoke.name.clone(),
            kubeconfig: spoke.kubeconfig.clone(),
            purge_klusterlet_operator: spoke.klusterlet.purge_operator,
        });
    }
    fc.status.get_or_insert_with(Default::default).joined_spokes = joined_spokes;

    Ok(())
}

/// Accept a Spoke cluster's join request via 'clusteradm accept'
async fn accept_cluster(ctx: &Context, name: &str) -> Result<()> {
    info!("acceptCluster");

    let args = vec![
        "accept".to_string(),
        "--cluster".to_string(),
        name.to_string(),
    ];
    debug!(?args, "clusteradm accept");

    let out = ctx
        .clusteradm
        .run(
            &args,
            &format!("waiting for 'clusteradm accept' to complete for spoke {name}..."),
        )
        .await?;
    if !out.success {
        return Err(out.into_error("failed to accept spoke cluster join request"));
    }
    debug!(output = %out.combined, "spoke cluster join request accepted");

    Ok(())
}

/// Join token response from 'clusteradm get token --output=json'
#[derive(Debug, Deserialize)]
struct TokenMeta {
    #[serde(rename = "hub-token")]
    token: String,
    #[serde(rename = "hub-apiserver", default)]
    hub_api_server: String,
}

/// Get a join token from the Hub cluster via 'clusteradm get token'
async fn get_token(ctx: &Context, fc: &FleetConfig) -> Result<TokenMeta> {
    info!("getToken");

    let mut args = vec![
        "get".to_string(),
        "token".to_string(),
        "--output=json".to_string(),
    ];
    if let Some(cm) = &fc.spec.hub.cluster_manager {
        args.push(format!("--use-bootstrap-token={}", cm.use_bootstrap_token));
    }

    let hub_kubeconfig = resolve_kubeconfig(ctx.fleet.as_ref(), &fc.spec.hub.kubeconfig)
        .await
        .map_err(|e| Error::kubeconfig(format!("failed to prepare kubeconfig: {e}")))?;
    let _kcfg = kubeconfig::kubeconfig_args(&hub_kubeconfig, &fc.spec.hub.kubeconfig, &mut args)?;
    debug!(?args, "clusteradm get token");

    let out = ctx
        .clusteradm
        .run(&args, "waiting for 'clusteradm get token' to complete...")
        .await?;
    if !out.success {
        return Err(out.into_error("failed to get join token"));
    }
    debug!("got join token");

    serde_json::from_str(&out.combined)
        .map_err(|e| Error::serialization(format!("failed to unmarshal join token: {e}")))
}

/// Assemble the 'clusteradm join' argument vector. Returned guards hold any
/// materialized files (managed cluster kubeconfig, CA, proxy CA) alive for
/// the invocation.
fn join_args(
    fc: &FleetConfig,
    spoke: &Spoke,
    token: &TokenMeta,
    managed_cluster_kubeconfig: Option<&[u8]>,
) -> Result<(Vec<String>, Vec<NamedTempFile>)> {
    let klusterlet = &spoke.klusterlet;
    let source = klusterlet.source.clone().unwrap_or_default();
    let mut guards = Vec::new();

    let mut args = vec![
        "join".to_string(),
        "--cluster-name".to_string(),
        spoke.name.clone(),
        format!("--create-namespace={}", spoke.create_namespace),
        format!("--enable-sync-labels={}", spoke.sync_labels),
        "--hub-token".to_string(),
        token.token.clone(),
        "--wait=true".to_string(),
        // klusterlet args
        "--mode".to_string(),
        klusterlet.mode.to_string(),
        "--feature-gates".to_string(),
        klusterlet.feature_gates.clone(),
        format!(
            "--force-internal-endpoint-lookup={}",
            klusterlet.force_internal_endpoint_lookup
        ),
        format!("--singleton={}", klusterlet.singleton),
        // source args
        "--bundle-version".to_string(),
        source.bundle_version,
        "--image-registry".to_string(),
        source.registry,
    ];

    // the hub API server from the spec wins over the token response
    if let Some(api_server) = &fc.spec.hub.api_server {
        args.push("--hub-apiserver".to_string());
        args.push(api_server.clone());
    } else if !token.hub_api_server.is_empty() {
        args.push("--hub-apiserver".to_string());
        args.push(token.hub_api_server.clone());
    }

    if let Some(ra) = &fc.spec.registration_auth {
        if ra.driver == RegistrationDriver::Awsirsa {
            args.push(format!("--registration-auth={}", ra.driver));
            if !ra.hub_cluster_arn.is_empty() {
                args.push(format!("--hub-cluster-arn={}", ra.hub_cluster_arn));
            }
            if !spoke.cluster_arn.is_empty() {
                args.push(format!("--managed-cluster-arn={}", spoke.cluster_arn));
            }
        }
    }

    if let Some(resources) = &klusterlet.resources {
        args.extend(resource_flags(resources));
    }

    if klusterlet.mode == KlusterletMode::Hosted {
        args.push(format!(
            "--force-internal-endpoint-lookup-managed={}",
            klusterlet.force_internal_endpoint_lookup_managed
        ));
        let raw = managed_cluster_kubeconfig.ok_or_else(|| {
            Error::validation("managedClusterKubeconfig is required in hosted mode")
        })?;
        let file = kubeconfig::write_temp(raw, "kubeconfig")
            .map_err(|e| Error::kubeconfig(format!("failed to write managedClusterKubeconfig to disk: {e}")))?;
        args.push("--managed-cluster-kubeconfig".to_string());
        args.push(kubeconfig::path_string(file.path()));
        guards.push(file);
    }

    if !spoke.ca.is_empty() {
        let ca_file = kubeconfig::write_temp(spoke.ca.as_bytes(), "ca")
            .map_err(|e| Error::kubeconfig(format!("failed to write CA to disk: {e}")))?;
        args.insert(0, format!("--ca-file={}", kubeconfig::path_string(ca_file.path())));
        guards.push(ca_file);
    }
    if !spoke.proxy_ca.is_empty() {
        let proxy_ca_file = kubeconfig::write_temp(spoke.proxy_ca.as_bytes(), "proxy-ca")
            .map_err(|e| Error::kubeconfig(format!("failed to write proxy CA to disk: {e}")))?;
        args.push(format!(
            "--proxy-ca-file={}",
            kubeconfig::path_string(proxy_ca_file.path())
        ));
        guards.push(proxy_ca_file);
    }
    if !spoke.proxy_url.is_empty() {
        args.push(format!("--proxy-url={}", spoke.proxy_url));
    }

    Ok((args, guards))
}

/// Join a Spoke cluster to the Hub cluster via 'clusteradm join'
async fn join_spoke(ctx: &Context, fc: &FleetConfig, spoke: &Spoke, token: &TokenMeta) -> Result<()> {
    info!(spoke = %spoke.name, "joinSpoke");

    let managed_kubeconfig = if spoke.klusterlet.mode == KlusterletMode::Hosted {
        let kc = spoke.klusterlet.managed_cluster_kubeconfig.as_ref().ok_or_else(|| {
            Error::validation("managedClusterKubeconfig is required in hosted mode")
        })?;
        Some(resolve_kubeconfig(ctx.fleet.as_ref(), kc).await?)
    } else {
        None
    };

    let (mut args, _guards) = join_args(fc, spoke, token, managed_kubeconfig.as_deref())?;

    let spoke_kubeconfig = resolve_kubeconfig(ctx.fleet.as_ref(), &spoke.kubeconfig).await?;
    let _kcfg = kubeconfig::kubeconfig_args(&spoke_kubeconfig, &spoke.kubeconfig, &mut args)?;
    debug!(?args, "clusteradm join");

    let out = ctx
        .clusteradm
        .run(
            &args,
            &format!("waiting for 'clusteradm join' to complete for spoke {}...", spoke.name),
        )
        .await?;
    if !out.success {
        return Err(out.into_error(&format!(
            "clusteradm join command failed for spoke {}",
            spoke.name
        )));
    }
    debug!(output = %out.combined, "successfully requested spoke cluster join");

    Ok(())
}

/// Check if the klusterlet on a Spoke cluster has the desired bundle version
async fn spoke_needs_upgrade(ctx: &Context, spoke: &Spoke) -> Result<bool> {
    info!(spoke_cluster_name = %spoke.name, "spokeNeedsUpgrade");

    let source = spoke.klusterlet.source.clone().unwrap_or_default();
    if source.bundle_version == "default" {
        info!("klusterlet bundleVersion is default, skipping upgrade");
        return Ok(false);
    }
    if source.bundle_version == "latest" {
        info!("klusterlet bundleVersion is latest, attempting upgrade");
        return Ok(true);
    }

    let spoke_kubeconfig = resolve_kubeconfig(ctx.fleet.as_ref(), &spoke.kubeconfig).await?;
    let spoke_api = ctx.ocm.connect(&spoke_kubeconfig).await?;
    let klusterlet = spoke_api
        .get_klusterlet()
        .await?
        .ok_or_else(|| Error::spoke("failed to get klusterlet: klusterlet not found"))?;

    // identify the lowest bundleVersion referenced in the klusterlet spec
    let bundle_specs: Vec<String> = KLUSTERLET_IMAGE_FIELDS
        .iter()
        .filter_map(|field| spec_string(&klusterlet, field))
        .collect();
    let active_bundle_version = lowest_bundle_version(&bundle_specs).map_err(|e| {
        Error::version(format!(
            "failed to detect bundleVersion from klusterlet spec: {e}"
        ))
    })?;

    info!(
        active_bundle_version = %active_bundle_version,
        desired_bundle_version = %source.bundle_version,
        "found klusterlet bundleVersions"
    );
    Ok(active_bundle_version == source.bundle_version)
}

/// Upgrade the Spoke cluster's klusterlet to the specified version
async fn upgrade_spoke(ctx: &Context, spoke: &Spoke) -> Result<()> {
    info!(spoke = %spoke.name, "upgradeSpoke");

    let source = spoke.klusterlet.source.clone().unwrap_or_default();
    let mut args = vec![
        "upgrade".to_string(),
        "klusterlet".to_string(),
        "--bundle-version".to_string(),
        source.bundle_version.clone(),
        "--image-registry".to_string(),
        source.registry,
        "--wait=true".to_string(),
    ];

    let spoke_kubeconfig = resolve_kubeconfig(ctx.fleet.as_ref(), &spoke.kubeconfig).await?;
    let _kcfg = kubeconfig::kubeconfig_args(&spoke_kubeconfig, &spoke.kubeconfig, &mut args)?;
    debug!(?args, "clusteradm upgrade klusterlet");

    let out = ctx
        .clusteradm
        .run(
            &args,
            &format!(
                "waiting for 'clusteradm upgrade klusterlet' to complete for spoke {}...",
                spoke.name
            ),
        )
        .await?;
    if !out.success {
        return Err(out.into_error(&format!(
            "failed to upgrade klusterlet on spoke cluster {} to {}",
            spoke.name, source.bundle_version
        )));
    }
    debug!(output = %out.combined, "klusterlet upgraded");

    Ok(())
}

/// Unjoin every joined spoke during FleetConfig deletion. Hub-side state is
/// removed wholesale by the subsequent hub clean, so no per-spoke
/// deregistration happens here.
pub(crate) async fn cleanup_spokes(ctx: &Context, fc: &FleetConfig) -> Result<()> {
    info!(fleetconfig = %fc.name_any(), "cleanupSpokes");

    for spoke in &fc.spec.spokes {
        let joined = fc
            .get_condition(&spoke.join_type())
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false);
        if !joined {
            info!(spoke = %spoke.name, "skipping cleanup for unjoined spoke cluster");
            continue;
        }

        unjoin_spoke(
            ctx,
            &spoke.kubeconfig,
            &spoke.name,
            spoke.klusterlet.purge_operator,
        )
        .await?;
    }

    Ok(())
}

/// Unjoin a single spoke cluster from the Hub via 'clusteradm unjoin'
async fn unjoin_spoke(
    ctx: &Context,
    kubeconfig_spec: &Kubeconfig,
    spoke_name: &str,
    purge_operator: bool,
) -> Result<()> {
    let mut args = vec![
        "unjoin".to_string(),
        "--cluster-name".to_string(),
        spoke_name.to_string(),
        format!("--purge-operator={purge_operator}"),
    ];

    let spoke_kubeconfig = resolve_kubeconfig(ctx.fleet.as_ref(), kubeconfig_spec)
        .await
        .map_err(|e| Error::spoke(format!("failed to unjoin spoke cluster {spoke_name}: {e}")))?;
    let _kcfg = kubeconfig::kubeconfig_args(&spoke_kubeconfig, kubeconfig_spec, &mut args)?;
    debug!(?args, "clusteradm unjoin");

    let out = ctx
        .clusteradm
        .run(
            &args,
            &format!("waiting for 'clusteradm unjoin' to complete for spoke {spoke_name}..."),
        )
        .await?;
    if !out.success {
        return Err(out.into_error(&format!("failed to unjoin spoke cluster {spoke_name}")));
    }
    debug!(output = %out.combined, "spoke cluster unjoined");

    Ok(())
}

/// Fully deregister a spoke cluster, cleaning up all relevant resources on
/// the hub. Refuses while the spoke still holds live ManifestWorks.
async fn deregister_spoke(ctx: &Context, hub_api: &dyn OcmApi, spoke: &JoinedSpoke) -> Result<()> {
    // skip clean up entirely when the ManagedCluster is already gone
    let Some(managed_cluster) = hub_api.get_managed_cluster(&spoke.name).await? else {
        info!("ManagedCluster resource not found; nothing to do");
        return Ok(());
    };
    let name = managed_cluster.name_any();

    let manifest_works = hub_api.list_manifest_works(&name).await.map_err(|e| {
        Error::spoke(format!(
            "failed to list manifestWorks for managedCluster {name}: {e}"
        ))
    })?;
    if !manifest_works.is_empty() {
        let msg = format!(
            "Found manifestWorks for ManagedCluster {name}; cannot unjoin spoke cluster while it has active ManifestWorks"
        );
        info!("{msg}");
        return Err(Error::spoke(msg));
    }

    // unjoin spoke
    unjoin_spoke(
        ctx,
        &spoke.kubeconfig,
        &spoke.name,
        spoke.purge_klusterlet_operator,
    )
    .await?;

    // remove CSRs raised during registration
    for csr in ctx.fleet.list_cluster_csrs().await? {
        let csr_name = csr.name_any();
        if csr_matches_spoke(&csr_name, &spoke.name) {
            ctx.fleet.delete_csr(&csr_name).await?;
        }
    }

    // remove ManagedCluster
    hub_api.delete_managed_cluster(&spoke.name).await?;

    // remove Namespace
    ctx.fleet.delete_namespace(&spoke.name, false).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fleetconfig::MockFleetApi;
    use crate::crd::{
        FleetConfigSpec, FleetConfigStatus, Hub, Klusterlet, OCMSource, RegistrationAuth,
        SecretReference,
    };
    use crate::exec::{CmdOutput, MockClusteradm};
    use crate::ocm::{dynamic_fixture, MockOcmApi, MockOcmConnector};
    use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::{Arc, Mutex};

    fn in_cluster_kubeconfig() -> Kubeconfig {
        Kubeconfig {
            secret_reference: None,
            in_cluster: true,
            context: String::new(),
        }
    }

    fn spoke(name: &str) -> Spoke {
        Spoke {
            name: name.to_string(),
            create_namespace: true,
            sync_labels: false,
            kubeconfig: in_cluster_kubeconfig(),
            ca: String::new(),
            proxy_ca: String::new(),
            proxy_url: String::new(),
            klusterlet: Klusterlet::default(),
            cluster_arn: String::new(),
        }
    }

    fn sample_fleetconfig(spokes: Vec<Spoke>) -> FleetConfig {
        FleetConfig {
            metadata: ObjectMeta {
                name: Some("fleet".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: FleetConfigSpec {
                hub: Hub {
                    cluster_manager: Some(Default::default()),
                    create_namespace: true,
                    force: false,
                    kubeconfig: in_cluster_kubeconfig(),
                    singleton_control_plane: None,
                    api_server: None,
                },
                spokes,
                registration_auth: None,
            },
            status: None,
        }
    }

    fn token() -> TokenMeta {
        TokenMeta {
            token: "hub-join-token".to_string(),
            hub_api_server: "https://hub.example:6443".to_string(),
        }
    }

    fn ok_output() -> CmdOutput {
        CmdOutput {
            success: true,
            status: "exit status: 0".to_string(),
            combined: String::new(),
        }
    }

    fn token_output() -> CmdOutput {
        CmdOutput {
            success: true,
            status: "exit status: 0".to_string(),
            combined:
                r#"{"hub-token":"hub-join-token","hub-apiserver":"https://hub.example:6443"}"#
                    .to_string(),
        }
    }

    fn joined_managed_cluster(name: &str) -> kube::api::DynamicObject {
        dynamic_fixture(
            name,
            serde_json::json!({
                "status": {
                    "conditions": [
                        { "type": "ManagedClusterJoined", "status": "True", "message": "joined" }
                    ]
                }
            }),
        )
    }

    fn default_fleet_api() -> MockFleetApi {
        let mut fleet = MockFleetApi::new();
        fleet
            .expect_in_cluster_kubeconfig()
            .returning(|| Ok(b"kubeconfig".to_vec()));
        fleet
    }

    fn ctx_with(
        fleet: MockFleetApi,
        api: Arc<dyn OcmApi>,
        adm: MockClusteradm,
    ) -> Context {
        let mut connector = MockOcmConnector::new();
        connector
            .expect_connect()
            .returning(move |_| Ok(api.clone()));
        Context::with_clients(Arc::new(fleet), Arc::new(connector), Arc::new(adm))
    }

    // =========================================================================
    // CSR Name Matching
    // =========================================================================

    #[test]
    fn csr_suffix_is_stripped_before_matching() {
        assert!(csr_matches_spoke("spoke-a-x7b2q", "spoke-a"));
        assert!(csr_matches_spoke("spoke-a", "spoke-a"));
        assert!(!csr_matches_spoke("spoke-ab-x7b2q", "spoke-a"));
        // suffix must be exactly five alphanumerics
        assert!(!csr_matches_spoke("spoke-a-x7b2", "spoke-a"));
        assert!(csr_matches_spoke("spoke-a-x7b2qq", "spoke-a-x"));
    }

    // =========================================================================
    // Join Argument Assembly
    // =========================================================================

    /// The default spoke renders the base flag surface in order, with the
    /// hub API server taken from the token response
    #[test]
    fn join_args_for_default_spoke() {
        let fc = sample_fleetconfig(vec![]);
        let s = spoke("edge-1");
        let (args, guards) = join_args(&fc, &s, &token(), None).unwrap();

        assert_eq!(
            args,
            vec![
                "join",
                "--cluster-name",
                "edge-1",
                "--create-namespace=true",
                "--enable-sync-labels=false",
                "--hub-token",
                "hub-join-token",
                "--wait=true",
                "--mode",
                "Default",
                "--feature-gates",
                "AddonManagement=true,ClusterClaim=true",
                "--force-internal-endpoint-lookup=false",
                "--singleton=false",
                "--bundle-version",
                "default",
                "--image-registry",
                "quay.io/open-cluster-management",
                "--hub-apiserver",
                "https://hub.example:6443",
            ]
        );
        assert!(guards.is_empty());
    }

    /// The hub API server override from the spec wins over the token response
    #[test]
    fn join_args_prefers_spec_api_server_override() {
        let mut fc = sample_fleetconfig(vec![]);
        fc.spec.hub.api_server = Some("https://override.internal:6443".to_string());
        let s = spoke("edge-1");

        let (args, _) = join_args(&fc, &s, &token(), None).unwrap();
        let at = args.iter().position(|a| a == "--hub-apiserver").unwrap();
        assert_eq!(args[at + 1], "https://override.internal:6443");
    }

    /// awsirsa registration adds the driver trio
    #[test]
    fn join_args_with_awsirsa_registration() {
        let mut fc = sample_fleetconfig(vec![]);
        fc.spec.registration_auth = Some(RegistrationAuth {
            driver: RegistrationDriver::Awsirsa,
            hub_cluster_arn: "arn:aws:eks:us-west-2:123:cluster/hub".to_string(),
            auto_approved_arn_patterns: vec![],
        });
        let mut s = spoke("edge-1");
        s.cluster_arn = "arn:aws:eks:us-west-2:123:cluster/edge-1".to_string();

        let (args, _) = join_args(&fc, &s, &token(), None).unwrap();
        assert!(args.contains(&"--registration-auth=awsirsa".to_string()));
        assert!(args.contains(&"--hub-cluster-arn=arn:aws:eks:us-west-2:123:cluster/hub".to_string()));
        assert!(args.contains(
            &"--managed-cluster-arn=arn:aws:eks:us-west-2:123:cluster/edge-1".to_string()
        ));
    }

    /// Hosted mode materializes the managed cluster kubeconfig to a temp file
    #[test]
    fn join_args_for_hosted_mode() {
        let fc = sample_fleetconfig(vec![]);
        let mut s = spoke("edge-1");
        s.klusterlet.mode = KlusterletMode::Hosted;
        s.klusterlet.force_internal_endpoint_lookup_managed = true;
        s.klusterlet.managed_cluster_kubeconfig = Some(in_cluster_kubeconfig());

        let (args, guards) = join_args(&fc, &s, &token(), Some(b"managed-raw")).unwrap();

        assert!(args.contains(&"--force-internal-endpoint-lookup-managed=true".to_string()));
        let at = args
            .iter()
            .position(|a| a == "--managed-cluster-kubeconfig")
            .unwrap();
        let path = std::path::PathBuf::from(&args[at + 1]);
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"managed-raw");
        drop(guards);
        assert!(!path.exists());
    }

    /// Hosted mode without the managed kubeconfig bytes is an error
    #[test]
    fn join_args_hosted_mode_requires_managed_kubeconfig() {
        let fc = sample_fleetconfig(vec![]);
        let mut s = spoke("edge-1");
        s.klusterlet.mode = KlusterletMode::Hosted;

        let err = join_args(&fc, &s, &token(), None).unwrap_err();
        assert!(err.to_string().contains("managedClusterKubeconfig is required"));
    }

    /// The CA file flag is prepended ahead of the join verb; proxy flags are
    /// appended
    #[test]
    fn join_args_with_ca_and_proxy_material() {
        let fc = sample_fleetconfig(vec![]);
        let mut s = spoke("edge-1");
        s.ca = "CA PEM".to_string();
        s.proxy_ca = "PROXY CA PEM".to_string();
        s.proxy_url = "https://proxy.example:3128".to_string();

        let (args, guards) = join_args(&fc, &s, &token(), None).unwrap();

        assert!(args[0].starts_with("--ca-file="));
        assert_eq!(args[1], "join");
        assert!(args.iter().any(|a| a.starts_with("--proxy-ca-file=")));
        assert!(args.contains(&"--proxy-url=https://proxy.example:3128".to_string()));

        // both materialized files live until the guards drop
        assert_eq!(guards.len(), 2);
        let ca_path = std::path::PathBuf::from(args[0].trim_start_matches("--ca-file="));
        assert_eq!(std::fs::read(&ca_path).unwrap(), b"CA PEM");
        drop(guards);
        assert!(!ca_path.exists());
    }

    // =========================================================================
    // Join Flow Stories
    // =========================================================================

    /// Story: an unjoined spoke is joined, accepted, and recorded. The token
    /// is fetched fresh, join and accept both run, and the re-read
    /// ManagedCluster's joined condition drives the status condition.
    #[tokio::test]
    async fn story_unjoined_spoke_is_joined_and_accepted() {
        let mut api = MockOcmApi::new();
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();
        api.expect_get_managed_cluster().returning(move |name| {
            let mut c = calls_clone.lock().unwrap();
            *c += 1;
            if *c == 1 {
                Ok(None) // not yet joined
            } else {
                Ok(Some(joined_managed_cluster(name)))
            }
        });
        // hub-as-spoke labeling applies because the spoke is in-cluster
        api.expect_label_managed_cluster()
            .withf(|name, key, value| {
                name == "edge-1"
                    && key == LABEL_MANAGED_CLUSTER_TYPE
                    && value == MANAGED_CLUSTER_TYPE_HUB_AS_SPOKE
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut adm = MockClusteradm::new();
        adm.expect_run()
            .withf(|args, _| args[..2] == ["get".to_string(), "token".to_string()])
            .times(1)
            .returning(|_, _| Ok(token_output()));
        adm.expect_run()
            .withf(|args, _| {
                args.first().map(String::as_str) == Some("join")
                    && args.contains(&"hub-join-token".to_string())
                    && args.contains(&"--hub-apiserver".to_string())
            })
            .times(1)
            .returning(|_, _| Ok(ok_output()));
        adm.expect_run()
            .withf(|args, _| {
                args[..] == ["accept".to_string(), "--cluster".to_string(), "edge-1".to_string()]
            })
            .times(1)
            .returning(|_, _| Ok(ok_output()));

        let ctx = ctx_with(default_fleet_api(), Arc::new(api), adm);
        let mut fc = sample_fleetconfig(vec![spoke("edge-1")]);

        handle_spokes(&ctx, &mut fc).await.unwrap();

        assert!(fc.condition_is_true("spoke-cluster-edge-1-joined"));
        let joined = &fc.status.as_ref().unwrap().joined_spokes;
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].name, "edge-1");
        assert!(joined[0].purge_klusterlet_operator);
    }

    /// Story: a join failure records the failing condition and moves on to
    /// the next spoke instead of aborting the pass
    #[tokio::test]
    async fn story_join_failure_continues_to_next_spoke() {
        let mut api = MockOcmApi::new();
        api.expect_get_managed_cluster().returning(|name| {
            if name == "edge-1" {
                Ok(None)
            } else {
                Ok(Some(joined_managed_cluster(name)))
            }
        });
        api.expect_label_managed_cluster().returning(|_, _, _| Ok(()));

        let mut adm = MockClusteradm::new();
        adm.expect_run()
            .withf(|args, _| args[..2] == ["get".to_string(), "token".to_string()])
            .returning(|_, _| Ok(token_output()));
        adm.expect_run()
            .withf(|args, _| args.first().map(String::as_str) == Some("join"))
            .returning(|_, _| {
                Ok(CmdOutput {
                    success: false,
                    status: "exit status: 1".to_string(),
                    combined: "unable to reach hub".to_string(),
                })
            });

        let ctx = ctx_with(default_fleet_api(), Arc::new(api), adm);
        let mut fc = sample_fleetconfig(vec![spoke("edge-1"), spoke("edge-2")]);

        handle_spokes(&ctx, &mut fc).await.unwrap();

        let failed = fc.get_condition("spoke-cluster-edge-1-joined").unwrap();
        assert_eq!(failed.status, ConditionStatus::False);
        assert!(failed.message.contains("unable to reach hub"));

        assert!(fc.condition_is_true("spoke-cluster-edge-2-joined"));
        // only the joined spoke lands in joinedSpokes
        let joined = &fc.status.as_ref().unwrap().joined_spokes;
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].name, "edge-2");
    }

    /// Story: a joined-condition-less ManagedCluster records a waiting
    /// condition with the documented message
    #[tokio::test]
    async fn story_missing_joined_condition_records_waiting() {
        let mut api = MockOcmApi::new();
        api.expect_get_managed_cluster().returning(|name| {
            Ok(Some(dynamic_fixture(name, serde_json::json!({ "status": { "conditions": [] } }))))
        });

        let mut adm = MockClusteradm::new();
        adm.expect_run().never();

        let ctx = ctx_with(default_fleet_api(), Arc::new(api), adm);
        let mut fc = sample_fleetconfig(vec![spoke("edge-1")]);

        handle_spokes(&ctx, &mut fc).await.unwrap();

        let cond = fc.get_condition("spoke-cluster-edge-1-joined").unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(
            cond.message,
            "ManagedClusterJoined condition not found in ManagedCluster for spoke cluster edge-1"
        );
    }

    /// Story: a False joined condition surfaces the remote message
    #[tokio::test]
    async fn story_false_joined_condition_surfaces_remote_message() {
        let mut api = MockOcmApi::new();
        api.expect_get_managed_cluster().returning(|name| {
            Ok(Some(dynamic_fixture(
                name,
                serde_json::json!({
                    "status": {
                        "conditions": [
                            { "type": "ManagedClusterJoined", "status": "False", "message": "lease not observed" }
                        ]
                    }
                }),
            )))
        });

        let ctx = ctx_with(default_fleet_api(), Arc::new(api), MockClusteradm::new());
        let mut fc = sample_fleetconfig(vec![spoke("edge-1")]);

        handle_spokes(&ctx, &mut fc).await.unwrap();

        let cond = fc.get_condition("spoke-cluster-edge-1-joined").unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(
            cond.message,
            "failed to join spoke cluster edge-1: lease not observed"
        );
    }

    // =========================================================================
    // Drift Cleanup Stories
    // =========================================================================

    /// Story: a spoke removed from the spec is deregistered: unjoin, CSR
    /// removal, ManagedCluster and namespace deletion, in that order
    #[tokio::test]
    async fn story_removed_spoke_is_deregistered() {
        let mut api = MockOcmApi::new();
        api.expect_get_managed_cluster()
            .returning(|name| Ok(Some(dynamic_fixture(name, serde_json::json!({})))));
        api.expect_list_manifest_works().returning(|_| Ok(vec![]));
        api.expect_delete_managed_cluster()
            .withf(|name| name == "spoke-a")
            .times(1)
            .returning(|_| Ok(()));

        let mut fleet = default_fleet_api();
        fleet.expect_list_cluster_csrs().returning(|| {
            let csr = |name: &str| CertificateSigningRequest {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
            Ok(vec![csr("spoke-a-x7b2q"), csr("other-spoke-zzzzz")])
        });
        fleet
            .expect_delete_csr()
            .withf(|name| name == "spoke-a-x7b2q")
            .times(1)
            .returning(|_| Ok(()));
        fleet
            .expect_delete_namespace()
            .withf(|name, foreground| name == "spoke-a" && !*foreground)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut adm = MockClusteradm::new();
        adm.expect_run()
            .withf(|args, _| {
                args[..3]
                    == [
                        "unjoin".to_string(),
                        "--cluster-name".to_string(),
                        "spoke-a".to_string(),
                    ]
                    && args.contains(&"--purge-operator=true".to_string())
            })
            .times(1)
            .returning(|_, _| Ok(ok_output()));

        let ctx = ctx_with(fleet, Arc::new(api), adm);
        let mut fc = sample_fleetconfig(vec![]);
        fc.status = Some(FleetConfigStatus {
            joined_spokes: vec![JoinedSpoke {
                name: "spoke-a".to_string(),
                kubeconfig: in_cluster_kubeconfig(),
                purge_klusterlet_operator: true,
            }],
            ..Default::default()
        });

        handle_spokes(&ctx, &mut fc).await.unwrap();

        assert!(fc.condition_is_true("spoke-cluster-spoke-a-unjoined"));
        assert!(fc.status.as_ref().unwrap().joined_spokes.is_empty());
    }

    /// Story: drift deregistration refuses while ManifestWorks exist,
    /// regardless of any feature gate, and keeps the joined-spoke entry
    #[tokio::test]
    async fn story_drift_deregistration_blocked_by_manifestworks() {
        let mut api = MockOcmApi::new();
        api.expect_get_managed_cluster()
            .returning(|name| Ok(Some(dynamic_fixture(name, serde_json::json!({})))));
        api.expect_list_manifest_works()
            .returning(|_| Ok(vec![dynamic_fixture("work", serde_json::json!({}))]));
        api.expect_delete_managed_cluster().never();

        let mut adm = MockClusteradm::new();
        adm.expect_run().never();

        let ctx = ctx_with(default_fleet_api(), Arc::new(api), adm);
        let mut fc = sample_fleetconfig(vec![]);
        fc.status = Some(FleetConfigStatus {
            joined_spokes: vec![JoinedSpoke {
                name: "spoke-a".to_string(),
                kubeconfig: in_cluster_kubeconfig(),
                purge_klusterlet_operator: true,
            }],
            ..Default::default()
        });

        handle_spokes(&ctx, &mut fc).await.unwrap();

        let cond = fc.get_condition("spoke-cluster-spoke-a-unjoined").unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert!(cond.message.contains("Found manifestWorks for ManagedCluster spoke-a"));
        // the entry is retained for a retry on the next pass
        assert_eq!(fc.status.as_ref().unwrap().joined_spokes.len(), 1);
    }

    /// Story: an already-gone ManagedCluster makes deregistration a no-op
    /// success
    #[tokio::test]
    async fn story_deregistering_an_absent_managed_cluster_succeeds() {
        let mut api = MockOcmApi::new();
        api.expect_get_managed_cluster().returning(|_| Ok(None));
        api.expect_delete_managed_cluster().never();

        let mut adm = MockClusteradm::new();
        adm.expect_run().never();

        let ctx = ctx_with(default_fleet_api(), Arc::new(api), adm);
        let mut fc = sample_fleetconfig(vec![]);
        fc.status = Some(FleetConfigStatus {
            joined_spokes: vec![JoinedSpoke {
                name: "spoke-a".to_string(),
                kubeconfig: in_cluster_kubeconfig(),
                purge_klusterlet_operator: true,
            }],
            ..Default::default()
        });

        handle_spokes(&ctx, &mut fc).await.unwrap();

        assert!(fc.condition_is_true("spoke-cluster-spoke-a-unjoined"));
        assert!(fc.status.as_ref().unwrap().joined_spokes.is_empty());
    }

    /// A joined spoke whose kubeconfig reference changed counts as drift:
    /// the old registration is deregistered and the spoke re-recorded
    #[tokio::test]
    async fn changed_kubeconfig_counts_as_drift() {
        let mut api = MockOcmApi::new();
        api.expect_get_managed_cluster()
            .returning(|name| Ok(Some(joined_managed_cluster(name))));
        api.expect_list_manifest_works().returning(|_| Ok(vec![]));
        api.expect_delete_managed_cluster().returning(|_| Ok(()));
        api.expect_label_managed_cluster().returning(|_, _, _| Ok(()));

        let mut fleet = default_fleet_api();
        fleet.expect_list_cluster_csrs().returning(|| Ok(vec![]));
        fleet.expect_delete_namespace().returning(|_, _| Ok(()));
        // the unjoin runs against the OLD kubeconfig from joinedSpokes
        fleet.expect_get_secret().returning(|_, name| {
            assert_eq!(name, "old-kubeconfig");
            use k8s_openapi::ByteString;
            use std::collections::BTreeMap;
            let mut data = BTreeMap::new();
            data.insert("kubeconfig".to_string(), ByteString(b"old-raw".to_vec()));
            Ok(Some(k8s_openapi::api::core::v1::Secret {
                data: Some(data),
                ..Default::default()
            }))
        });

        let mut adm = MockClusteradm::new();
        adm.expect_run()
            .withf(|args, _| args.first().map(String::as_str) == Some("unjoin"))
            .times(1)
            .returning(|_, _| Ok(ok_output()));

        let ctx = ctx_with(fleet, Arc::new(api), adm);
        let mut fc = sample_fleetconfig(vec![spoke("spoke-a")]);
        fc.status = Some(FleetConfigStatus {
            joined_spokes: vec![JoinedSpoke {
                name: "spoke-a".to_string(),
                kubeconfig: Kubeconfig {
                    secret_reference: Some(SecretReference {
                        name: "old-kubeconfig".to_string(),
                        namespace: "fleet".to_string(),
                        kubeconfig_key: None,
                    }),
                    in_cluster: false,
                    context: String::new(),
                },
                purge_klusterlet_operator: true,
            }],
            ..Default::default()
        });

        handle_spokes(&ctx, &mut fc).await.unwrap();

        // old registration dropped, new one re-recorded
        assert!(fc.condition_is_true("spoke-cluster-spoke-a-unjoined"));
        let joined = &fc.status.as_ref().unwrap().joined_spokes;
        assert_eq!(joined.len(), 1);
        assert!(joined[0].kubeconfig.in_cluster);
    }

    // =========================================================================
    // Upgrade Decision Stories
    // =========================================================================

    fn klusterlet_with_images(tags: &[&str]) -> kube::api::DynamicObject {
        let mut spec = serde_json::Map::new();
        for (field, tag) in KLUSTERLET_IMAGE_FIELDS.iter().zip(tags) {
            spec.insert(
                field.to_string(),
                serde_json::json!(format!("quay.io/ocm/component:{tag}")),
            );
        }
        dynamic_fixture("klusterlet", serde_json::json!({ "spec": spec }))
    }

    /// The klusterlet upgrade predicate mirrors the hub's: fires on equality
    /// with the observed lowest version
    #[tokio::test]
    async fn klusterlet_upgrade_fires_on_equality() {
        let mut api = MockOcmApi::new();
        api.expect_get_klusterlet()
            .returning(|| Ok(Some(klusterlet_with_images(&["v0.6.0", "v0.6.0", "v0.6.0"]))));

        let ctx = ctx_with(default_fleet_api(), Arc::new(api), MockClusteradm::new());
        let mut s = spoke("edge-1");
        s.klusterlet.source = Some(OCMSource {
            bundle_version: "v0.6.0".to_string(),
            registry: "quay.io/open-cluster-management".to_string(),
        });

        assert!(spoke_needs_upgrade(&ctx, &s).await.unwrap());
    }

    #[tokio::test]
    async fn klusterlet_upgrade_skips_default_bundle() {
        let mut api = MockOcmApi::new();
        api.expect_get_klusterlet().never();

        let ctx = ctx_with(default_fleet_api(), Arc::new(api), MockClusteradm::new());
        assert!(!spoke_needs_upgrade(&ctx, &spoke("edge-1")).await.unwrap());
    }

    /// Story: when the predicate fires during the spoke pass, 'clusteradm
    /// upgrade klusterlet' runs against the spoke's kubeconfig
    #[tokio::test]
    async fn story_klusterlet_upgrade_invokes_clusteradm() {
        let mut api = MockOcmApi::new();
        api.expect_get_managed_cluster()
            .returning(|name| Ok(Some(joined_managed_cluster(name))));
        api.expect_label_managed_cluster().returning(|_, _, _| Ok(()));
        api.expect_get_klusterlet()
            .returning(|| Ok(Some(klusterlet_with_images(&["v0.6.0", "v0.6.0", "v0.6.0"]))));

        let mut adm = MockClusteradm::new();
        adm.expect_run()
            .withf(|args, _| {
                args[..2] == ["upgrade".to_string(), "klusterlet".to_string()]
                    && args.contains(&"--kubeconfig".to_string())
            })
            .times(1)
            .returning(|_, _| Ok(ok_output()));

        let ctx = ctx_with(default_fleet_api(), Arc::new(api), adm);
        let mut fc = sample_fleetconfig(vec![spoke("edge-1")]);
        fc.spec.spokes[0].klusterlet.source = Some(OCMSource {
            bundle_version: "v0.6.0".to_string(),
            registry: "quay.io/open-cluster-management".to_string(),
        });

        handle_spokes(&ctx, &mut fc).await.unwrap();
    }

    // =========================================================================
    // Deletion-Time Spoke Cleanup
    // =========================================================================

    /// Story: only spokes whose join condition is True are unjoined during
    /// deletion; hub-side state is left to the hub clean
    #[tokio::test]
    async fn story_cleanup_unjoins_only_joined_spokes() {
        let api = MockOcmApi::new();

        let mut adm = MockClusteradm::new();
        adm.expect_run()
            .withf(|args, _| {
                args[..3]
                    == [
                        "unjoin".to_string(),
                        "--cluster-name".to_string(),
                        "edge-1".to_string(),
                    ]
            })
            .times(1)
            .returning(|_, _| Ok(ok_output()));

        let ctx = ctx_with(default_fleet_api(), Arc::new(api), adm);
        let mut fc = sample_fleetconfig(vec![spoke("edge-1"), spoke("edge-2")]);
        fc.set_conditions(
            true,
            [
                Condition::new(
                    "Joined",
                    fc.spec.spokes[0].join_type(),
                    ConditionStatus::True,
                    ConditionStatus::True,
                ),
                Condition::new(
                    "",
                    fc.spec.spokes[1].join_type(),
                    ConditionStatus::False,
                    ConditionStatus::True,
                ),
            ],
        );

        cleanup_spokes(&ctx, &fc).await.unwrap();
    }

    // =========================================================================
    // Token Handling
    // =========================================================================

    /// The token request includes the bootstrap-token toggle and parses the
    /// JSON response
    #[tokio::test]
    async fn get_token_round_trip() {
        let mut adm = MockClusteradm::new();
        adm.expect_run()
            .withf(|args, _| {
                args[..3]
                    == [
                        "get".to_string(),
                        "token".to_string(),
                        "--output=json".to_string(),
                    ]
                    && args.contains(&"--use-bootstrap-token=false".to_string())
                    && args.contains(&"--kubeconfig".to_string())
            })
            .times(1)
            .returning(|_, _| Ok(token_output()));

        let ctx = ctx_with(default_fleet_api(), Arc::new(MockOcmApi::new()), adm);
        let fc = sample_fleetconfig(vec![]);

        let token = get_token(&ctx, &fc).await.unwrap();
        assert_eq!(token.token, "hub-join-token");
        assert_eq!(token.hub_api_server, "https://hub.example:6443");
    }

    /// A malformed token response is a serialization error
    #[tokio::test]
    async fn malformed_token_response_is_an_error() {
        let mut adm = MockClusteradm::new();
        adm.expect_run().returning(|_, _| {
            Ok(CmdOutput {
                success: true,
                status: "exit status: 0".to_string(),
                combined: "not json".to_string(),
            })
        });

        let ctx = ctx_with(default_fleet_api(), Arc::new(MockOcmApi::new()), adm);
        let fc = sample_fleetconfig(vec![]);

        let err = get_token(&ctx, &fc).await.unwrap_err();
        assert!(err.to_string().contains("failed to unmarshal join token"));
    }
}
