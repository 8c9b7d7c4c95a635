//! Kubeconfig resolution and materialization
//!
//! Every clusteradm invocation and every remote API client needs raw
//! kubeconfig bytes, sourced either from a referenced secret or from the
//! identity of the cluster the controller runs in. Bytes handed to clusteradm
//! are materialized as temp files whose lifetime is tied to a guard object,
//! so cleanup happens on every exit path.

use std::io::Write;
use std::path::Path;

use k8s_openapi::api::core::v1::Secret;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::crd::Kubeconfig;
use crate::{Error, Result};

/// Secret key holding the kubeconfig when none is configured
const DEFAULT_KUBECONFIG_KEY: &str = "kubeconfig";

/// Standard service account mount inside a pod
const SERVICE_ACCOUNT_ROOT: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Extract raw kubeconfig bytes from a secret, using the configured key or
/// the default `kubeconfig` key.
pub fn from_secret(secret: &Secret, kubeconfig: &Kubeconfig) -> Result<Vec<u8>> {
    let secret_ref = kubeconfig
        .secret_reference
        .as_ref()
        .ok_or_else(|| Error::kubeconfig("kubeconfig has no secret reference"))?;
    let key = secret_ref
        .kubeconfig_key
        .as_deref()
        .unwrap_or(DEFAULT_KUBECONFIG_KEY);

    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| bytes.0.clone())
        .ok_or_else(|| {
            Error::kubeconfig(format!(
                "failed to get kubeconfig for ref {}/{} using key {}",
                secret_ref.namespace, secret_ref.name, key
            ))
        })
}

/// Build raw kubeconfig bytes from the ambient in-cluster identity: API
/// server from the service environment, CA bundle and bearer token from the
/// standard service-account mount.
pub fn in_cluster_raw() -> Result<Vec<u8>> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST")
        .map_err(|_| Error::kubeconfig("KUBERNETES_SERVICE_HOST is not set"))?;
    let port = std::env::var("KUBERNETES_SERVICE_PORT")
        .map_err(|_| Error::kubeconfig("KUBERNETES_SERVICE_PORT is not set"))?;
    let server = format!("https://{host}:{port}");

    let token_path = format!("{SERVICE_ACCOUNT_ROOT}/token");
    let token = std::fs::read_to_string(&token_path)
        .map_err(|e| Error::kubeconfig(format!("failed to read {token_path}: {e}")))?;
    let ca_path = format!("{SERVICE_ACCOUNT_ROOT}/ca.crt");

    raw_from_parts(&server, Some(&ca_path), Some(token.trim()))
}

/// Render a minimal single-context kubeconfig document.
pub fn raw_from_parts(server: &str, ca_file: Option<&str>, token: Option<&str>) -> Result<Vec<u8>> {
    let mut cluster = json!({ "server": server });
    if let Some(ca) = ca_file {
        cluster["certificate-authority"] = json!(ca);
    }
    let mut user = json!({});
    if let Some(token) = token {
        user["token"] = json!(token);
    }

    let config = json!({
        "kind": "Config",
        "apiVersion": "v1",
        "clusters": [{ "name": "default-cluster", "cluster": cluster }],
        "contexts": [{
            "name": "default-context",
            "context": { "cluster": "default-cluster", "user": "default-user" },
        }],
        "current-context": "default-context",
        "users": [{ "name": "default-user", "user": user }],
    });

    serde_yaml::to_string(&config)
        .map(String::into_bytes)
        .map_err(|e| Error::kubeconfig(format!("failed to render kubeconfig: {e}")))
}

/// Write content to a temp file whose removal is tied to the returned guard.
///
/// The guard deletes the file on drop, so callers holding it across a
/// subprocess invocation get cleanup on every exit path, including errors
/// raised after materialization.
pub fn write_temp(content: &[u8], prefix: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile()
        .map_err(|e| Error::kubeconfig(format!("failed to create temp file: {e}")))?;
    file.write_all(content)
        .map_err(|e| Error::kubeconfig(format!("failed to write temp file: {e}")))?;
    Ok(file)
}

/// Materialize raw kubeconfig bytes and append `--context`/`--kubeconfig`
/// flags to a clusteradm argument vector. The returned guard must outlive the
/// invocation.
pub fn kubeconfig_args(
    raw: &[u8],
    kubeconfig: &Kubeconfig,
    args: &mut Vec<String>,
) -> Result<NamedTempFile> {
    let file = write_temp(raw, "kubeconfig")?;
    if !kubeconfig.context.is_empty() {
        args.push("--context".to_string());
        args.push(kubeconfig.context.clone());
    }
    debug!(path = %file.path().display(), "using kubeconfig");
    args.push("--kubeconfig".to_string());
    args.push(path_string(file.path()));
    Ok(file)
}

pub(crate) fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
