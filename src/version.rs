//! Bundle version helpers
//!
//! OCM encodes the active bundle version in the image pull specs of the
//! ClusterManager and Klusterlet resources. Upgrade decisions compare the
//! lowest version referenced there against the desired bundle version.

use semver::Version;
use tracing::warn;

use crate::{Error, Result};

/// Find the lowest semantic version among a list of image pull specs.
///
/// Each spec is expected to look like `<registry>/<repo>:<tag>`; the tag is
/// parsed as semver, tolerating a leading `v`. Specs that do not split into
/// exactly two parts on `:`, or whose tag is not valid semver, are skipped.
///
/// Returns an error if no spec yields a valid version.
pub fn lowest_bundle_version(bundle_specs: &[String]) -> Result<String> {
    // (parsed version, tag as written) so the returned string matches the
    // image tag verbatim, leading `v` included
    let mut versions: Vec<(Version, String)> = Vec::new();
    for spec in bundle_specs {
        let parts: Vec<&str> = spec.split(':').collect();
        if parts.len() != 2 {
            warn!(bundle_spec = %spec, "invalid bundleSpec");
            continue;
        }
        match Version::parse(parts[1].trim_start_matches('v')) {
            Ok(v) => versions.push((v, parts[1].to_string())),
            Err(_) => {
                warn!(version = %parts[1], "invalid bundleSpec version");
                continue;
            }
        }
    }
    if versions.is_empty() {
        return Err(Error::version("no valid bundle versions detected"));
    }
    versions.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(versions.remove(0).1)
}
