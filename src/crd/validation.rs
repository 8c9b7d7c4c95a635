//! Admission validation rules for FleetConfig create and update
//!
//! Create checks that every surfaced kubeconfig names exactly one source and
//! that hosted-mode spokes carry a managed cluster kubeconfig. Update only
//! admits changes under `spec.registrationAuth.*`,
//! `spec.hub.clusterManager.source.*`, and
//! `spec.spokes[*].klusterlet.source.*` (plus spoke additions and removals);
//! everything else is compared deep-equal with the permitted subtrees nulled
//! out.

use std::collections::HashMap;

use super::types::{Kubeconfig, KlusterletMode, Spoke};
use super::FleetConfigSpec;
use crate::{Error, Result};

/// Validate a FleetConfig on creation
pub fn validate_create(spec: &FleetConfigSpec) -> Result<()> {
    let mut errs: Vec<String> = Vec::new();

    if let Err(msg) = validate_kubeconfig(&spec.hub.kubeconfig) {
        errs.push(format!("hub: {msg}"));
    }

    for (i, spoke) in spec.spokes.iter().enumerate() {
        if spoke.klusterlet.mode == KlusterletMode::Hosted {
            match &spoke.klusterlet.managed_cluster_kubeconfig {
                None => errs.push(format!(
                    "spokes[{i}]: managedClusterKubeconfig is required in hosted mode"
                )),
                Some(kc) => {
                    if let Err(msg) = validate_kubeconfig(kc) {
                        errs.push(format!("spokes[{i}]: {msg}"));
                    }
                }
            }
        }
        if let Err(msg) = validate_kubeconfig(&spoke.kubeconfig) {
            errs.push(format!("spokes[{i}]: {msg}"));
        }
    }

    if errs.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(errs.join("; ")))
    }
}

fn validate_kubeconfig(kubeconfig: &Kubeconfig) -> std::result::Result<(), &'static str> {
    if kubeconfig.secret_reference.is_none() && !kubeconfig.in_cluster {
        return Err("either secretReference or inCluster must be specified for the kubeconfig");
    }
    if kubeconfig.secret_reference.is_some() && kubeconfig.in_cluster {
        return Err(
            "either secretReference or inCluster can be specified for the kubeconfig, not both",
        );
    }
    Ok(())
}

/// Validate a FleetConfig update, admitting only the permitted mutations
pub fn allow_update(new_spec: &FleetConfigSpec, old_spec: &FleetConfigSpec) -> Result<()> {
    // Hub check
    if new_spec.hub != old_spec.hub {
        let mut old_hub = old_spec.hub.clone();
        let mut new_hub = new_spec.hub.clone();

        if let Some(cm) = old_hub.cluster_manager.as_mut() {
            cm.source = None;
        }
        if let Some(cm) = new_hub.cluster_manager.as_mut() {
            cm.source = None;
        }

        if old_hub != new_hub {
            return Err(Error::validation(
                "only changes to hub.spec.hub.clusterManager.source.* are allowed when updating the hub",
            ));
        }
    }

    // Spoke check
    if new_spec.spokes != old_spec.spokes {
        let old_spokes: HashMap<&str, &Spoke> = old_spec
            .spokes
            .iter()
            .map(|s| (s.name.as_str(), s))
            .collect();

        // for spokes that exist in both old and new, only source may change
        for new_spoke in &new_spec.spokes {
            if let Some(old_spoke) = old_spokes.get(new_spoke.name.as_str()) {
                let mut old_copy = (*old_spoke).clone();
                let mut new_copy = new_spoke.clone();
                old_copy.klusterlet.source = None;
                new_copy.klusterlet.source = None;

                if old_copy != new_copy {
                    return Err(Error::validation(format!(
                        "spoke '{}' contains changes which are not allowed; only changes to spec.spokes[*].klusterlet.source.* are allowed when updating a spoke",
                        new_spoke.name
                    )));
                }
            }
        }
    }

    Ok(())
}
