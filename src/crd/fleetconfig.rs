//! FleetConfig Custom Resource Definition
//!
//! A FleetConfig declares the desired fleet topology: hub identity, bundle
//! versions, registration-auth driver, and the set of spoke clusters with
//! their connection material. The controller drives the real world toward
//! this topology and records progress in the status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, ConditionStatus, FleetConfigPhase, Hub, JoinedSpoke, RegistrationAuth,
    RegistrationDriver, Spoke,
};

/// Specification for a FleetConfig
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fleetconfig.open-cluster-management.io",
    version = "v1alpha1",
    kind = "FleetConfig",
    plural = "fleetconfigs",
    shortname = "fc",
    status = "FleetConfigStatus",
    namespaced,
    printcolumn = r#"{"name":"PHASE","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfigSpec {
    /// Hub cluster configuration
    pub hub: Hub,

    /// Spoke clusters to register with the hub
    #[serde(default)]
    pub spokes: Vec<Spoke>,

    /// Registration authentication configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_auth: Option<RegistrationAuth>,
}

impl FleetConfigSpec {
    /// The registration driver in effect, defaulting to csr when unset
    pub fn registration_driver(&self) -> RegistrationDriver {
        RegistrationAuth::driver_or_default(self.registration_auth.as_ref())
    }
}

/// Observed state of a FleetConfig
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfigStatus {
    /// Current lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<FleetConfigPhase>,

    /// Conditions representing fleet state; at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Spokes that have successfully joined the hub. Rewritten each
    /// reconciliation; consulted during deletion so the controller knows what
    /// to unjoin even if the spec has diverged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joined_spokes: Vec<JoinedSpoke>,
}

impl FleetConfigStatus {
    /// Get the condition with the supplied type, if it exists
    pub fn get_condition(&self, ctype: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == ctype)
    }

    /// Set the supplied conditions, adding net-new conditions and replacing
    /// any existing conditions of the same type. This is a no-op for each
    /// supplied condition that is identical (ignoring the last transition
    /// time) to the one already set. If `cover` is false, existing conditions
    /// are never replaced.
    pub fn set_conditions(&mut self, cover: bool, conditions: impl IntoIterator<Item = Condition>) {
        for new in conditions {
            let mut exists = false;
            for existing in self.conditions.iter_mut() {
                if existing.type_ != new.type_ {
                    continue;
                }
                exists = true;
                if existing.equal(&new) {
                    continue;
                }
                if cover {
                    *existing = new.clone();
                }
            }
            if !exists {
                self.conditions.push(new);
            }
        }
    }

    /// Returns true if the status is identical to the supplied status,
    /// ignoring last transition times and condition order
    pub fn equal(&self, other: &FleetConfigStatus) -> bool {
        if self.phase != other.phase || self.conditions.len() != other.conditions.len() {
            return false;
        }
        let mut sc: Vec<&Condition> = self.conditions.iter().collect();
        let mut oc: Vec<&Condition> = other.conditions.iter().collect();
        sc.sort_by(|a, b| a.type_.cmp(&b.type_));
        oc.sort_by(|a, b| a.type_.cmp(&b.type_));
        sc.iter().zip(oc.iter()).all(|(a, b)| a.equal(b))
    }
}

impl FleetConfig {
    /// Get the condition with the supplied type, if it exists
    pub fn get_condition(&self, ctype: &str) -> Option<&Condition> {
        self.status.as_ref().and_then(|s| s.get_condition(ctype))
    }

    /// Set the supplied conditions, initializing status if absent
    pub fn set_conditions(&mut self, cover: bool, conditions: impl IntoIterator<Item = Condition>) {
        self.status
            .get_or_insert_with(FleetConfigStatus::default)
            .set_conditions(cover, conditions);
    }

    /// Returns true if the condition of the supplied type exists with
    /// status True
    pub fn condition_is_true(&self, ctype: &str) -> bool {
        self.get_condition(ctype)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }
}
