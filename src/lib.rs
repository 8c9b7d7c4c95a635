//! fleetconfig - declarative hub-and-spoke fleet registration for Kubernetes
//!
//! The fleetconfig operator reconciles a single custom resource, FleetConfig,
//! describing a federated cluster topology: one hub cluster and a set of
//! spoke clusters registered with it. The controller drives the real world
//! toward the declared topology by invoking the `clusteradm` CLI, reading
//! hub-side registration resources, and recording progress as typed status
//! conditions.
//!
//! # Architecture
//!
//! - The hub is always driven to `HubInitialized=True` before any spoke work
//! - Spoke drift cleanup (deregistration) runs before spoke joining, so a
//!   rename is a delete plus an add
//! - Deletion is finalizer-gated: cleanup must succeed once before the
//!   object is released, and it refuses while ManagedClusters hold live
//!   ManifestWorks without the ResourceCleanup feature gate
//!
//! # Modules
//!
//! - [`crd`] - The FleetConfig CRD, supporting types, and admission rules
//! - [`controller`] - Reconciliation loop, hub and spoke lifecycle drivers
//! - [`webhook`] - Validating/defaulting admission endpoints
//! - [`ocm`] - DynamicObject access to OCM registration resources
//! - [`kubeconfig`] - Kubeconfig resolution and temp-file materialization
//! - [`exec`] - clusteradm subprocess runner with heartbeat logging
//! - [`version`] - Bundle version comparison for upgrade decisions
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod exec;
pub mod kubeconfig;
pub mod ocm;
pub mod version;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
