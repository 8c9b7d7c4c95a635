//! Admission webhooks for FleetConfig
//!
//! A validating webhook enforces the create/update rules (delete is a no-op)
//! and a defaulting webhook is registered for future defaults. Both speak the
//! AdmissionReview protocol over HTTPS; TLS termination is configured in
//! `main`.

mod fleetconfig;

use axum::{routing::post, Router};

pub use fleetconfig::{default_handler, validate_handler};

/// Create the webhook router with the admission endpoints
pub fn webhook_router() -> Router {
    Router::new()
        .route(
            "/validate-fleetconfig-open-cluster-management-io-v1alpha1-fleetconfig",
            post(validate_handler),
        )
        .route(
            "/mutate-fleetconfig-open-cluster-management-io-v1alpha1-fleetconfig",
            post(default_handler),
        )
}
