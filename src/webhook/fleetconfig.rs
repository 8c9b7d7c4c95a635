//! FleetConfig admission handlers
//!
//! Validation applies the rules from [`crate::crd::validation`]: create
//! checks kubeconfig shape and hosted-mode requirements, update admits only
//! the mutable subtrees, delete always passes. The defaulting handler admits
//! unchanged.

use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{error, info};

use crate::crd::{validation, FleetConfig};
use crate::Error;

/// Handle validating admission review for FleetConfigs
pub async fn validate_handler(
    Json(body): Json<AdmissionReview<FleetConfig>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<FleetConfig> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(validate(&req).into_review())
}

/// Handle defaulting admission review for FleetConfigs. Reserved for future
/// defaults; admits unchanged.
pub async fn default_handler(
    Json(body): Json<AdmissionReview<FleetConfig>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<FleetConfig> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    info!(name = ?req.name, "defaulting FleetConfig");
    Json(AdmissionResponse::from(&req).into_review())
}

fn validate(req: &AdmissionRequest<FleetConfig>) -> AdmissionResponse {
    let base = AdmissionResponse::from(req);

    match req.operation {
        Operation::Create => {
            let Some(obj) = &req.object else {
                return base.deny("no object in admission request");
            };
            info!(name = ?obj.metadata.name, "validating FleetConfig create");
            match validation::validate_create(&obj.spec) {
                Ok(()) => base,
                Err(e) => base.deny(deny_message(e)),
            }
        }
        Operation::Update => {
            let (Some(new_obj), Some(old_obj)) = (&req.object, &req.old_object) else {
                return base.deny("missing object in admission request");
            };
            info!(name = ?new_obj.metadata.name, "validating FleetConfig update");
            match validation::allow_update(&new_obj.spec, &old_obj.spec) {
                Ok(()) => base,
                Err(e) => base.deny(deny_message(e)),
            }
        }
        // deletion is unconstrained
        _ => base,
    }
}

/// Surface validation messages verbatim, without the error-variant prefix
fn deny_message(err: Error) -> String {
    match err {
        Error::Validation(msg) => msg,
        other => other.to_string(),
    }
}
