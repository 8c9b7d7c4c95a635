//! FleetConfig controller implementation

mod fleetconfig;
mod hub;
mod spoke;

pub use fleetconfig::{
    error_policy, reconcile, Context, FleetApi, RealFleetApi,
};
