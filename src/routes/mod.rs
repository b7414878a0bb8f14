mod binder;
mod common;

pub use binder::{resource_routes, REQUEST_ID_HEADER, REQUEST_TIMEOUT_HEADER};
pub use common::{common_routes, COMMON_PATHS};

use crate::error::BootError;
use crate::state::AppState;
use axum::Router;

/// Common routes merged with every compiled resource route.
/// A resource path that collides with a common path is a `PathConflict`.
pub fn app(state: AppState) -> Result<Router, BootError> {
    for resource in state.registry.enumerate() {
        if let Some(route) = resource.routes().into_iter().find(|r| COMMON_PATHS.contains(&r.path.as_str())) {
            return Err(BootError::PathConflict(format!(
                "{} {} is reserved",
                route.method, route.path
            )));
        }
    }
    let resources = resource_routes(state.clone())?;
    Ok(common_routes(state).merge(resources))
}
