//! Binds every enabled (resource, verb) of a compiled registry to an axum route.
//! Paths nothing is bound to, and methods a path does not serve, answer 404.

use crate::authz::{self, AccessRequest};
use crate::dsl::Verb;
use crate::error::{AppError, BootError};
use crate::extractors::TenantId;
use crate::response::render;
use crate::service::{CallInput, ServiceContext};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, HeaderValue, Uri},
    response::{IntoResponse, Response},
    routing::{MethodFilter, MethodRouter},
    Router,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";
pub const REQUEST_TIMEOUT_HEADER: &str = "X-Request-Timeout-Ms";

fn method_filter(verb: Verb) -> MethodFilter {
    match verb {
        Verb::Create => MethodFilter::POST,
        Verb::List | Verb::Get => MethodFilter::GET,
        Verb::Update => MethodFilter::PUT,
        Verb::Patch => MethodFilter::PATCH,
        Verb::Delete => MethodFilter::DELETE,
    }
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("no route for {}", uri.path()))
}

/// Everything a resource route extracts from the request.
struct Incoming {
    tenant: TenantId,
    uri: Uri,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
}

/// Routes for all compiled resources. Fails with `NotCompiled` before `Registry::compile`.
pub fn resource_routes(state: AppState) -> Result<Router, BootError> {
    if !state.registry.is_compiled() {
        return Err(BootError::NotCompiled);
    }
    let mut paths: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
    for (index, resource) in state.registry.enumerate().iter().enumerate() {
        for route in resource.routes() {
            let verb = route.verb;
            let handler = move |State(state): State<AppState>,
                                tenant: TenantId,
                                uri: Uri,
                                params: Option<Path<HashMap<String, String>>>,
                                query: Result<Query<HashMap<String, String>>, QueryRejection>,
                                headers: HeaderMap,
                                body: Bytes| async move {
                let query = match query {
                    Ok(Query(q)) => q,
                    Err(e) => return AppError::BadRequest(e.body_text()).into_response(),
                };
                let incoming = Incoming {
                    tenant,
                    uri,
                    params: params.map(|Path(p)| p).unwrap_or_default(),
                    query,
                    headers,
                    body,
                };
                dispatch(state, index, verb, incoming).await
            };
            let method_router = paths.remove(&route.path).unwrap_or_else(MethodRouter::new);
            paths.insert(route.path.clone(), method_router.on(method_filter(verb), handler));
            tracing::debug!(method = %route.method, path = %route.path, resource = %resource.name, "route bound");
        }
    }
    let body_limit = state.body_limit_bytes;
    let router = paths
        .into_iter()
        .fold(Router::new(), |router, (path, method_router)| {
            router.route(&path, method_router.fallback(not_found))
        })
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit));
    Ok(router)
}

async fn dispatch(state: AppState, index: usize, verb: Verb, req: Incoming) -> Response {
    let started = Instant::now();
    let request_id = req
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    state.stats.begin();
    let result = serve(&state, index, verb, &request_id, req).await;
    state.stats.end(result.is_err());

    let mut response = match result {
        Ok(response) => response,
        Err(e) => {
            match &e {
                AppError::Internal { .. } | AppError::StorageUnavailable(_) => {
                    tracing::error!(request_id = %request_id, verb = %verb, error = %e, "request failed")
                }
                _ => tracing::debug!(request_id = %request_id, verb = %verb, error = %e, "request rejected"),
            }
            e.into_response()
        }
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    tracing::info!(
        request_id = %request_id,
        verb = %verb,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}

async fn serve(state: &AppState, index: usize, verb: Verb, request_id: &str, req: Incoming) -> Result<Response, AppError> {
    let resource = state
        .registry
        .enumerate()
        .get(index)
        .ok_or_else(|| AppError::internal(verb, crate::service::Phase::Before, "resource index out of range"))?;

    let principal = state.authenticator.authenticate(&req.headers).await?;
    if let Some(authorizer) = &state.authorizer {
        let action = verb.method();
        let access = AccessRequest {
            tenant: req.tenant.as_deref(),
            principal: &principal,
            path: req.uri.path(),
            action: &action,
        };
        authz::check(authorizer.as_ref(), &access).await?;
    }

    let timeout = match req.headers.get(REQUEST_TIMEOUT_HEADER) {
        None => None,
        Some(v) => {
            let ms: u64 = v
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| AppError::BadRequest(format!("{} must be milliseconds", REQUEST_TIMEOUT_HEADER)))?;
            Some(Duration::from_millis(ms))
        }
    };

    let id = req.params.get(&resource.param).cloned().unwrap_or_default();
    let input = match verb {
        Verb::Create => CallInput::Create { body: json_body(&req.body)? },
        Verb::Update => CallInput::Update { id, body: json_body(&req.body)? },
        Verb::Patch => CallInput::Patch { id, body: json_body(&req.body)? },
        Verb::Delete => CallInput::Delete { id },
        Verb::Get => CallInput::Get { id },
        Verb::List => CallInput::List { query: req.query },
    };

    // Dropping the request future (client gone) cancels the call.
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    let mut ctx = ServiceContext::new(verb, resource.endpoint.clone())
        .with_request_id(request_id)
        .with_principal(principal)
        .with_target_tenant(req.tenant.0.clone())
        .with_cancellation(token);
    if let Some(timeout) = timeout {
        ctx = ctx.with_timeout(timeout);
    }
    let span = ctx.logger();
    let out = resource
        .call(state.storage.as_ref(), &mut ctx, input)
        .instrument(span)
        .await;
    guard.disarm();
    Ok(render(verb, out?))
}

fn json_body(body: &Bytes) -> Result<Value, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("request body is required".into()));
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("invalid JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    #[test]
    fn refuses_uncompiled_registry() {
        let state = AppState::new(Arc::new(Registry::new()), Arc::new(MemoryStorage::new()));
        assert!(matches!(resource_routes(state), Err(BootError::NotCompiled)));
    }

    #[test]
    fn empty_body_is_bad_request() {
        assert!(matches!(json_body(&Bytes::new()), Err(AppError::BadRequest(_))));
        assert!(json_body(&Bytes::from_static(b"{\"a\":1}")).is_ok());
    }
}
