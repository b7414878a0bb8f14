//! Caller identity. Token formats are left to the application: implement `Authenticator`.

use crate::error::AppError;
use crate::service::Principal;
use async_trait::async_trait;
use axum::http::HeaderMap;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_TENANT_HEADER: &str = "X-User-Tenant";

#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// An anonymous principal (empty subject) when the request carries no identity.
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AppError>;
}

/// Trusts `X-User-ID` and `X-User-Tenant` as set by a fronting gateway.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderAuthenticator;

fn header(headers: &HeaderMap, name: &str) -> Result<String, AppError> {
    match headers.get(name) {
        None => Ok(String::new()),
        Some(v) => v
            .to_str()
            .map(|s| s.trim().to_string())
            .map_err(|_| AppError::Unauthenticated(format!("{} is not valid text", name))),
    }
}

#[async_trait]
impl Authenticator for HeaderAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AppError> {
        Ok(Principal::new(
            header(headers, USER_TENANT_HEADER)?,
            header(headers, USER_ID_HEADER)?,
        ))
    }
}
