//! Extract the target tenant from the `X-Tenant-ID` header.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

/// Header name for the tenant a request targets.
pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";

/// Optional target tenant. Empty or non-UTF-8 values count as absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TenantId(pub Option<String>);

impl TenantId {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let value = headers
            .get(TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        TenantId(value)
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(TenantId::from_headers(&parts.headers))
    }
}
