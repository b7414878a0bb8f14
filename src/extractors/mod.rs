//! Request extractors: target tenant and caller identity.

mod principal;
mod tenant;

pub use principal::{Authenticator, HeaderAuthenticator, USER_ID_HEADER, USER_TENANT_HEADER};
pub use tenant::{TenantId, TENANT_ID_HEADER};
