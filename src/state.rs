//! Shared application state for all routes.

use crate::authz::Authorizer;
use crate::diagnostics::RuntimeStats;
use crate::extractors::{Authenticator, HeaderAuthenticator};
use crate::registry::Registry;
use crate::settings::{DEFAULT_BODY_LIMIT_BYTES, DEFAULT_SERVICE_NAME};
use crate::storage::Storage;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Must be compiled before routes are built.
    pub registry: Arc<Registry>,
    pub storage: Arc<dyn Storage>,
    pub authenticator: Arc<dyn Authenticator>,
    /// Every resource call is checked when set.
    pub authorizer: Option<Arc<dyn Authorizer>>,
    pub stats: Arc<RuntimeStats>,
    pub service_name: String,
    pub body_limit_bytes: usize,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, storage: Arc<dyn Storage>) -> Self {
        AppState {
            registry,
            storage,
            authenticator: Arc::new(HeaderAuthenticator),
            authorizer: None,
            stats: Arc::new(RuntimeStats::new()),
            service_name: DEFAULT_SERVICE_NAME.into(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
        }
    }

    pub fn with_authenticator(mut self, authenticator: impl Authenticator) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    pub fn with_authorizer(mut self, authorizer: impl Authorizer) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    pub fn with_stats(mut self, stats: Arc<RuntimeStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit_bytes = bytes;
        self
    }
}
