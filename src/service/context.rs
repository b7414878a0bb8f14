//! Per-call ambient state: phase, verb, caller, cancellation and a bound logger.

use crate::dsl::Verb;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Stage of a pipeline call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Before,
    Main,
    After,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Before => "before",
            Phase::Main => "main",
            Phase::After => "after",
        })
    }
}

/// Authenticated caller. An empty subject means anonymous.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Principal {
    pub tenant: String,
    pub subject: String,
}

impl Principal {
    pub fn new(tenant: impl Into<String>, subject: impl Into<String>) -> Self {
        Principal {
            tenant: tenant.into(),
            subject: subject.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.subject.is_empty()
    }

    pub fn is_super_admin(&self) -> bool {
        self.subject == crate::authz::SUPER_ADMIN
    }
}

/// Created by the router binder for one request and dropped once the response is written.
/// Only the pipeline driver changes the phase.
#[derive(Debug)]
pub struct ServiceContext {
    phase: Phase,
    verb: Verb,
    resource: String,
    request_id: String,
    principal: Principal,
    /// Tenant named by the request, if any.
    target_tenant: Option<String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ServiceContext {
    pub fn new(verb: Verb, resource: impl Into<String>) -> Self {
        ServiceContext {
            phase: Phase::Before,
            verb,
            resource: resource.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
            principal: Principal::default(),
            target_tenant: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    /// Tenant the request targets (`X-Tenant-ID`). Only `super_admin` may act outside its own tenant.
    pub fn with_target_tenant(mut self, tenant: Option<String>) -> Self {
        self.target_tenant = tenant.filter(|t| !t.is_empty());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Endpoint segment of the resource being served.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Tenant the call acts in: the caller's own, or the targeted one for `super_admin`.
    pub fn tenant(&self) -> &str {
        match (&self.target_tenant, self.principal.is_super_admin()) {
            (Some(target), true) => target,
            _ => &self.principal.tenant,
        }
    }

    /// Tenant that stored entities must belong to. `None` for `super_admin` without a target.
    pub fn tenant_scope(&self) -> Option<&str> {
        if self.principal.is_super_admin() && self.target_tenant.is_none() {
            None
        } else {
            Some(self.tenant())
        }
    }

    pub fn subject(&self) -> &str {
        &self.principal.subject
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the call was canceled or its deadline passed.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// Resolves when the call is canceled or the deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Span carrying every context field, tagged with the current phase.
    pub fn logger(&self) -> tracing::Span {
        self.with_phase(self.phase)
    }

    /// Span carrying every context field, tagged with `phase`.
    pub fn with_phase(&self, phase: Phase) -> tracing::Span {
        tracing::info_span!(
            "service",
            resource = %self.resource,
            verb = %self.verb,
            phase = %phase,
            request_id = %self.request_id,
            tenant = %self.tenant(),
            subject = %self.principal.subject,
        )
    }
}
