//! Authorization collaborator: `(tenant, subject, path, action) -> allow | deny`.
//!
//! `PolicySet` is the bundled implementation. Grants match paths segment by segment: `*` matches one
//! segment (or, as the last segment, everything below), `:name` and `{name}` match one segment.

use crate::error::{AppError, BootError};
use crate::service::Principal;
use async_trait::async_trait;
use axum::http::Method;
use regex::Regex;

/// Subject that bypasses every check.
pub const SUPER_ADMIN: &str = "super_admin";

/// One authorization question.
#[derive(Clone, Copy, Debug)]
pub struct AccessRequest<'a> {
    /// Tenant the request targets (`X-Tenant-ID`); the caller's own tenant when absent.
    pub tenant: Option<&'a str>,
    pub principal: &'a Principal,
    pub path: &'a str,
    pub action: &'a Method,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    async fn authorize(&self, req: &AccessRequest<'_>) -> Decision;
}

/// Run the authorizer and map a denial to `Forbidden`.
pub async fn check(authorizer: &dyn Authorizer, req: &AccessRequest<'_>) -> Result<(), AppError> {
    if req.principal.is_anonymous() {
        return Err(AppError::Unauthenticated("no credentials".into()));
    }
    match authorizer.authorize(req).await {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            tracing::info!(
                subject = %req.principal.subject,
                tenant = ?req.tenant,
                path = %req.path,
                action = %req.action,
                "access denied"
            );
            Err(AppError::Forbidden(format!("{} {}", req.action, req.path)))
        }
    }
}

#[derive(Clone, Debug)]
pub struct Grant {
    pub subject: String,
    /// HTTP method or `*`.
    pub action: String,
    pub pattern: String,
    matcher: Regex,
}

impl Grant {
    pub fn new(subject: &str, action: &str, pattern: &str) -> Result<Self, BootError> {
        Ok(Grant {
            subject: subject.to_string(),
            action: action.to_ascii_uppercase(),
            pattern: pattern.to_string(),
            matcher: compile_pattern(pattern)?,
        })
    }

    fn permits(&self, subject: &str, action: &Method, path: &str) -> bool {
        (self.subject == subject || self.subject == "*")
            && (self.action == "*" || self.action == action.as_str())
            && self.matcher.is_match(path)
    }
}

#[derive(Clone, Debug, Default)]
pub struct PolicySet {
    grants: Vec<Grant>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, subject: &str, action: &str, pattern: &str) -> Result<Self, BootError> {
        self.grants.push(Grant::new(subject, action, pattern)?);
        Ok(self)
    }

    /// Parse policy lines of the form `p, subject, pattern, action`. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, BootError> {
        let mut set = PolicySet::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.as_slice() {
                ["p", subject, pattern, action] => set = set.grant(subject, action, pattern)?,
                _ => return Err(BootError::Settings(format!("policy line {}: expected 'p, subject, path, action'", n + 1))),
            }
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl Authorizer for PolicySet {
    async fn authorize(&self, req: &AccessRequest<'_>) -> Decision {
        let principal = req.principal;
        if principal.is_super_admin() {
            return Decision::Allow;
        }
        if let Some(tenant) = req.tenant {
            if tenant != principal.tenant {
                return Decision::Deny;
            }
        }
        if self
            .grants
            .iter()
            .any(|g| g.permits(&principal.subject, req.action, req.path))
        {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, BootError> {
    let segments: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let last = segments.len().saturating_sub(1);
    let mut re = String::from("^");
    for (i, seg) in segments.iter().enumerate() {
        if seg.is_empty() && segments.len() == 1 {
            break;
        }
        re.push('/');
        let is_placeholder = seg.starts_with(':') || (seg.starts_with('{') && seg.ends_with('}'));
        if *seg == "*" && i == last {
            re.push_str(".*");
        } else if *seg == "*" || is_placeholder {
            re.push_str("[^/]+");
        } else {
            re.push_str(&regex::escape(seg));
        }
    }
    re.push_str("/?$");
    Regex::new(&re).map_err(|e| BootError::Settings(format!("policy pattern '{}': {}", pattern, e)))
}

/// Segment-wise path match as used by `PolicySet`.
pub fn key_match(path: &str, pattern: &str) -> bool {
    compile_pattern(pattern).map(|re| re.is_match(path)).unwrap_or(false)
}
