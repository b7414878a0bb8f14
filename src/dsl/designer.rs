//! Builder passed to `Model::design`. Each verb scope gets its own `ActionDesigner`;
//! the top-level builder owns path overrides, so they cannot be declared inside a verb scope.

use crate::dsl::types::{ActionSpec, ResourceSpec, TypeRef, Verb};
use crate::dsl::validator::{validate_param, validate_path_suffix, validate_segment};
use crate::error::BootError;
use std::collections::HashSet;

/// Result of evaluating a design.
#[derive(Clone, Debug)]
pub struct Designed {
    pub endpoint: Option<String>,
    pub param: Option<String>,
    pub spec: ResourceSpec,
}

pub struct ResourceDesigner {
    resource: String,
    entity: TypeRef,
    endpoint: Option<String>,
    param: Option<String>,
    spec: ResourceSpec,
    declared: HashSet<Verb>,
    error: Option<BootError>,
}

impl ResourceDesigner {
    pub(crate) fn new(entity: TypeRef) -> Self {
        ResourceDesigner {
            resource: entity.id.to_string(),
            entity,
            endpoint: None,
            param: None,
            spec: ResourceSpec::new(entity),
            declared: HashSet::new(),
            error: None,
        }
    }

    /// Override the endpoint path segment.
    pub fn endpoint(&mut self, segment: &str) -> &mut Self {
        match validate_segment(segment) {
            Ok(()) => self.endpoint = Some(segment.to_string()),
            Err(msg) => self.fail(BootError::invalid_dsl(&self.resource, format!("endpoint: {}", msg))),
        }
        self
    }

    /// Override the URL parameter name used by single-item verbs.
    pub fn param(&mut self, name: &str) -> &mut Self {
        match validate_param(name) {
            Ok(()) => self.param = Some(name.to_string()),
            Err(msg) => self.fail(BootError::invalid_dsl(&self.resource, format!("param: {}", msg))),
        }
        self
    }

    pub fn create(&mut self, body: impl FnOnce(&mut ActionDesigner)) -> &mut Self {
        self.action(Verb::Create, body)
    }

    pub fn delete(&mut self, body: impl FnOnce(&mut ActionDesigner)) -> &mut Self {
        self.action(Verb::Delete, body)
    }

    pub fn update(&mut self, body: impl FnOnce(&mut ActionDesigner)) -> &mut Self {
        self.action(Verb::Update, body)
    }

    pub fn patch(&mut self, body: impl FnOnce(&mut ActionDesigner)) -> &mut Self {
        self.action(Verb::Patch, body)
    }

    pub fn list(&mut self, body: impl FnOnce(&mut ActionDesigner)) -> &mut Self {
        self.action(Verb::List, body)
    }

    pub fn get(&mut self, body: impl FnOnce(&mut ActionDesigner)) -> &mut Self {
        self.action(Verb::Get, body)
    }

    fn action(&mut self, verb: Verb, body: impl FnOnce(&mut ActionDesigner)) -> &mut Self {
        if !self.declared.insert(verb) {
            self.fail(BootError::DuplicateActionDecl {
                resource: self.resource.clone(),
                verb,
            });
            return self;
        }
        let mut scope = ActionDesigner::new(self.entity);
        body(&mut scope);
        match scope.finish() {
            Ok(spec) => self.spec.set(verb, spec),
            Err(msg) => self.fail(BootError::invalid_dsl(&self.resource, format!("{}: {}", verb, msg))),
        }
        self
    }

    // First error wins; later declarations are still evaluated but ignored.
    fn fail(&mut self, err: BootError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub(crate) fn finish(self) -> Result<Designed, BootError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(Designed {
            endpoint: self.endpoint,
            param: self.param,
            spec: self.spec,
        })
    }
}

/// Builder for one verb scope.
pub struct ActionDesigner {
    spec: ActionSpec,
    result_declared: bool,
    payload_declared: bool,
    error: Option<String>,
}

impl ActionDesigner {
    fn new(entity: TypeRef) -> Self {
        ActionDesigner {
            spec: ActionSpec::disabled(entity),
            result_declared: false,
            payload_declared: false,
            error: None,
        }
    }

    /// Expose the verb. Verbs stay disabled unless this is called with `true`.
    pub fn enabled(&mut self, enabled: bool) -> &mut Self {
        self.spec.enabled = enabled;
        self
    }

    /// Whether user hooks and handlers run for this verb.
    pub fn service(&mut self, enabled: bool) -> &mut Self {
        self.spec.service_hook_enabled = enabled;
        self
    }

    /// Response type of the verb's main handler.
    pub fn result<T: 'static>(&mut self) -> &mut Self {
        if self.result_declared {
            self.error.get_or_insert_with(|| "result declared twice".into());
        }
        self.result_declared = true;
        self.spec.response_type = TypeRef::of::<T>();
        self
    }

    /// Request type of the verb's main handler.
    pub fn payload<T: 'static>(&mut self) -> &mut Self {
        if self.payload_declared {
            self.error.get_or_insert_with(|| "payload declared twice".into());
        }
        self.payload_declared = true;
        self.spec.request_type = TypeRef::of::<T>();
        self
    }

    /// Extra path appended to the resource endpoint for this verb.
    pub fn path_suffix(&mut self, suffix: &str) -> &mut Self {
        let trimmed = suffix.trim_matches('/');
        match validate_path_suffix(trimmed) {
            Ok(()) => self.spec.path_suffix = Some(trimmed.to_string()),
            Err(msg) => {
                self.error.get_or_insert_with(|| format!("path_suffix: {}", msg));
            }
        }
        self
    }

    pub fn continue_on_error(&mut self, enabled: bool) -> &mut Self {
        self.spec.continue_on_error = enabled;
        self
    }

    fn finish(self) -> Result<ActionSpec, String> {
        match self.error {
            Some(msg) => Err(msg),
            None => Ok(self.spec),
        }
    }
}

/// Run a design function against a fresh builder.
pub fn evaluate(entity: TypeRef, design: impl FnOnce(&mut ResourceDesigner)) -> Result<Designed, BootError> {
    let mut d = ResourceDesigner::new(entity);
    design(&mut d);
    d.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct App;
    struct AppRsp;
    struct AppReq;

    fn app() -> TypeRef {
        TypeRef::of::<App>()
    }

    #[test]
    fn absent_scopes_and_enabled_calls_leave_verbs_disabled() {
        let d = evaluate(app(), |d| {
            d.create(|a| {
                a.service(false);
            });
        })
        .unwrap();
        assert!(!d.spec.action(Verb::Create).enabled);
        assert!(!d.spec.action(Verb::Create).service_hook_enabled);
        assert!(!d.spec.action(Verb::List).enabled);
    }

    #[test]
    fn service_defaults_to_true() {
        let d = evaluate(app(), |d| {
            d.get(|a| {
                a.enabled(true);
            });
        })
        .unwrap();
        let get = d.spec.action(Verb::Get);
        assert!(get.enabled);
        assert!(get.service_hook_enabled);
        assert!(!get.continue_on_error);
    }

    #[test]
    fn result_and_payload_set_types() {
        let d = evaluate(app(), |d| {
            d.endpoint("apps").list(|a| {
                a.enabled(true).service(true).result::<AppRsp>().payload::<AppReq>();
            });
        })
        .unwrap();
        assert_eq!(d.endpoint.as_deref(), Some("apps"));
        let list = d.spec.action(Verb::List);
        assert_eq!(list.response_type.name, "AppRsp");
        assert_eq!(list.request_type.name, "AppReq");
        assert!(!d.spec.uses_entity_payload(Verb::List));
        assert!(d.spec.uses_entity_payload(Verb::Get));
    }

    #[test]
    fn duplicate_verb_scope_is_rejected() {
        let err = evaluate(app(), |d| {
            d.create(|a| {
                a.enabled(true);
            })
            .create(|a| {
                a.enabled(false);
            });
        })
        .unwrap_err();
        assert!(matches!(err, BootError::DuplicateActionDecl { verb: Verb::Create, .. }));
    }

    #[test]
    fn malformed_values_are_invalid_dsl() {
        let err = evaluate(app(), |d| {
            d.endpoint("bad/segment");
        })
        .unwrap_err();
        assert!(matches!(err, BootError::InvalidDsl { .. }));

        let err = evaluate(app(), |d| {
            d.param("");
        })
        .unwrap_err();
        assert!(matches!(err, BootError::InvalidDsl { .. }));

        let err = evaluate(app(), |d| {
            d.get(|a| {
                a.result::<AppRsp>().result::<AppRsp>();
            });
        })
        .unwrap_err();
        assert!(matches!(err, BootError::InvalidDsl { .. }));
    }

    #[test]
    fn path_suffix_is_normalized() {
        let d = evaluate(app(), |d| {
            d.list(|a| {
                a.enabled(true).path_suffix("/search/");
            });
        })
        .unwrap();
        assert_eq!(d.spec.action(Verb::List).path_suffix.as_deref(), Some("search"));
    }
}
