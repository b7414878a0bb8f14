//! Compiled per-verb configuration of a resource.

use crate::model::{short_type_name, type_identity};
use axum::http::{Method, StatusCode};
use serde::Serialize;
use std::fmt;

/// One of the six CRUD verbs a resource can expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Create,
    Delete,
    Update,
    Patch,
    List,
    Get,
}

impl Verb {
    pub const ALL: [Verb; 6] = [
        Verb::Create,
        Verb::Delete,
        Verb::Update,
        Verb::Patch,
        Verb::List,
        Verb::Get,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Delete => "delete",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::List => "list",
            Verb::Get => "get",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Verb::Create => Method::POST,
            Verb::List | Verb::Get => Method::GET,
            Verb::Update => Method::PUT,
            Verb::Patch => Method::PATCH,
            Verb::Delete => Method::DELETE,
        }
    }

    /// Whether the route addresses a single item (`/E/:P`).
    pub fn is_item(&self) -> bool {
        !matches!(self, Verb::Create | Verb::List)
    }

    /// Status for a successful call.
    pub fn success_status(&self) -> StatusCode {
        match self {
            Verb::Create => StatusCode::CREATED,
            Verb::Delete => StatusCode::NO_CONTENT,
            _ => StatusCode::OK,
        }
    }

    fn index(&self) -> usize {
        match self {
            Verb::Create => 0,
            Verb::Delete => 1,
            Verb::Update => 2,
            Verb::Patch => 3,
            Verb::List => 4,
            Verb::Get => 5,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a request or response type, resolved at compile time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub id: &'static str,
    pub name: &'static str,
}

impl TypeRef {
    pub fn of<T: ?Sized + 'static>() -> Self {
        let id = type_identity::<T>();
        TypeRef {
            id,
            name: short_type_name(id),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionSpec {
    pub enabled: bool,
    /// When false only the default storage operation runs.
    pub service_hook_enabled: bool,
    pub request_type: TypeRef,
    pub response_type: TypeRef,
    pub path_suffix: Option<String>,
    /// Failures in Before or Main do not skip later phases; the first error is still returned.
    pub continue_on_error: bool,
}

impl ActionSpec {
    pub fn disabled(entity: TypeRef) -> Self {
        ActionSpec {
            enabled: false,
            service_hook_enabled: true,
            request_type: entity,
            response_type: entity,
            path_suffix: None,
            continue_on_error: false,
        }
    }
}

/// Frozen verb -> ActionSpec mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceSpec {
    entity: TypeRef,
    actions: [ActionSpec; 6],
}

impl ResourceSpec {
    /// All verbs disabled.
    pub fn new(entity: TypeRef) -> Self {
        ResourceSpec {
            entity,
            actions: std::array::from_fn(|_| ActionSpec::disabled(entity)),
        }
    }

    pub fn entity(&self) -> TypeRef {
        self.entity
    }

    pub fn action(&self, verb: Verb) -> &ActionSpec {
        &self.actions[verb.index()]
    }

    pub(crate) fn set(&mut self, verb: Verb, spec: ActionSpec) {
        self.actions[verb.index()] = spec;
    }

    pub fn enabled_verbs(&self) -> impl Iterator<Item = Verb> + '_ {
        Verb::ALL.into_iter().filter(|v| self.action(*v).enabled)
    }

    /// Whether the verb's payload is the entity itself.
    pub fn uses_entity_payload(&self, verb: Verb) -> bool {
        self.action(verb).request_type == self.entity
    }
}
