//! Resource registry: types register at boot, `compile` evaluates every design once and freezes.
//!
//! Registration is guarded by a mutex; everything read after `compile` lives in a `OnceLock`.

use crate::dsl::{evaluate, validate_routes, ResourceSpec, TypeRef, Verb};
use crate::error::{AppError, BootError};
use crate::model::{default_endpoint, default_param, type_identity, Model};
use crate::service::{CallInput, CallOutput, Invoke, Pipeline, ServiceContext, Services};
use crate::storage::Storage;
use axum::http::Method;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// One bound route of a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    /// axum path, e.g. `/users/:user`.
    pub path: String,
    pub verb: Verb,
}

/// A compiled resource.
#[derive(Clone)]
pub struct Resource {
    pub type_id: String,
    pub name: String,
    pub endpoint: String,
    pub param: String,
    pub spec: ResourceSpec,
    pipeline: Arc<dyn Invoke>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("type_id", &self.type_id)
            .field("endpoint", &self.endpoint)
            .field("param", &self.param)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl Resource {
    /// `/E[/S]` for the verb.
    pub fn base_path(&self, verb: Verb) -> String {
        match &self.spec.action(verb).path_suffix {
            Some(suffix) => format!("/{}/{}", self.endpoint, suffix),
            None => format!("/{}", self.endpoint),
        }
    }

    pub fn path(&self, verb: Verb) -> String {
        if verb.is_item() {
            format!("{}/:{}", self.base_path(verb), self.param)
        } else {
            self.base_path(verb)
        }
    }

    /// Routes of enabled verbs only.
    pub fn routes(&self) -> Vec<Route> {
        self.spec
            .enabled_verbs()
            .map(|verb| Route {
                method: verb.method(),
                path: self.path(verb),
                verb,
            })
            .collect()
    }

    /// Drive one call through the resource's pipeline.
    pub async fn call(
        &self,
        storage: &dyn Storage,
        ctx: &mut ServiceContext,
        input: CallInput,
    ) -> Result<CallOutput, AppError> {
        self.pipeline.invoke(storage, ctx, input).await
    }
}

trait Registration: Send {
    fn identity(&self) -> &'static str;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn compile(self: Box<Self>) -> Result<Resource, BootError>;
}

struct TypedRegistration<M: Model> {
    services: Option<Services<M>>,
}

impl<M: Model> Registration for TypedRegistration<M> {
    fn identity(&self) -> &'static str {
        type_identity::<M>()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn compile(self: Box<Self>) -> Result<Resource, BootError> {
        let entity = TypeRef::of::<M>();
        let designed = evaluate(entity, M::design)?;
        let endpoint = designed.endpoint.unwrap_or_else(|| default_endpoint(entity.name));
        let param = designed.param.unwrap_or_else(|| default_param(entity.name));
        let pipeline = Pipeline::<M>::build(entity.id, &endpoint, &designed.spec, self.services)?;
        Ok(Resource {
            type_id: entity.id.to_string(),
            name: entity.name.to_string(),
            endpoint,
            param,
            spec: designed.spec,
            pipeline: Arc::new(pipeline),
        })
    }
}

struct Pending {
    open: bool,
    registrations: Vec<Box<dyn Registration>>,
}

struct Compiled {
    resources: Vec<Resource>,
    by_type: HashMap<String, usize>,
}

pub struct Registry {
    pending: Mutex<Pending>,
    compiled: OnceLock<Compiled>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry {
            pending: Mutex::new(Pending {
                open: true,
                registrations: Vec::new(),
            }),
            compiled: OnceLock::new(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `M` with every verb disabled until its design says otherwise.
    pub fn register<M: Model>(&self) -> Result<(), BootError> {
        let mut pending = self.pending();
        if !pending.open {
            return Err(BootError::FrozenRegistry);
        }
        let type_id = type_identity::<M>();
        if pending.registrations.iter().any(|r| r.identity() == type_id) {
            return Err(BootError::AlreadyRegistered(type_id.to_string()));
        }
        pending
            .registrations
            .push(Box::new(TypedRegistration::<M> { services: None }));
        tracing::debug!(resource = %type_id, "resource registered");
        Ok(())
    }

    /// Attach hooks and main handlers to a registered `M`.
    pub fn register_services<M: Model>(&self, services: Services<M>) -> Result<(), BootError> {
        let mut pending = self.pending();
        if !pending.open {
            return Err(BootError::FrozenRegistry);
        }
        let type_id = type_identity::<M>();
        let slot = pending
            .registrations
            .iter_mut()
            .find_map(|r| r.as_any_mut().downcast_mut::<TypedRegistration<M>>())
            .ok_or_else(|| BootError::NotFound(type_id.to_string()))?;
        if slot.services.is_some() {
            return Err(BootError::AlreadyRegistered(format!("services for {}", type_id)));
        }
        slot.services = Some(services);
        Ok(())
    }

    /// Evaluate every design once, check paths, cache call plans and freeze. Runs at most once;
    /// a failed compile also leaves the registry frozen.
    pub fn compile(&self) -> Result<(), BootError> {
        let mut pending = self.pending();
        if !pending.open {
            return Err(BootError::FrozenRegistry);
        }
        pending.open = false;
        let registrations = std::mem::take(&mut pending.registrations);
        let resources = registrations
            .into_iter()
            .map(|r| r.compile())
            .collect::<Result<Vec<_>, _>>()?;
        validate_routes(&resources)?;
        let by_type = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.type_id.clone(), i))
            .collect();
        for r in &resources {
            let verbs: Vec<&str> = r.spec.enabled_verbs().map(|v| v.as_str()).collect();
            tracing::info!(resource = %r.name, endpoint = %r.endpoint, verbs = ?verbs, "resource compiled");
        }
        self.compiled
            .set(Compiled { resources, by_type })
            .map_err(|_| BootError::FrozenRegistry)
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    fn compiled(&self) -> Result<&Compiled, BootError> {
        self.compiled.get().ok_or(BootError::NotCompiled)
    }

    pub fn lookup(&self, type_id: &str) -> Result<&Resource, BootError> {
        let compiled = self.compiled()?;
        compiled
            .by_type
            .get(type_id)
            .map(|i| &compiled.resources[*i])
            .ok_or_else(|| BootError::NotFound(type_id.to_string()))
    }

    pub fn lookup_type<M: Model>(&self) -> Result<&Resource, BootError> {
        self.lookup(type_identity::<M>())
    }

    /// Compiled resources in registration order; empty before `compile`.
    pub fn enumerate(&self) -> &[Resource] {
        self.compiled
            .get()
            .map(|c| c.resources.as_slice())
            .unwrap_or(&[])
    }
}
