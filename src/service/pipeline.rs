//! Per-resource call plan and the Before → Main → After driver.
//!
//! Every phase future races the context's cancellation and deadline, and panics are caught
//! per phase and turned into `AppError::Internal`.

use crate::dsl::{ActionSpec, ResourceSpec, TypeRef, Verb};
use crate::error::{AppError, BootError};
use crate::model::Model;
use crate::service::hooks::{Hooks, MainHandler, Services};
use crate::service::{Phase, ServiceContext};
use crate::storage::{CompareOp, Condition, ListQuery, Storage};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Decoded input of one call.
#[derive(Clone, Debug)]
pub enum CallInput {
    Create { body: Value },
    Update { id: String, body: Value },
    Patch { id: String, body: Value },
    Delete { id: String },
    Get { id: String },
    List { query: HashMap<String, String> },
}

impl CallInput {
    pub fn verb(&self) -> Verb {
        match self {
            CallInput::Create { .. } => Verb::Create,
            CallInput::Update { .. } => Verb::Update,
            CallInput::Patch { .. } => Verb::Patch,
            CallInput::Delete { .. } => Verb::Delete,
            CallInput::Get { .. } => Verb::Get,
            CallInput::List { .. } => Verb::List,
        }
    }
}

/// Result of one call, before it is wrapped in the response envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutput {
    Entity(Value),
    List { items: Vec<Value>, total: u64 },
    /// Response of a main handler with a declared result type.
    Custom(Value),
    Empty,
}

/// Type-erased pipeline, one per compiled resource.
#[async_trait]
pub(crate) trait Invoke: Send + Sync {
    async fn invoke(
        &self,
        storage: &dyn Storage,
        ctx: &mut ServiceContext,
        input: CallInput,
    ) -> Result<CallOutput, AppError>;
}

struct ActionPlan {
    spec: ActionSpec,
    /// Hooks are attached and the verb has its service enabled.
    run_hooks: bool,
    /// Only set when the service is enabled.
    main: Option<Arc<dyn MainHandler>>,
    /// Main handler takes something other than the entity.
    custom_request: bool,
    /// Main handler returns something other than the entity (or entity list).
    custom_response: bool,
}

/// Cached plan for one resource type.
pub(crate) struct Pipeline<M: Model> {
    collection: String,
    hooks: Option<Arc<dyn Hooks<M>>>,
    plans: HashMap<Verb, ActionPlan>,
}

impl<M: Model> Pipeline<M> {
    /// Resolve which phases run for every enabled verb. Main handlers must agree with the
    /// declared payload and result types.
    pub(crate) fn build(
        resource: &str,
        collection: &str,
        spec: &ResourceSpec,
        services: Option<Services<M>>,
    ) -> Result<Self, BootError> {
        let Services { hooks, mut mains } = services.unwrap_or_default();
        let entity = spec.entity();
        let entity_list = TypeRef::of::<Vec<M>>();
        let mut plans = HashMap::new();
        for verb in spec.enabled_verbs() {
            let action = spec.action(verb).clone();
            let main = mains.remove(&verb);
            let entity_response = if verb == Verb::List { entity_list } else { entity };
            // An undeclared list result means a page of entities.
            let response_type = if action.response_type == entity { entity_response } else { action.response_type };
            if let Some(handler) = &main {
                if handler.request_type() != action.request_type {
                    return Err(BootError::invalid_dsl(
                        resource,
                        format!(
                            "{} handler takes {} but payload is {}",
                            verb,
                            handler.request_type(),
                            action.request_type
                        ),
                    ));
                }
                if handler.response_type() != response_type {
                    return Err(BootError::invalid_dsl(
                        resource,
                        format!(
                            "{} handler returns {} but result is {}",
                            verb,
                            handler.response_type(),
                            response_type
                        ),
                    ));
                }
            }
            let main = main.filter(|_| action.service_hook_enabled);
            let plan = ActionPlan {
                run_hooks: action.service_hook_enabled && hooks.is_some(),
                custom_request: main.is_some() && action.request_type != entity,
                custom_response: main.is_some() && response_type != entity_response,
                main,
                spec: action,
            };
            tracing::debug!(
                resource = %resource,
                verb = %verb,
                hooks = plan.run_hooks,
                main = plan.main.is_some(),
                "action planned"
            );
            plans.insert(verb, plan);
        }
        for verb in mains.keys() {
            tracing::warn!(resource = %resource, verb = %verb, "main handler registered for a disabled verb");
        }
        Ok(Pipeline {
            collection: collection.to_string(),
            hooks,
            plans,
        })
    }

    fn plan(&self, verb: Verb) -> Result<&ActionPlan, AppError> {
        self.plans
            .get(&verb)
            .ok_or_else(|| AppError::NotFound(format!("{} is not enabled on {}", verb, self.collection)))
    }

    fn hooks_for(&self, plan: &ActionPlan) -> Option<&dyn Hooks<M>> {
        if plan.run_hooks {
            self.hooks.as_deref()
        } else {
            None
        }
    }

    async fn run_entity(
        &self,
        storage: &dyn Storage,
        ctx: &mut ServiceContext,
        verb: Verb,
        id: Option<String>,
        body: Option<Value>,
    ) -> Result<CallOutput, AppError> {
        let plan = self.plan(verb)?;
        let mut d = Driver::new(plan.spec.continue_on_error);
        let id = id.unwrap_or_default();

        d.enter(ctx, Phase::Before);
        let mut existing: Option<M> = None;
        let mut entity: Option<M> = if plan.custom_request {
            None
        } else {
            match verb {
                Verb::Create => Some(decode_body::<M>(body.clone().unwrap_or(Value::Null))?),
                Verb::Update => {
                    let mut e = decode_body::<M>(body.clone().unwrap_or(Value::Null))?;
                    e.base_mut().id = id.clone();
                    Some(e)
                }
                Verb::Patch | Verb::Delete => {
                    let stored = d.require(ctx, guarded(ctx, self.load(storage, ctx, &id)).await)?;
                    let current = if verb == Verb::Patch {
                        merge_partial::<M>(&stored, body.as_ref())?
                    } else {
                        stored.clone()
                    };
                    existing = Some(stored);
                    Some(current)
                }
                Verb::Get => {
                    let mut e = M::default();
                    e.base_mut().id = id.clone();
                    Some(e)
                }
                Verb::List => None,
            }
        };
        if let (Some(hooks), Some(e)) = (self.hooks_for(plan), entity.as_mut()) {
            let res = guarded(ctx, entity_hook(hooks, ctx, verb, Phase::Before, e)).await;
            d.settle(ctx, res)?;
        }

        d.enter(ctx, Phase::Main);
        let mut custom: Option<Value> = None;
        match &plan.main {
            Some(main) => {
                let input = if plan.custom_request {
                    custom_request(verb, &id, body.as_ref())
                } else {
                    encode(ctx, entity.as_ref())?
                };
                let res = guarded(ctx, main.call(ctx, input)).await;
                if let Some(out) = d.settle(ctx, res)? {
                    if plan.custom_response {
                        custom = Some(out);
                    } else {
                        entity = Some(decode_stored::<M>(ctx, out)?);
                    }
                }
            }
            None => {
                if let Some(e) = entity.take() {
                    let res = guarded(ctx, self.default_main(storage, ctx, verb, e.clone(), existing, body.as_ref())).await;
                    entity = Some(d.settle(ctx, res)?.unwrap_or(e));
                }
            }
        }

        d.enter(ctx, Phase::After);
        if !plan.custom_response {
            if let (Some(hooks), Some(e)) = (self.hooks_for(plan), entity.as_mut()) {
                let res = guarded(ctx, entity_hook(hooks, ctx, verb, Phase::After, e)).await;
                d.settle(ctx, res)?;
            }
        }

        let out = match (custom, entity) {
            (Some(v), _) => CallOutput::Custom(v),
            (None, _) if verb == Verb::Delete => CallOutput::Empty,
            (None, Some(e)) => CallOutput::Entity(encode(ctx, Some(&e))?),
            (None, None) => CallOutput::Empty,
        };
        d.finish(ctx, out)
    }

    /// Fetch and decode an entity. Entities owned by another tenant are `Forbidden`.
    async fn load(&self, storage: &dyn Storage, ctx: &ServiceContext, id: &str) -> Result<M, AppError> {
        let doc = storage.get(ctx, &self.collection, id).await?;
        let entity: M = decode_stored(ctx, doc)?;
        if let Some(scope) = ctx.tenant_scope() {
            if entity.base().tenant != scope {
                tracing::info!(
                    parent: &ctx.logger(),
                    id = %id,
                    owner = %entity.base().tenant,
                    "entity belongs to another tenant"
                );
                return Err(AppError::Forbidden(format!("{}/{}", self.collection, id)));
            }
        }
        Ok(entity)
    }

    /// Storage operation used when no main handler is attached. Returns the persisted entity.
    async fn default_main(
        &self,
        storage: &dyn Storage,
        ctx: &ServiceContext,
        verb: Verb,
        mut entity: M,
        existing: Option<M>,
        body: Option<&Value>,
    ) -> Result<M, AppError> {
        let now = Utc::now();
        match verb {
            Verb::Create => {
                entity.base_mut().stamp_created(ctx.tenant(), ctx.subject(), now);
                storage.create(ctx, &self.collection, encode(ctx, Some(&entity))?).await?;
                Ok(entity)
            }
            Verb::Update => {
                let id = entity.base().id.clone();
                let existing = self.load(storage, ctx, &id).await?;
                entity.base_mut().stamp_updated(existing.base(), ctx.subject(), now);
                storage.update(ctx, &self.collection, encode(ctx, Some(&entity))?).await?;
                Ok(entity)
            }
            Verb::Patch => {
                let id = entity.base().id.clone();
                let before = match existing {
                    Some(e) => e,
                    None => self.load(storage, ctx, &id).await?,
                };
                entity.base_mut().stamp_updated(before.base(), ctx.subject(), now);
                let partial = changed_fields(
                    &encode(ctx, Some(&before))?,
                    &encode(ctx, Some(&entity))?,
                    body,
                );
                storage.patch(ctx, &self.collection, &id, partial).await?;
                self.load(storage, ctx, &id).await
            }
            Verb::Delete => {
                storage.delete(ctx, &self.collection, &entity.base().id).await?;
                Ok(entity)
            }
            Verb::Get => self.load(storage, ctx, &entity.base().id).await,
            Verb::List => Err(AppError::internal(verb, ctx.phase(), "list has no single-entity operation")),
        }
    }

    async fn run_list(
        &self,
        storage: &dyn Storage,
        ctx: &mut ServiceContext,
        query: HashMap<String, String>,
    ) -> Result<CallOutput, AppError> {
        let plan = self.plan(Verb::List)?;
        let hooks = self.hooks_for(plan);
        let mut d = Driver::new(plan.spec.continue_on_error);
        let mut entities: Vec<M> = Vec::new();

        d.enter(ctx, Phase::Before);
        if let Some(h) = hooks {
            let res = guarded(ctx, h.list_before(ctx, &mut entities)).await;
            d.settle(ctx, res)?;
        }

        d.enter(ctx, Phase::Main);
        let mut total: u64 = 0;
        let mut custom: Option<Value> = None;
        match &plan.main {
            Some(main) => {
                let input = Value::Object(query.into_iter().map(|(k, v)| (k, Value::String(v))).collect());
                let res = guarded(ctx, main.call(ctx, input)).await;
                if let Some(out) = d.settle(ctx, res)? {
                    if plan.custom_response {
                        custom = Some(out);
                    } else {
                        entities = decode_stored(ctx, out)?;
                        total = entities.len() as u64;
                    }
                }
            }
            None => {
                let res = guarded(ctx, self.default_list(storage, ctx, hooks, &query)).await;
                if let Some((page, n)) = d.settle(ctx, res)? {
                    entities = page;
                    total = n;
                }
            }
        }

        d.enter(ctx, Phase::After);
        if let (Some(h), None) = (hooks, &custom) {
            let after = async {
                h.list_after(ctx, &mut entities).await?;
                let mut kept = Vec::with_capacity(entities.len());
                for e in entities.drain(..) {
                    if let Some(e) = h.filter(ctx, e).await {
                        kept.push(e);
                    }
                }
                Ok::<_, AppError>(kept)
            };
            let res = guarded(ctx, after).await;
            if let Some(kept) = d.settle(ctx, res)? {
                entities = kept;
            }
        }

        let out = match custom {
            Some(v) => CallOutput::Custom(v),
            None => CallOutput::List {
                items: entities
                    .iter()
                    .map(|e| encode(ctx, Some(e)))
                    .collect::<Result<_, _>>()?,
                total,
            },
        };
        d.finish(ctx, out)
    }

    async fn default_list(
        &self,
        storage: &dyn Storage,
        ctx: &ServiceContext,
        hooks: Option<&dyn Hooks<M>>,
        params: &HashMap<String, String>,
    ) -> Result<(Vec<M>, u64), AppError> {
        let raw = match hooks {
            Some(h) => h.filter_raw(ctx).await,
            None => None,
        };
        let mut query = ListQuery::from_params(params, raw.as_deref())?;
        if let Some(scope) = ctx.tenant_scope() {
            query.filter.conditions.retain(|c| c.field != TENANT_FIELD);
            query.filter.conditions.push(Condition {
                field: TENANT_FIELD.to_string(),
                op: CompareOp::Eq,
                value: scope.to_string(),
            });
        }
        let (docs, total) = storage.list(ctx, &self.collection, &query).await?;
        let entities = docs
            .into_iter()
            .map(|doc| decode_stored(ctx, doc))
            .collect::<Result<Vec<M>, _>>()?;
        Ok((entities, total))
    }
}

#[async_trait]
impl<M: Model> Invoke for Pipeline<M> {
    async fn invoke(
        &self,
        storage: &dyn Storage,
        ctx: &mut ServiceContext,
        input: CallInput,
    ) -> Result<CallOutput, AppError> {
        match input {
            CallInput::Create { body } => self.run_entity(storage, ctx, Verb::Create, None, Some(body)).await,
            CallInput::Update { id, body } => self.run_entity(storage, ctx, Verb::Update, Some(id), Some(body)).await,
            CallInput::Patch { id, body } => self.run_entity(storage, ctx, Verb::Patch, Some(id), Some(body)).await,
            CallInput::Delete { id } => self.run_entity(storage, ctx, Verb::Delete, Some(id), None).await,
            CallInput::Get { id } => self.run_entity(storage, ctx, Verb::Get, Some(id), None).await,
            CallInput::List { query } => self.run_list(storage, ctx, query).await,
        }
    }
}

async fn entity_hook<M: Model>(
    hooks: &dyn Hooks<M>,
    ctx: &ServiceContext,
    verb: Verb,
    phase: Phase,
    entity: &mut M,
) -> Result<(), AppError> {
    match (verb, phase) {
        (Verb::Create, Phase::Before) => hooks.create_before(ctx, entity).await,
        (Verb::Create, _) => hooks.create_after(ctx, entity).await,
        (Verb::Update, Phase::Before) => hooks.update_before(ctx, entity).await,
        (Verb::Update, _) => hooks.update_after(ctx, entity).await,
        (Verb::Patch, Phase::Before) => hooks.patch_before(ctx, entity).await,
        (Verb::Patch, _) => hooks.patch_after(ctx, entity).await,
        (Verb::Delete, Phase::Before) => hooks.delete_before(ctx, entity).await,
        (Verb::Delete, _) => hooks.delete_after(ctx, entity).await,
        (Verb::Get, Phase::Before) => hooks.get_before(ctx, entity).await,
        (Verb::Get, _) => hooks.get_after(ctx, entity).await,
        (Verb::List, _) => Ok(()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CallState {
    Init,
    Before,
    Main,
    After,
    Done,
    Failed,
}

/// Tracks the call state and, with `continue_on_error`, the first deferred failure.
struct Driver {
    state: CallState,
    continue_on_error: bool,
    deferred: Option<AppError>,
}

impl Driver {
    fn new(continue_on_error: bool) -> Self {
        Driver {
            state: CallState::Init,
            continue_on_error,
            deferred: None,
        }
    }

    fn transition(&mut self, ctx: &ServiceContext, next: CallState) {
        tracing::debug!(parent: &ctx.logger(), from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
    }

    fn enter(&mut self, ctx: &mut ServiceContext, phase: Phase) {
        ctx.set_phase(phase);
        let next = match phase {
            Phase::Before => CallState::Before,
            Phase::Main => CallState::Main,
            Phase::After => CallState::After,
        };
        self.transition(ctx, next);
    }

    /// `Ok(None)` means the failure was deferred and the call goes on.
    fn settle<T>(&mut self, ctx: &ServiceContext, res: Result<T, AppError>) -> Result<Option<T>, AppError> {
        match res {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(parent: &ctx.logger(), error = %e, "phase failed");
                if self.continue_on_error && !matches!(e, AppError::Canceled) {
                    self.deferred.get_or_insert(e);
                    Ok(None)
                } else {
                    self.transition(ctx, CallState::Failed);
                    Err(e)
                }
            }
        }
    }

    /// Failures here always stop the call.
    fn require<T>(&mut self, ctx: &ServiceContext, res: Result<T, AppError>) -> Result<T, AppError> {
        res.map_err(|e| {
            tracing::warn!(parent: &ctx.logger(), error = %e, "phase failed");
            self.transition(ctx, CallState::Failed);
            e
        })
    }

    fn finish<T>(mut self, ctx: &ServiceContext, out: T) -> Result<T, AppError> {
        match self.deferred.take() {
            Some(e) => {
                self.transition(ctx, CallState::Failed);
                Err(e)
            }
            None => {
                self.transition(ctx, CallState::Done);
                Ok(out)
            }
        }
    }
}

/// Run one phase future: stop early on cancellation or deadline, turn a panic into `Internal`.
async fn guarded<T, F>(ctx: &ServiceContext, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    if ctx.is_done() {
        return Err(AppError::Canceled);
    }
    tokio::select! {
        biased;
        _ = ctx.done() => Err(AppError::Canceled),
        caught = AssertUnwindSafe(fut).catch_unwind().instrument(ctx.logger()) => match caught {
            Ok(res) => res,
            Err(panic) => {
                let message = panic_message(&*panic);
                tracing::error!(parent: &ctx.logger(), panic = %message, "handler panicked");
                Err(AppError::internal(ctx.verb(), ctx.phase(), message))
            }
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

fn decode_body<T: DeserializeOwned>(body: Value) -> Result<T, AppError> {
    serde_json::from_value(body).map_err(|e| AppError::BadRequest(format!("invalid body: {}", e)))
}

fn decode_stored<T: DeserializeOwned>(ctx: &ServiceContext, doc: Value) -> Result<T, AppError> {
    serde_json::from_value(doc).map_err(|e| AppError::internal(ctx.verb(), ctx.phase(), format!("decode: {}", e)))
}

fn encode<T: Serialize>(ctx: &ServiceContext, value: Option<&T>) -> Result<Value, AppError> {
    match value {
        Some(v) => serde_json::to_value(v)
            .map_err(|e| AppError::internal(ctx.verb(), ctx.phase(), format!("encode: {}", e))),
        None => Ok(Value::Null),
    }
}

const TENANT_FIELD: &str = "tenant";

const IMMUTABLE_FIELDS: [&str; 4] = ["id", TENANT_FIELD, "created_at", "created_by"];

/// Stored entity with the body's top-level fields applied.
fn merge_partial<M: Model>(stored: &M, body: Option<&Value>) -> Result<M, AppError> {
    let mut doc = serde_json::to_value(stored)
        .map_err(|e| AppError::BadRequest(format!("invalid body: {}", e)))?;
    let fields = match body {
        Some(Value::Object(fields)) => fields,
        Some(Value::Null) | None => return Ok(stored.clone()),
        Some(_) => return Err(AppError::BadRequest("patch body must be a JSON object".into())),
    };
    if let Value::Object(target) = &mut doc {
        for (k, v) in fields {
            if !IMMUTABLE_FIELDS.contains(&k.as_str()) {
                target.insert(k.clone(), v.clone());
            }
        }
    }
    decode_body(doc)
}

/// Fields to send to storage for a patch: everything in the body plus whatever hooks or stamping changed.
fn changed_fields(before: &Value, after: &Value, body: Option<&Value>) -> Map<String, Value> {
    let mut partial = Map::new();
    let Value::Object(after) = after else {
        return partial;
    };
    for (k, v) in after {
        if IMMUTABLE_FIELDS.contains(&k.as_str()) {
            continue;
        }
        let in_body = body.and_then(|b| b.get(k)).is_some();
        if in_body || before.get(k) != Some(v) {
            partial.insert(k.clone(), v.clone());
        }
    }
    partial
}

/// Input for a main handler with a declared payload type.
fn custom_request(verb: Verb, id: &str, body: Option<&Value>) -> Value {
    match (verb, body) {
        (Verb::Create, Some(b)) => b.clone(),
        (_, Some(Value::Object(fields))) => {
            let mut fields = fields.clone();
            fields.entry("id").or_insert_with(|| Value::String(id.to_string()));
            Value::Object(fields)
        }
        (_, Some(other)) => other.clone(),
        (_, None) => serde_json::json!({ "id": id }),
    }
}
