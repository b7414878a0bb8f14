//! User-provided service code: entity hooks around each verb and optional main handlers.

use crate::dsl::{TypeRef, Verb};
use crate::error::AppError;
use crate::model::Model;
use crate::service::ServiceContext;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Before/after hooks for every verb. Override only what the resource needs; the defaults do nothing.
///
/// Before hooks see the ready-to-persist entity, after hooks the persisted one. List hooks get the whole
/// page so they can filter or rewrite it in place.
#[async_trait]
pub trait Hooks<M: Model>: Send + Sync + 'static {
    async fn create_before(&self, _ctx: &ServiceContext, _entity: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn create_after(&self, _ctx: &ServiceContext, _entity: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn delete_before(&self, _ctx: &ServiceContext, _entity: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn delete_after(&self, _ctx: &ServiceContext, _entity: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn update_before(&self, _ctx: &ServiceContext, _entity: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn update_after(&self, _ctx: &ServiceContext, _entity: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn patch_before(&self, _ctx: &ServiceContext, _entity: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn patch_after(&self, _ctx: &ServiceContext, _entity: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn get_before(&self, _ctx: &ServiceContext, _entity: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn get_after(&self, _ctx: &ServiceContext, _entity: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn list_before(&self, _ctx: &ServiceContext, _entities: &mut Vec<M>) -> Result<(), AppError> {
        Ok(())
    }

    async fn list_after(&self, _ctx: &ServiceContext, _entities: &mut Vec<M>) -> Result<(), AppError> {
        Ok(())
    }

    /// Called per listed entity while building the response. `None` drops it.
    async fn filter(&self, _ctx: &ServiceContext, entity: M) -> Option<M> {
        Some(entity)
    }

    /// Storage-side predicate for list calls, e.g. `owner = 'alice'`.
    async fn filter_raw(&self, _ctx: &ServiceContext) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait Creator<M: Model>: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn create(&self, ctx: &ServiceContext, req: Self::Request) -> Result<Self::Response, AppError>;
}

#[async_trait]
pub trait Deleter<M: Model>: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn delete(&self, ctx: &ServiceContext, req: Self::Request) -> Result<Self::Response, AppError>;
}

#[async_trait]
pub trait Updater<M: Model>: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn update(&self, ctx: &ServiceContext, req: Self::Request) -> Result<Self::Response, AppError>;
}

#[async_trait]
pub trait Patcher<M: Model>: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn patch(&self, ctx: &ServiceContext, req: Self::Request) -> Result<Self::Response, AppError>;
}

/// List handler. The request is decoded from the query string (all values are strings).
#[async_trait]
pub trait Lister<M: Model>: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn list(&self, ctx: &ServiceContext, req: Self::Request) -> Result<Self::Response, AppError>;
}

#[async_trait]
pub trait Getter<M: Model>: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn get(&self, ctx: &ServiceContext, req: Self::Request) -> Result<Self::Response, AppError>;
}

/// Main handler with request and response erased to JSON.
#[async_trait]
pub(crate) trait MainHandler: Send + Sync {
    fn request_type(&self) -> TypeRef;

    fn response_type(&self) -> TypeRef;

    async fn call(&self, ctx: &ServiceContext, payload: Value) -> Result<Value, AppError>;
}

macro_rules! erased_main {
    ($adapter:ident, $capability:ident, $method:ident) => {
        struct $adapter<M, S> {
            inner: S,
            _model: PhantomData<fn() -> M>,
        }

        #[async_trait]
        impl<M: Model, S: $capability<M>> MainHandler for $adapter<M, S> {
            fn request_type(&self) -> TypeRef {
                TypeRef::of::<S::Request>()
            }

            fn response_type(&self) -> TypeRef {
                TypeRef::of::<S::Response>()
            }

            async fn call(&self, ctx: &ServiceContext, payload: Value) -> Result<Value, AppError> {
                let req: S::Request = serde_json::from_value(payload)
                    .map_err(|e| AppError::BadRequest(format!("invalid {} payload: {}", ctx.verb(), e)))?;
                let rsp = self.inner.$method(ctx, req).await?;
                serde_json::to_value(rsp)
                    .map_err(|e| AppError::internal(ctx.verb(), ctx.phase(), format!("encode response: {}", e)))
            }
        }
    };
}

erased_main!(CreatorHandler, Creator, create);
erased_main!(DeleterHandler, Deleter, delete);
erased_main!(UpdaterHandler, Updater, update);
erased_main!(PatcherHandler, Patcher, patch);
erased_main!(ListerHandler, Lister, list);
erased_main!(GetterHandler, Getter, get);

/// Hook set and main handlers attached to one resource type.
pub struct Services<M: Model> {
    pub(crate) hooks: Option<Arc<dyn Hooks<M>>>,
    pub(crate) mains: HashMap<Verb, Arc<dyn MainHandler>>,
}

impl<M: Model> Default for Services<M> {
    fn default() -> Self {
        Services {
            hooks: None,
            mains: HashMap::new(),
        }
    }
}

impl<M: Model> Services<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hooks(mut self, hooks: impl Hooks<M>) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    pub fn creator<S: Creator<M>>(self, inner: S) -> Self {
        self.main(Verb::Create, CreatorHandler { inner, _model: PhantomData })
    }

    pub fn deleter<S: Deleter<M>>(self, inner: S) -> Self {
        self.main(Verb::Delete, DeleterHandler { inner, _model: PhantomData })
    }

    pub fn updater<S: Updater<M>>(self, inner: S) -> Self {
        self.main(Verb::Update, UpdaterHandler { inner, _model: PhantomData })
    }

    pub fn patcher<S: Patcher<M>>(self, inner: S) -> Self {
        self.main(Verb::Patch, PatcherHandler { inner, _model: PhantomData })
    }

    pub fn lister<S: Lister<M>>(self, inner: S) -> Self {
        self.main(Verb::List, ListerHandler { inner, _model: PhantomData })
    }

    pub fn getter<S: Getter<M>>(self, inner: S) -> Self {
        self.main(Verb::Get, GetterHandler { inner, _model: PhantomData })
    }

    fn main(mut self, verb: Verb, handler: impl MainHandler + 'static) -> Self {
        self.mains.insert(verb, Arc::new(handler));
        self
    }

    pub fn has_hooks(&self) -> bool {
        self.hooks.is_some()
    }

    pub fn has_main(&self, verb: Verb) -> bool {
        self.mains.contains_key(&verb)
    }
}
