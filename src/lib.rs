//! Scaffold SDK: declare resources in a small DSL, attach typed hooks, and serve
//! a uniform CRUD REST surface over pluggable storage.

pub mod authz;
pub mod diagnostics;
pub mod dsl;
pub mod error;
pub mod extractors;
pub mod logging;
pub mod model;
pub mod openapi;
pub mod registry;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod storage;

pub use authz::{Authorizer, Decision, Grant, PolicySet, SUPER_ADMIN};
pub use diagnostics::{Diagnostics, RuntimeStats, StatsSnapshot};
pub use dsl::{ActionDesigner, ResourceDesigner, Verb};
pub use error::{AppError, BootError};
pub use extractors::{Authenticator, HeaderAuthenticator, TenantId};
pub use logging::{init_logging, DEFAULT_LOG_DIRECTIVE};
pub use model::{Base, Model};
pub use registry::{Registry, Resource, Route};
pub use response::{success_many, success_one};
pub use routes::{app, common_routes, resource_routes};
pub use service::{
    CallInput, CallOutput, Creator, Deleter, Getter, Hooks, Lister, Patcher, Phase, Principal, ServiceContext,
    Services, Updater,
};
pub use settings::Settings;
pub use state::AppState;
pub use storage::{ensure_database_exists, ListQuery, MemoryStorage, PgStorage, Predicate, Storage, StorageError};
