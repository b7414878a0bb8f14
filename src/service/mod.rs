//! Service layer: call context, user hooks and the per-resource pipeline.

mod context;
mod hooks;
mod pipeline;

pub use context::{Phase, Principal, ServiceContext};
pub use hooks::{Creator, Deleter, Getter, Hooks, Lister, Patcher, Services, Updater};
pub use pipeline::{CallInput, CallOutput};
pub(crate) use pipeline::{Invoke, Pipeline};
