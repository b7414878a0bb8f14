//! Entity types managed by the framework.

mod base;
mod naming;

pub use base::{Base, Model};
pub use naming::{default_endpoint, default_param, pluralize, short_type_name, type_identity};
