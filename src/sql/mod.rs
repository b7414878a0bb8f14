//! Parameterized SQL for JSONB document tables.

mod builder;
pub use builder::*;
