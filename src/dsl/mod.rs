pub mod types;
pub mod designer;
pub mod validator;

pub use types::*;
pub use designer::{evaluate, ActionDesigner, Designed, ResourceDesigner};
pub use validator::validate_routes;
