pub mod dispatcher;
pub mod executor;
pub mod registry;
pub mod tools;
pub mod validator;

pub use dispatcher::Dispatcher;
pub use registry::{ToolContext, ToolHandler, ToolRegistry};
pub use validator::{CommandValidator, PathGuard};
