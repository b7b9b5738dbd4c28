//! Tool name to handler mapping.
//!
//! ```text
//! ToolRegistry
//!     └── handlers: HashMap<&'static str, Arc<dyn ToolHandler>>
//!             ├── writeFile / readFile / listFiles
//!             ├── createDirectory / deleteFile
//!             ├── runCommand
//!             └── gitCommit / gitPush
//! ```
//!
//! New tools are added by implementing [`ToolHandler`] and registering
//! them; the dispatcher never changes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::commands::tools;
use crate::commands::validator::{CommandValidator, PathGuard};
use crate::error::ToolError;
use crate::transport::Params;

/// Everything a handler may consult while running.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub paths: PathGuard,
    pub commands: CommandValidator,
}

impl ToolContext {
    pub fn new(paths: PathGuard) -> Self {
        Self {
            paths,
            commands: CommandValidator::new(),
        }
    }

    /// Resolve an optional `workDir` parameter; absent or empty means the root.
    pub fn work_dir(&self, params: &Params) -> Result<PathBuf, ToolError> {
        match optional_str(params, "workDir")? {
            Some(dir) => Ok(self.paths.resolve(dir)?),
            None => Ok(self.paths.root().to_path_buf()),
        }
    }
}

/// One named local operation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Wire identifier, e.g. `writeFile`.
    fn name(&self) -> &'static str;

    /// Perform the operation. On success the returned map becomes
    /// `CommandResult.output`; on failure the error text becomes `error`.
    async fn execute(&self, ctx: &ToolContext, params: &Params) -> Result<Params, ToolError>;
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<&'static str, Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.names();
        names.sort_unstable();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the eight built-in tools.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        for handler in tools::builtin() {
            registry.register(handler);
        }
        registry
    }

    /// Add a handler, replacing any previous one with the same name.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name();
        if self.handlers.insert(name, handler).is_some() {
            warn!(tool = name, "replacing previously registered tool handler");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A string parameter that must be present (may be empty).
pub fn required_str<'a>(params: &'a Params, key: &'static str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or(ToolError::MissingParameter(key))
}

/// A string parameter that must be present and non-empty.
pub fn required_nonempty<'a>(params: &'a Params, key: &'static str) -> Result<&'a str, ToolError> {
    match required_str(params, key)? {
        "" => Err(ToolError::MissingParameter(key)),
        value => Ok(value),
    }
}

/// An optional string parameter; `null` and `""` count as absent, any other
/// non-string type is invalid.
pub fn optional_str<'a>(params: &'a Params, key: &'static str) -> Result<Option<&'a str>, ToolError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ToolError::MissingParameter(key)),
    }
}
