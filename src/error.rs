use std::path::PathBuf;

use thiserror::Error;

/// Reasons the validator refuses a path or shell command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("access denied: path outside working directory")]
    AccessDenied { path: PathBuf },

    #[error("dangerous command blocked: {pattern}")]
    DangerousCommand { pattern: String },

    #[error("cannot delete root or home directory")]
    ProtectedPath { path: PathBuf },

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Failure of a single tool invocation. The `Display` output is what the
/// controller sees in `CommandResult.error`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("missing or invalid '{0}' parameter")]
    MissingParameter(&'static str),

    #[error(transparent)]
    Rejected(#[from] ValidationError),

    #[error("failed to {action}: {source}")]
    Io {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed: {status}\nOutput: {output}")]
    CommandFailed {
        program: String,
        status: String,
        output: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn io(action: &'static str, source: std::io::Error) -> Self {
        Self::Io { action, source }
    }

    /// Subprocess output captured before the failure, if any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Errors raised while establishing the WebSocket link.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    #[error("failed to connect: {0}")]
    ConnectFailed(#[source] tokio_tungstenite::tungstenite::Error),
}
