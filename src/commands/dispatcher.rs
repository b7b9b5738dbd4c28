use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::commands::registry::{ToolContext, ToolRegistry};
use crate::error::ToolError;
use crate::security::AuditLogger;
use crate::transport::{decode_command, encode_result, Command, CommandResult};

/// Turns inbound frames into outbound frames. Performs no I/O itself.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
    audit: AuditLogger,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, ctx: ToolContext) -> Self {
        Self {
            registry: Arc::new(registry),
            ctx: Arc::new(ctx),
            audit: AuditLogger::new(),
        }
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Decode, execute and encode one frame.
    ///
    /// Returns `None` when nothing should be sent back: the frame was not a
    /// valid command, or the result could not be encoded. Neither case is an
    /// error for the caller.
    pub async fn dispatch(&self, frame: &[u8]) -> Option<String> {
        let command = match decode_command(frame) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, bytes = frame.len(), "failed to parse command");
                return None;
            }
        };

        let result = self.handle(command).await;
        match encode_result(&result) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!(command_id = %result.id, error = %e, "failed to encode result");
                None
            }
        }
    }

    /// Execute one decoded command. Always yields exactly one result whose
    /// `id` echoes the command's.
    pub async fn handle(&self, command: Command) -> CommandResult {
        let Command {
            id,
            tool_name,
            parameters,
        } = command;
        debug!(command_id = %id, tool = %tool_name, "→ executing");

        let Some(handler) = self.registry.get(&tool_name) else {
            self.audit.unknown_tool(&id, &tool_name);
            return CommandResult::failure(id, format!("Unknown tool: {tool_name}"));
        };

        // Run on its own task so a panicking handler surfaces as a JoinError
        // instead of taking the receive loop down with it. The task dies with
        // this future, which kills any child process it spawned.
        let ctx = Arc::clone(&self.ctx);
        let outcome = AbortOnDrop(tokio::spawn(async move {
            handler.execute(&ctx, &parameters).await
        }))
        .await;

        let result = match outcome {
            Ok(Ok(output)) => CommandResult::success(id, output),
            Ok(Err(e)) => {
                if let ToolError::Rejected(reason) = &e {
                    self.audit.command_rejected(&id, &tool_name, &reason.to_string());
                }
                if let Some(captured) = e.captured_output() {
                    debug!(command_id = %id, output = %captured, "captured output of failed tool");
                }
                CommandResult::failure(id, e.to_string())
            }
            Err(join_err) => {
                let msg = if join_err.is_panic() {
                    format!("tool '{tool_name}' panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    format!("tool '{tool_name}' was cancelled")
                };
                self.audit.handler_fault(&id, &tool_name, &msg);
                CommandResult::failure(id, ToolError::Internal(msg).to_string())
            }
        };

        self.audit.command_executed(&result.id, &tool_name, result.success);
        match &result.error {
            None => debug!(command_id = %result.id, tool = %tool_name, "✓ success"),
            Some(e) => debug!(command_id = %result.id, tool = %tool_name, error = %e, "✗ failed"),
        }
        result
    }
}

/// Aborts the wrapped task when dropped before completion.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
