use tracing::{error, info, warn};

/// Structured audit events on the `audit` tracing target.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    /// `endpoint` must be the URL without credentials.
    pub fn connection_opened(&self, endpoint: &str) {
        info!(target: "audit", event = "connection_opened", endpoint);
    }

    pub fn connection_closed(&self, endpoint: &str, outcome: &str) {
        info!(target: "audit", event = "connection_closed", endpoint, outcome);
    }

    pub fn command_executed(&self, command_id: &str, tool: &str, success: bool) {
        info!(target: "audit", event = "command_executed", command_id, tool, success);
    }

    pub fn command_rejected(&self, command_id: &str, tool: &str, reason: &str) {
        warn!(target: "audit", event = "command_rejected", command_id, tool, reason);
    }

    pub fn unknown_tool(&self, command_id: &str, tool: &str) {
        warn!(target: "audit", event = "unknown_tool", command_id, tool);
    }

    pub fn handler_fault(&self, command_id: &str, tool: &str, error_msg: &str) {
        error!(target: "audit", event = "handler_fault", command_id, tool, error = error_msg);
    }
}
