pub mod websocket;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Tool parameters / outputs: a JSON object of arbitrary values.
pub type Params = Map<String, Value>;

fn null_as_empty<'de, D>(deserializer: D) -> Result<Params, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Params>::deserialize(deserializer)?.unwrap_or_default())
}

/// Inbound request from the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(alias = "command_id")]
    pub id: String,
    pub tool_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub parameters: Params,
}

/// Outbound reply. `output` is always an object (empty on failure) and
/// `error` is present only when `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub output: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn success(id: impl Into<String>, output: Params) -> Self {
        Self {
            id: id.into(),
            success: true,
            output,
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            output: Params::new(),
            error: Some(error.into()),
        }
    }
}

/// Decode one inbound frame.
pub fn decode_command(frame: &[u8]) -> serde_json::Result<Command> {
    serde_json::from_slice(frame)
}

/// Encode one outbound frame.
pub fn encode_result(result: &CommandResult) -> serde_json::Result<String> {
    serde_json::to_string(result)
}
