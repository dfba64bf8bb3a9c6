//! Tools registered at startup.

use serde_json::json;

use crate::error::RelayResult;

use super::registry::ToolRegistry;
use super::schema::ToolDefinition;

pub const CONSOLE_HELLO_TOOL: &str = "mcp:tool.console_hello";

/// Logs a message to the browser console of a peer-controlled tab.
pub fn console_hello_definition() -> RelayResult<ToolDefinition> {
    ToolDefinition::from_value(json!({
        "name": CONSOLE_HELLO_TOOL,
        "description": "Execute console.log message in browser tab via a connected peer",
        "version": "1.0.0",
        "agent": "toolrelay",
        "parameters": {
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "default": "Hello World",
                    "description": "Message to log to browser console",
                    "minLength": 1,
                    "maxLength": 500
                },
                "targetTab": {
                    "type": "string",
                    "default": "active",
                    "description": "Target tab selector: active or all",
                    "enum": ["active", "all"]
                }
            },
            "required": ["message"],
            "additionalProperties": false
        },
        "returns": {
            "type": "object",
            "properties": {
                "success": { "type": "boolean" },
                "result": { "type": "string" },
                "timestamp": { "type": "string" },
                "metadata": {
                    "type": "object",
                    "properties": {
                        "tabId": { "type": "number" },
                        "url": { "type": "string" },
                        "executionTimeMs": { "type": "number" },
                        "peerId": { "type": "string" }
                    }
                },
                "error": { "type": "string" }
            }
        },
        "executionHandler": "websocket_extension_call"
    }))
}

pub fn register_builtin_tools(registry: &mut ToolRegistry) -> RelayResult<()> {
    registry.register(console_hello_definition()?)?;
    tracing::info!(tools = ?registry.tool_names(), "built-in tools registered");
    Ok(())
}
