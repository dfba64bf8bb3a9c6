//! Tool registry: definitions, call validation and execution statistics.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{RelayError, RelayResult};
use crate::utils::time::now_rfc3339;

use super::invocation::{ExecutionHistory, ExecutionRecord};
use super::schema::{ParameterValidator, ToolDefinition};

/// Number of records included in `execution_stats().recent_executions`.
pub const RECENT_EXECUTIONS: usize = 10;

pub const DISCOVERY_PROTOCOL: &str = "MCP";
pub const DISCOVERY_VERSION: &str = "1.0.0";

struct RegisteredTool {
    definition: ToolDefinition,
    validator: ParameterValidator,
    call_count: u64,
    last_called: Option<String>,
    registered_at: String,
}

/// A call that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedCall {
    pub tool: ToolDefinition,
    /// Normalized parameters with defaults applied.
    pub parameters: Map<String, Value>,
}

/// Discovery projection of a registered tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    #[serde(flatten)]
    pub definition: ToolDefinition,
    pub call_count: u64,
    pub last_called: Option<String>,
    pub registered_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryInfo {
    pub protocol: &'static str,
    pub version: &'static str,
    pub server: String,
    pub tool_count: usize,
    pub tools: Vec<ToolSummary>,
    pub capabilities: Vec<&'static str>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsage {
    pub name: String,
    pub call_count: u64,
    pub last_called: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub total_tools: usize,
    pub total_executions: u64,
    pub recent_executions: Vec<ExecutionRecord>,
    /// Tools ordered by descending call count.
    pub tool_usage: Vec<ToolUsage>,
    pub timestamp: String,
}

/// Registry holding tool definitions keyed by name, plus the execution history.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    history: ExecutionHistory,
}

impl ToolRegistry {
    /// Create an empty registry whose history holds at most `history_capacity` records.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            tools: HashMap::new(),
            history: ExecutionHistory::new(history_capacity),
        }
    }

    /// Register a tool, replacing (and resetting the counters of) any tool with the same name.
    pub fn register(&mut self, definition: ToolDefinition) -> RelayResult<()> {
        let validator = definition.validate()?;
        let name = definition.name.clone();
        tracing::info!(
            tool = %name,
            version = %definition.version,
            "tool registered"
        );
        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                validator,
                call_count: 0,
                last_called: None,
                registered_at: now_rfc3339(),
            },
        );
        Ok(())
    }

    /// Parse and register a definition given as raw JSON.
    pub fn register_value(&mut self, raw: Value) -> RelayResult<()> {
        self.register(ToolDefinition::from_value(raw)?)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|tool| &tool.definition)
    }

    /// Sorted list of registered tool names.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up a tool and validate raw parameters against its compiled schema.
    pub fn validate_call(&self, name: &str, raw_parameters: &Value) -> RelayResult<ValidatedCall> {
        let tool = self.tools.get(name).ok_or_else(|| RelayError::ToolNotFound {
            name: name.to_string(),
            available: self.tool_names(),
        })?;
        let parameters = tool.validator.validate(raw_parameters)?;
        Ok(ValidatedCall {
            tool: tool.definition.clone(),
            parameters,
        })
    }

    /// Record a finished execution. Counters are only bumped for tools that are
    /// still registered; the history entry is always appended.
    pub fn record_execution(
        &mut self,
        name: &str,
        parameters: Value,
        outcome: Result<Value, String>,
        duration_ms: u64,
    ) -> ExecutionRecord {
        if let Some(tool) = self.tools.get_mut(name) {
            tool.call_count += 1;
            tool.last_called = Some(now_rfc3339());
        }

        let record = ExecutionRecord::new(name, parameters, outcome, duration_ms);
        tracing::debug!(
            tool = %name,
            success = record.is_success(),
            duration_ms,
            "tool execution recorded"
        );
        self.history.push(record.clone());
        record
    }

    pub fn list_tools(&self) -> Vec<ToolSummary> {
        let mut tools: Vec<ToolSummary> = self
            .tools
            .values()
            .map(|tool| ToolSummary {
                definition: tool.definition.clone(),
                call_count: tool.call_count,
                last_called: tool.last_called.clone(),
                registered_at: tool.registered_at.clone(),
            })
            .collect();
        tools.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        tools
    }

    pub fn discovery_info(&self, server: &str) -> DiscoveryInfo {
        DiscoveryInfo {
            protocol: DISCOVERY_PROTOCOL,
            version: DISCOVERY_VERSION,
            server: server.to_string(),
            tool_count: self.tools.len(),
            tools: self.list_tools(),
            capabilities: vec![
                "tool_registry",
                "tool_discovery",
                "tool_validation",
                "execution_tracking",
                "websocket_peer_relay",
            ],
            timestamp: now_rfc3339(),
        }
    }

    pub fn execution_stats(&self) -> ExecutionStats {
        let mut tool_usage: Vec<ToolUsage> = self
            .tools
            .values()
            .map(|tool| ToolUsage {
                name: tool.definition.name.clone(),
                call_count: tool.call_count,
                last_called: tool.last_called.clone(),
            })
            .collect();
        tool_usage.sort_by(|a, b| {
            b.call_count
                .cmp(&a.call_count)
                .then_with(|| a.name.cmp(&b.name))
        });

        ExecutionStats {
            total_tools: self.tools.len(),
            total_executions: tool_usage.iter().map(|usage| usage.call_count).sum(),
            recent_executions: self.history.recent(RECENT_EXECUTIONS),
            tool_usage,
            timestamp: now_rfc3339(),
        }
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_definition(name: &str) -> Value {
        json!({
            "name": name,
            "description": "Echo a message back to the caller",
            "version": "1.0.0",
            "parameters": {
                "type": "object",
                "properties": {
                    "message": { "type": "string", "default": "hi" }
                },
                "required": ["message"]
            },
            "returns": { "type": "object" },
            "executionHandler": "websocket_extension_call"
        })
    }

    fn registry_with(names: &[&str]) -> ToolRegistry {
        let mut reg = ToolRegistry::new(100);
        for name in names {
            reg.register_value(echo_definition(name)).expect("register");
        }
        reg
    }

    #[test]
    fn empty_registry() {
        let reg = ToolRegistry::new(100);
        assert!(reg.is_empty());
        assert!(reg.get("mcp:tool.echo").is_none());
        assert!(reg.tool_names().is_empty());
    }

    #[test]
    fn register_and_lookup() {
        let reg = registry_with(&["mcp:tool.echo"]);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("mcp:tool.echo").map(|t| t.version.as_str()), Some("1.0.0"));
    }

    #[test]
    fn invalid_definition_is_not_stored() {
        let mut reg = ToolRegistry::new(100);
        let err = reg.register_value(echo_definition("echo")).unwrap_err();
        assert!(matches!(err, RelayError::InvalidDefinition(_)));
        assert!(reg.is_empty());
    }

    #[test]
    fn echo_call_with_empty_parameters_gets_default() {
        let reg = registry_with(&["mcp:tool.echo"]);
        let call = reg.validate_call("mcp:tool.echo", &json!({})).expect("valid");
        assert_eq!(Value::Object(call.parameters), json!({ "message": "hi" }));
        assert_eq!(call.tool.name, "mcp:tool.echo");
    }

    #[test]
    fn unknown_tool_lists_available_names() {
        let reg = registry_with(&["mcp:tool.b", "mcp:tool.a"]);
        match reg.validate_call("ghost", &json!({})) {
            Err(RelayError::ToolNotFound { name, available }) => {
                assert_eq!(name, "ghost");
                assert_eq!(available, vec!["mcp:tool.a", "mcp:tool.b"]);
            }
            other => panic!("expected ToolNotFound, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tool_on_empty_registry_lists_nothing() {
        let reg = ToolRegistry::new(100);
        match reg.validate_call("ghost", &json!({})) {
            Err(RelayError::ToolNotFound { available, .. }) => assert!(available.is_empty()),
            other => panic!("expected ToolNotFound, got {other:?}"),
        }
    }

    #[test]
    fn invalid_parameters_surface_first_violation() {
        let reg = registry_with(&["mcp:tool.echo"]);
        let err = reg
            .validate_call("mcp:tool.echo", &json!({ "message": 5 }))
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidParameters(ref msg) if msg.contains("message")));
    }

    #[test]
    fn record_execution_updates_counters_and_history() {
        let mut reg = registry_with(&["mcp:tool.echo"]);
        reg.record_execution("mcp:tool.echo", json!({}), Ok(json!("done")), 12);
        reg.record_execution("mcp:tool.echo", json!({}), Err("boom".to_string()), 3);

        let tools = reg.list_tools();
        assert_eq!(tools[0].call_count, 2);
        assert!(tools[0].last_called.is_some());
        assert_eq!(reg.history().len(), 2);
    }

    #[test]
    fn record_for_unregistered_tool_only_appends_history() {
        let mut reg = registry_with(&["mcp:tool.echo"]);
        let record = reg.record_execution("ghost", json!({}), Err("Tool not found".to_string()), 0);
        assert_eq!(record.tool_name, "ghost");
        assert_eq!(reg.history().len(), 1);
        assert_eq!(reg.execution_stats().total_executions, 0);
    }

    #[test]
    fn history_respects_configured_capacity() {
        let mut reg = ToolRegistry::new(2);
        reg.register_value(echo_definition("mcp:tool.echo")).expect("register");
        for ms in 0..5 {
            reg.record_execution("mcp:tool.echo", json!({}), Ok(json!(ms)), ms);
        }
        assert_eq!(reg.history().len(), 2);
        assert_eq!(reg.execution_stats().total_executions, 5);
    }

    #[test]
    fn stats_rank_tools_by_usage() {
        let mut reg = registry_with(&["mcp:tool.a", "mcp:tool.b", "mcp:tool.c"]);
        for _ in 0..3 {
            reg.record_execution("mcp:tool.b", json!({}), Ok(json!(null)), 1);
        }
        reg.record_execution("mcp:tool.c", json!({}), Ok(json!(null)), 1);

        let stats = reg.execution_stats();
        let ranking: Vec<&str> = stats.tool_usage.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(ranking, vec!["mcp:tool.b", "mcp:tool.c", "mcp:tool.a"]);
        assert_eq!(stats.total_executions, 4);
        assert_eq!(stats.total_tools, 3);
        assert_eq!(stats.recent_executions.len(), 4);
    }

    #[test]
    fn re_registration_resets_counters() {
        let mut reg = registry_with(&["mcp:tool.echo"]);
        reg.record_execution("mcp:tool.echo", json!({}), Ok(json!(null)), 1);
        reg.register_value(echo_definition("mcp:tool.echo")).expect("register");
        assert_eq!(reg.list_tools()[0].call_count, 0);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn discovery_info_projects_tools() {
        let reg = registry_with(&["mcp:tool.echo"]);
        let info = serde_json::to_value(reg.discovery_info("toolrelay")).expect("serialize");
        assert_eq!(info["toolCount"], 1);
        assert_eq!(info["protocol"], "MCP");
        assert_eq!(info["server"], "toolrelay");
        assert_eq!(info["tools"][0]["name"], "mcp:tool.echo");
        assert_eq!(info["tools"][0]["callCount"], 0);
        assert_eq!(info["tools"][0]["parameters"]["type"], "object");
    }
}
