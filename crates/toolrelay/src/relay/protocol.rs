//! Peer wire protocol: `{ "type": .., "data": {..} }` text envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, RelayResult};

/// Outbound: ask peers to run a tool.
pub const TOOL_INVOKE: &str = "tool_invoke";
/// Inbound: a peer's answer to a `tool_invoke`.
pub const TOOL_RESPONSE: &str = "tool_response";

/// Generic message envelope shared by every protocol layer on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> RelayResult<Self> {
        serde_json::from_str(text).map_err(|error| RelayError::MalformedPeerMessage(error.to_string()))
    }

    pub fn to_text(&self) -> RelayResult<String> {
        serde_json::to_string(self)
            .map_err(|error| RelayError::Internal(format!("failed to serialize envelope: {error}")))
    }
}

/// Payload of a `tool_invoke` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvoke {
    pub execution_id: String,
    pub tool_name: String,
    pub parameters: Value,
    pub timestamp: String,
}

impl ToolInvoke {
    pub fn into_envelope(self) -> RelayResult<Envelope> {
        let data = serde_json::to_value(self)
            .map_err(|error| RelayError::Internal(format!("failed to serialize invocation: {error}")))?;
        Ok(Envelope::new(TOOL_INVOKE, data))
    }
}

/// Payload of a `tool_response` envelope. Fields beyond the known ones are kept
/// as peer-supplied context.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub tab_id: Option<Value>,
    #[serde(default)]
    pub url: Option<Value>,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl ToolResponse {
    pub fn from_data(data: &Value) -> RelayResult<Self> {
        if !data.is_object() {
            return Err(RelayError::MalformedPeerMessage(
                "tool_response data must be an object".to_string(),
            ));
        }
        serde_json::from_value(data.clone())
            .map_err(|error| RelayError::MalformedPeerMessage(error.to_string()))
    }

    /// Error text if the peer signalled failure, either with an `error` field or
    /// with `success: false`.
    pub fn failure(&self) -> Option<String> {
        match &self.error {
            Some(Value::Null) | None => {}
            Some(Value::String(message)) => return Some(message.clone()),
            Some(other) => return Some(other.to_string()),
        }
        if self.success == Some(false) {
            return Some("peer reported failure".to_string());
        }
        None
    }

    /// Build the caller-facing result for this response.
    pub fn into_result(self, peer_id: &str, execution_time_ms: u64, timestamp: String) -> PeerResult {
        let error = self.failure();
        let result = match (self.result, &error) {
            (Some(result), _) if !result.is_null() => result,
            (_, Some(message)) => Value::String(format!("Error: {message}")),
            _ => Value::String("Execution completed".to_string()),
        };
        PeerResult {
            success: error.is_none(),
            result,
            error,
            timestamp,
            metadata: ExecutionMetadata {
                peer_id: peer_id.to_string(),
                execution_time_ms,
                tab_id: self.tab_id,
                url: self.url,
                context: self.context,
            },
        }
    }
}

/// Result delivered to the waiting caller once a peer response is correlated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerResult {
    pub success: bool,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
    pub metadata: ExecutionMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub peer_id: String,
    /// Time between dispatch and correlation.
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_parses_type_and_data() {
        let env = Envelope::parse(r#"{"type":"ping","data":{"n":1}}"#).expect("parse");
        assert_eq!(env.kind, "ping");
        assert_eq!(env.data["n"], 1);
    }

    #[test]
    fn envelope_without_data_defaults_to_null() {
        let env = Envelope::parse(r#"{"type":"ping"}"#).expect("parse");
        assert!(env.data.is_null());
    }

    #[test]
    fn garbage_is_malformed() {
        let err = Envelope::parse("not json").unwrap_err();
        assert!(matches!(err, RelayError::MalformedPeerMessage(_)));
        assert!(Envelope::parse(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn invoke_envelope_shape() {
        let env = ToolInvoke {
            execution_id: "exec-1".to_string(),
            tool_name: "mcp:tool.echo".to_string(),
            parameters: json!({ "message": "hi" }),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        }
        .into_envelope()
        .expect("envelope");
        let value: Value = serde_json::from_str(&env.to_text().expect("text")).expect("json");
        assert_eq!(value["type"], "tool_invoke");
        assert_eq!(value["data"]["executionId"], "exec-1");
        assert_eq!(value["data"]["toolName"], "mcp:tool.echo");
        assert_eq!(value["data"]["parameters"]["message"], "hi");
    }

    #[test]
    fn successful_response_keeps_context() {
        let response = ToolResponse::from_data(&json!({
            "executionId": "exec-1",
            "result": "done",
            "tabId": 7,
            "url": "https://example.com",
            "frame": "main"
        }))
        .expect("parse");
        let result = response.into_result("peer-1", 50, "now".to_string());
        assert!(result.success);
        assert_eq!(result.result, json!("done"));
        assert_eq!(result.metadata.tab_id, Some(json!(7)));
        assert_eq!(result.metadata.context.get("frame"), Some(&json!("main")));
        assert!(!result.metadata.context.contains_key("executionId"));
    }

    #[test]
    fn error_field_marks_failure() {
        let response = ToolResponse::from_data(&json!({
            "executionId": "exec-1",
            "error": "No active tab found"
        }))
        .expect("parse");
        let result = response.into_result("peer-1", 5, "now".to_string());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No active tab found"));
        assert_eq!(result.result, json!("Error: No active tab found"));
    }

    #[test]
    fn success_false_without_error_is_failure() {
        let response = ToolResponse::from_data(&json!({ "executionId": "e", "success": false }))
            .expect("parse");
        assert_eq!(response.failure().as_deref(), Some("peer reported failure"));
    }

    #[test]
    fn missing_result_defaults_to_completed() {
        let response = ToolResponse::from_data(&json!({ "executionId": "e" })).expect("parse");
        let result = response.into_result("peer-1", 1, "now".to_string());
        assert!(result.success);
        assert_eq!(result.result, json!("Execution completed"));
    }

    #[test]
    fn non_object_data_is_malformed() {
        assert!(ToolResponse::from_data(&json!("exec-1")).is_err());
        assert!(ToolResponse::from_data(&Value::Null).is_err());
    }
}
