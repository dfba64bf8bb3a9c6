use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::RelayError;
use crate::relay::{ProtocolHealth, ProtocolStatus, RequestContext, ToolCallResponse};
use crate::server::error::ApiError;
use crate::server::ServerState;
use crate::tools::{DiscoveryInfo, ExecutionStats};
use crate::utils::time::now_rfc3339;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsStatusResponse {
    pub protocol_status: ProtocolStatus,
    pub execution_stats: ExecutionStats,
    pub protocol_health: ProtocolHealth,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub execution_id: String,
    pub cancelled: bool,
    pub timestamp: String,
}

pub(crate) async fn list_tools(State(state): State<Arc<ServerState>>) -> Json<DiscoveryInfo> {
    let server_name = &state.context.config.server_name;
    Json(state.context.registry.read().await.discovery_info(server_name))
}

pub(crate) async fn tools_status(
    State(state): State<Arc<ServerState>>,
) -> Json<ToolsStatusResponse> {
    let correlator = &state.context.correlator;
    let protocol_status = correlator.status().await;
    let protocol_health = correlator.health().await;
    let execution_stats = state.context.registry.read().await.execution_stats();
    Json(ToolsStatusResponse {
        protocol_status,
        execution_stats,
        protocol_health,
        timestamp: now_rfc3339(),
    })
}

/// The body is the parameter object itself. An empty body means no parameters.
pub(crate) async fn call_tool(
    State(state): State<Arc<ServerState>>,
    Path(tool_name): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ToolCallResponse>, ApiError> {
    let parameters = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|error| {
            ApiError::from(RelayError::InvalidParameters(format!(
                "request body is not valid JSON: {error}"
            )))
        })?
    };

    let context = RequestContext {
        remote_addr: Some(remote.to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    };

    let response = state
        .context
        .correlator
        .execute(&tool_name, parameters, context)
        .await?;
    Ok(Json(response))
}

pub(crate) async fn cancel_execution(
    State(state): State<Arc<ServerState>>,
    Path(execution_id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = state.context.correlator.cancel(&execution_id).await;
    Json(CancelResponse {
        execution_id,
        cancelled,
        timestamp: now_rfc3339(),
    })
}
