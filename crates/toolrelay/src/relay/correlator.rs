//! Execution correlator: dispatches validated calls to peers and matches the
//! peers' asynchronous responses back to the waiting callers.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{RelayError, RelayResult};
use crate::peers::Membership;
use crate::tools::{ExecutionHandler, ToolRegistry};
use crate::utils::time::{elapsed_ms, now_rfc3339};

use super::pending::{Completion, PendingExecution, PendingSummary, PendingTable};
use super::protocol::{Envelope, ExecutionMetadata, PeerResult, ToolInvoke, ToolResponse, TOOL_RESPONSE};

/// What the correlator did with an inbound peer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMessageOutcome {
    /// Not a tool response; another protocol layer owns it.
    NotHandled,
    /// Matched a pending execution and completed it.
    Resolved,
    /// A tool response that could not be used (malformed or without an id).
    Invalid,
    /// A tool response for an unknown, finished or expired execution.
    Ignored,
}

impl PeerMessageOutcome {
    pub fn is_handled(self) -> bool {
        self != PeerMessageOutcome::NotHandled
    }
}

/// Who is calling, for logging.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
}

/// Successful `execute()` outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResponse {
    pub success: bool,
    pub result: Value,
    pub timestamp: String,
    pub execution_id: String,
    pub execution_time_ms: u64,
    pub record_id: String,
    pub tool_name: String,
    pub metadata: ExecutionMetadata,
}

/// Failed `execute()` outcome.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    pub error: RelayError,
    pub execution_id: String,
    pub execution_time_ms: u64,
    /// Extra guidance for the caller, e.g. `availableTools` or peer metadata.
    pub details: Option<Value>,
}

/// An execution that has been dispatched and is waiting for its completion.
pub struct PendingDispatch {
    execution_id: String,
    receiver: oneshot::Receiver<Completion>,
}

impl PendingDispatch {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Wait for the single completion of this execution.
    pub async fn wait(self) -> RelayResult<PeerResult> {
        self.receiver.await.map_err(|_| {
            RelayError::Internal(format!(
                "execution {} was dropped without completion",
                self.execution_id
            ))
        })?
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolStatus {
    pub pending_executions: usize,
    pub connected_peers: usize,
    pub execution_timeout_ms: u64,
    pub pending: Vec<PendingSummary>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolHealth {
    pub status: &'static str,
    pub connected_peers: usize,
    pub pending_executions: usize,
    pub registered_tools: usize,
    pub execution_timeout_ms: u64,
    pub capabilities: Vec<&'static str>,
    pub timestamp: String,
}

pub struct ExecutionCorrelator {
    registry: Arc<RwLock<ToolRegistry>>,
    membership: Membership,
    pending: Arc<Mutex<PendingTable>>,
    timeout: Duration,
}

impl ExecutionCorrelator {
    pub fn new(registry: Arc<RwLock<ToolRegistry>>, membership: Membership, timeout: Duration) -> Self {
        Self {
            registry,
            membership,
            pending: Arc::new(Mutex::new(PendingTable::default())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Validate, dispatch and wait for a tool call, then record the outcome.
    ///
    /// The work runs on its own task, so the outcome is recorded even if the
    /// caller stops waiting.
    pub async fn execute(
        self: &Arc<Self>,
        tool_name: &str,
        parameters: Value,
        context: RequestContext,
    ) -> Result<ToolCallResponse, ExecutionFailure> {
        let execution_id = Uuid::new_v4().to_string();
        let correlator = Arc::clone(self);
        let task_tool = tool_name.to_string();
        let task_id = execution_id.clone();
        let task = tokio::spawn(async move {
            correlator
                .execute_and_record(&task_tool, parameters, context, task_id)
                .await
        });
        task.await.unwrap_or_else(|error| {
            Err(ExecutionFailure {
                error: RelayError::Internal(format!("execution task failed: {error}")),
                execution_id,
                execution_time_ms: 0,
                details: None,
            })
        })
    }

    #[tracing::instrument(skip_all, fields(tool = %tool_name))]
    async fn execute_and_record(
        &self,
        tool_name: &str,
        parameters: Value,
        context: RequestContext,
        execution_id: String,
    ) -> Result<ToolCallResponse, ExecutionFailure> {
        let started = Instant::now();
        tracing::info!(
            execution_id = %execution_id,
            remote_addr = ?context.remote_addr,
            user_agent = ?context.user_agent,
            "tool execution started"
        );

        let outcome = self.run(tool_name, &parameters, &execution_id).await;
        let execution_time_ms = elapsed_ms(started);

        match outcome {
            Ok((peer_result, validated)) => {
                let recorded = if peer_result.success {
                    Ok(peer_result.result.clone())
                } else {
                    Err(peer_result
                        .error
                        .clone()
                        .unwrap_or_else(|| "peer reported failure".to_string()))
                };
                let record = self.registry.write().await.record_execution(
                    tool_name,
                    Value::Object(validated),
                    recorded,
                    execution_time_ms,
                );

                if let Some(message) = peer_result.error.clone() {
                    tracing::warn!(
                        execution_id = %execution_id,
                        error = %message,
                        execution_time_ms,
                        "peer reported tool failure"
                    );
                    let details = serde_json::to_value(&peer_result.metadata)
                        .ok()
                        .map(|metadata| json!({ "metadata": metadata, "recordId": record.id }));
                    return Err(ExecutionFailure {
                        error: RelayError::PeerReportedError(message),
                        execution_id,
                        execution_time_ms,
                        details,
                    });
                }

                tracing::info!(
                    execution_id = %execution_id,
                    execution_time_ms,
                    "tool execution completed"
                );
                Ok(ToolCallResponse {
                    success: true,
                    result: peer_result.result,
                    timestamp: peer_result.timestamp,
                    execution_id,
                    execution_time_ms,
                    record_id: record.id,
                    tool_name: tool_name.to_string(),
                    metadata: peer_result.metadata,
                })
            }
            Err(error) => {
                tracing::warn!(
                    execution_id = %execution_id,
                    error = %error,
                    execution_time_ms,
                    "tool execution failed"
                );
                self.registry.write().await.record_execution(
                    tool_name,
                    parameters,
                    Err(error.to_string()),
                    execution_time_ms,
                );
                let details = match &error {
                    RelayError::ToolNotFound { available, .. } => {
                        Some(json!({ "availableTools": available }))
                    }
                    _ => None,
                };
                Err(ExecutionFailure {
                    error,
                    execution_id,
                    execution_time_ms,
                    details,
                })
            }
        }
    }

    async fn run(
        &self,
        tool_name: &str,
        parameters: &Value,
        execution_id: &str,
    ) -> RelayResult<(PeerResult, Map<String, Value>)> {
        let call = self.registry.read().await.validate_call(tool_name, parameters)?;
        match call.tool.execution_handler {
            ExecutionHandler::PeerRelay => {
                let dispatch = self
                    .dispatch_with_id(execution_id.to_string(), tool_name, call.parameters.clone())
                    .await?;
                let result = dispatch.wait().await?;
                Ok((result, call.parameters))
            }
        }
    }

    /// Dispatch an already-validated call under a fresh execution id.
    pub async fn dispatch(
        &self,
        tool_name: &str,
        parameters: Map<String, Value>,
    ) -> RelayResult<PendingDispatch> {
        self.dispatch_with_id(Uuid::new_v4().to_string(), tool_name, parameters)
            .await
    }

    /// Insert the pending entry, arm its timer and broadcast to the membership
    /// snapshot. Dispatch failures complete the entry immediately, so the
    /// returned handle resolves at once with `NoPeersConnected` or `NoActivePeers`.
    async fn dispatch_with_id(
        &self,
        execution_id: String,
        tool_name: &str,
        parameters: Map<String, Value>,
    ) -> RelayResult<PendingDispatch> {
        let (sender, receiver) = oneshot::channel();
        let timestamp = now_rfc3339();
        {
            let mut table = self.pending.lock().await;
            let entry = table.insert(PendingExecution::new(
                execution_id.clone(),
                tool_name.to_string(),
                timestamp.clone(),
                sender,
            ))?;
            // Spawned under the table lock so the timer cannot observe the
            // table before its entry is armed.
            entry.arm(self.arm_timeout(execution_id.clone()));
        }
        let dispatch = PendingDispatch {
            execution_id: execution_id.clone(),
            receiver,
        };

        let peers = self.membership.snapshot().await;
        if peers.is_empty() {
            tracing::warn!(execution_id = %execution_id, "no peers connected");
            self.settle(&execution_id, Err(RelayError::NoPeersConnected))
                .await;
            return Ok(dispatch);
        }

        let invoke = ToolInvoke {
            execution_id: execution_id.clone(),
            tool_name: tool_name.to_string(),
            parameters: Value::Object(parameters),
            timestamp,
        };
        let text = match invoke.into_envelope().and_then(|envelope| envelope.to_text()) {
            Ok(text) => text,
            Err(error) => {
                self.settle(&execution_id, Err(error)).await;
                return Ok(dispatch);
            }
        };

        let mut sent = 0usize;
        for peer in &peers {
            match peer.send(text.clone()) {
                Ok(()) => sent += 1,
                Err(error) => {
                    tracing::warn!(
                        execution_id = %execution_id,
                        peer_id = %peer.id(),
                        error = %error,
                        "failed to send tool invocation to peer"
                    );
                }
            }
        }

        if sent == 0 {
            self.settle(&execution_id, Err(RelayError::NoActivePeers))
                .await;
        } else {
            tracing::info!(
                execution_id = %execution_id,
                sent,
                total = peers.len(),
                "tool invocation broadcast to peers"
            );
        }
        Ok(dispatch)
    }

    fn arm_timeout(&self, execution_id: String) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let timeout = self.timeout;
        let timeout_ms = self.timeout_ms();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let entry = pending.lock().await.take(&execution_id);
            if let Some(mut entry) = entry {
                entry.disarm();
                tracing::warn!(
                    execution_id = %execution_id,
                    tool = %entry.tool_name,
                    timeout_ms,
                    "tool execution timed out"
                );
                entry.complete(Err(RelayError::ExecutionTimeout { timeout_ms }));
            }
        })
    }

    /// Remove and complete an entry. Returns false if it was already gone.
    async fn settle(&self, execution_id: &str, outcome: Completion) -> bool {
        let entry = self.pending.lock().await.take(execution_id);
        match entry {
            Some(entry) => {
                entry.complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Handle an inbound message from any peer. Only `tool_response` messages are
    /// claimed; duplicates and stale ids are logged and ignored.
    pub async fn on_peer_response(&self, peer_id: &str, message: &Envelope) -> PeerMessageOutcome {
        if message.kind != TOOL_RESPONSE {
            return PeerMessageOutcome::NotHandled;
        }

        let response = match ToolResponse::from_data(&message.data) {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(peer_id = %peer_id, error = %error, "dropping tool response");
                return PeerMessageOutcome::Invalid;
            }
        };

        let Some(execution_id) = response.execution_id.clone() else {
            tracing::warn!(peer_id = %peer_id, "tool response missing executionId");
            return PeerMessageOutcome::Invalid;
        };

        let entry = self.pending.lock().await.take(&execution_id);
        let Some(entry) = entry else {
            tracing::warn!(
                peer_id = %peer_id,
                execution_id = %execution_id,
                "tool response for unknown or finished execution"
            );
            return PeerMessageOutcome::Ignored;
        };

        let execution_time_ms = elapsed_ms(entry.dispatched_at);
        let result = response.into_result(peer_id, execution_time_ms, now_rfc3339());
        tracing::info!(
            peer_id = %peer_id,
            execution_id = %execution_id,
            tool = %entry.tool_name,
            success = result.success,
            execution_time_ms,
            "tool response correlated"
        );
        entry.complete(Ok(result));
        PeerMessageOutcome::Resolved
    }

    /// Fail an in-flight execution as if its caller had timed out.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let cancelled = self
            .settle(execution_id, Err(RelayError::ExecutionCancelled))
            .await;
        if cancelled {
            tracing::info!(execution_id = %execution_id, "tool execution cancelled");
        }
        cancelled
    }

    /// Safety-net sweep: expire entries older than the timeout. Returns the
    /// number cleaned.
    pub async fn cleanup_expired(&self) -> usize {
        let expired = self.pending.lock().await.take_expired(self.timeout);
        let count = expired.len();
        let timeout_ms = self.timeout_ms();
        for entry in expired {
            tracing::warn!(
                execution_id = %entry.execution_id,
                tool = %entry.tool_name,
                "execution expired during cleanup"
            );
            entry.complete(Err(RelayError::ExecutionTimeout { timeout_ms }));
        }
        if count > 0 {
            tracing::info!(count, "cleaned up expired executions");
        }
        count
    }

    /// Run `cleanup_expired` every `interval` until the returned task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let correlator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                correlator.cleanup_expired().await;
            }
        })
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_pending(&self, execution_id: &str) -> bool {
        self.pending.lock().await.contains(execution_id)
    }

    pub async fn status(&self) -> ProtocolStatus {
        let (pending_executions, pending) = {
            let table = self.pending.lock().await;
            (table.len(), table.summaries())
        };
        ProtocolStatus {
            pending_executions,
            connected_peers: self.membership.len().await,
            execution_timeout_ms: self.timeout_ms(),
            pending,
            timestamp: now_rfc3339(),
        }
    }

    pub async fn health(&self) -> ProtocolHealth {
        ProtocolHealth {
            status: "healthy",
            connected_peers: self.membership.len().await,
            pending_executions: self.pending_count().await,
            registered_tools: self.registry.read().await.len(),
            execution_timeout_ms: self.timeout_ms(),
            capabilities: vec![
                "websocket_peer_communication",
                "tool_execution_coordination",
                "timeout_management",
                "execution_tracking",
            ],
            timestamp: now_rfc3339(),
        }
    }

    #[cfg(test)]
    pub(crate) async fn insert_stale(&self, execution_id: &str, age: Duration) -> PendingDispatch {
        let (sender, receiver) = oneshot::channel();
        let mut entry = PendingExecution::new(
            execution_id.to_string(),
            "mcp:tool.echo".to_string(),
            now_rfc3339(),
            sender,
        );
        if let Some(backdated) = Instant::now().checked_sub(age) {
            entry.dispatched_at = backdated;
        }
        self.pending
            .lock()
            .await
            .insert(entry)
            .map(|_| ())
            .expect("unique execution id");
        PendingDispatch {
            execution_id: execution_id.to_string(),
            receiver,
        }
    }
}
