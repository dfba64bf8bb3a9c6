//! Execution records and the bounded history that holds them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::utils::time::now_rfc3339;

/// Outcome of a finished tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// A peer answered and reported success.
    Success,
    /// Validation, dispatch, timeout or the peer itself failed the call.
    Failed,
}

/// Immutable record of a single finished execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub tool_name: String,
    pub parameters: Value,
    pub status: InvocationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock completion time (RFC 3339).
    pub timestamp: String,
    pub execution_time_ms: u64,
}

impl ExecutionRecord {
    /// Build a record stamped with the current time and a fresh id.
    pub fn new(
        tool_name: &str,
        parameters: Value,
        outcome: Result<Value, String>,
        execution_time_ms: u64,
    ) -> Self {
        let (status, result, error) = match outcome {
            Ok(result) => (InvocationStatus::Success, Some(result), None),
            Err(error) => (InvocationStatus::Failed, None, Some(error)),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            tool_name: tool_name.to_string(),
            parameters,
            status,
            result,
            error,
            timestamp: now_rfc3339(),
            execution_time_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Success
    }
}

/// FIFO ring buffer of execution records; the oldest record is evicted once
/// capacity is exceeded.
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    records: VecDeque<ExecutionRecord>,
    capacity: usize,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: ExecutionRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// The newest `count` records, oldest first.
    pub fn recent(&self, count: usize) -> Vec<ExecutionRecord> {
        let skip = self.records.len().saturating_sub(count);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
