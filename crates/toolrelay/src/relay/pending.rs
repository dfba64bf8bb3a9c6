//! Pending-execution table.
//!
//! An entry owns the one-shot sender for its caller. Every completion path
//! removes the entry from the table first, under the table lock, and only the
//! remover can complete it, so an execution id is completed at most once.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{RelayError, RelayResult};
use crate::utils::time::elapsed_ms;

use super::protocol::PeerResult;

pub(crate) type Completion = RelayResult<PeerResult>;

pub(crate) struct PendingExecution {
    pub execution_id: String,
    pub tool_name: String,
    pub dispatched_at: Instant,
    pub dispatched_at_wall: String,
    completion: oneshot::Sender<Completion>,
    timer: Option<JoinHandle<()>>,
}

impl PendingExecution {
    pub fn new(
        execution_id: String,
        tool_name: String,
        dispatched_at_wall: String,
        completion: oneshot::Sender<Completion>,
    ) -> Self {
        Self {
            execution_id,
            tool_name,
            dispatched_at: Instant::now(),
            dispatched_at_wall,
            completion,
            timer: None,
        }
    }

    pub fn arm(&mut self, timer: JoinHandle<()>) {
        self.timer = Some(timer);
    }

    /// Forget the timer without aborting it. Used by the timer task itself.
    pub fn disarm(&mut self) {
        self.timer = None;
    }

    /// Cancel the timer and deliver the outcome. Returns whether the caller was
    /// still waiting.
    pub fn complete(mut self, outcome: Completion) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.completion.send(outcome).is_ok()
    }

    pub fn age(&self) -> Duration {
        self.dispatched_at.elapsed()
    }
}

/// Read-only view of an in-flight execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub execution_id: String,
    pub tool_name: String,
    pub started_at: String,
    pub duration_ms: u64,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<String, PendingExecution>,
}

impl PendingTable {
    pub fn insert(&mut self, entry: PendingExecution) -> RelayResult<&mut PendingExecution> {
        use std::collections::hash_map::Entry;
        match self.entries.entry(entry.execution_id.clone()) {
            Entry::Occupied(_) => Err(RelayError::Internal(format!(
                "execution id {} is already pending",
                entry.execution_id
            ))),
            Entry::Vacant(slot) => Ok(slot.insert(entry)),
        }
    }

    pub fn take(&mut self, execution_id: &str) -> Option<PendingExecution> {
        self.entries.remove(execution_id)
    }

    /// Remove every entry older than `max_age`.
    pub fn take_expired(&mut self, max_age: Duration) -> Vec<PendingExecution> {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.age() > max_age)
            .map(|entry| entry.execution_id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|execution_id| self.entries.remove(execution_id))
            .collect()
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.entries.contains_key(execution_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn summaries(&self) -> Vec<PendingSummary> {
        let mut summaries: Vec<PendingSummary> = self
            .entries
            .values()
            .map(|entry| PendingSummary {
                execution_id: entry.execution_id.clone(),
                tool_name: entry.tool_name.clone(),
                started_at: entry.dispatched_at_wall.clone(),
                duration_ms: elapsed_ms(entry.dispatched_at),
            })
            .collect();
        summaries.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
        summaries
    }
}
