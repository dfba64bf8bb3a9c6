use thiserror::Error;

/// Unified error type for the toolrelay crate.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// A tool definition violated the registration contract.
    #[error("invalid tool definition: {0}")]
    InvalidDefinition(String),
    /// No tool is registered under the requested name.
    #[error("tool not found: {name}")]
    ToolNotFound { name: String, available: Vec<String> },
    /// Call parameters violated the tool's parameter schema.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// The membership was empty at dispatch time.
    #[error("no peers connected; a peer must connect and identify before tools can run")]
    NoPeersConnected,
    /// Peers were present but every send failed.
    #[error("no active peer connections available")]
    NoActivePeers,
    #[error("tool execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },
    #[error("tool execution was cancelled")]
    ExecutionCancelled,
    /// The peer answered but signalled failure.
    #[error("peer reported error: {0}")]
    PeerReportedError(String),
    #[error("malformed peer message: {0}")]
    MalformedPeerMessage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidDefinition(_) => "invalid_definition",
            RelayError::ToolNotFound { .. } => "tool_not_found",
            RelayError::InvalidParameters(_) => "invalid_parameters",
            RelayError::NoPeersConnected => "no_peers_connected",
            RelayError::NoActivePeers => "no_active_peers",
            RelayError::ExecutionTimeout { .. } => "execution_timeout",
            RelayError::ExecutionCancelled => "execution_cancelled",
            RelayError::PeerReportedError(_) => "peer_reported_error",
            RelayError::MalformedPeerMessage(_) => "malformed_peer_message",
            RelayError::Config(_) => "config",
            RelayError::Internal(_) => "internal",
        }
    }

    /// Whether the error was caused by the caller's request rather than the relay.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RelayError::ToolNotFound { .. } | RelayError::InvalidParameters(_)
        )
    }
}

/// Result type alias using [`RelayError`].
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_flagged() {
        let not_found = RelayError::ToolNotFound {
            name: "ghost".to_string(),
            available: vec![],
        };
        assert!(not_found.is_validation());
        assert!(RelayError::InvalidParameters("x".to_string()).is_validation());
        assert!(!RelayError::NoPeersConnected.is_validation());
        assert!(!RelayError::ExecutionTimeout { timeout_ms: 10 }.is_validation());
    }

    #[test]
    fn timeout_message_names_duration() {
        let err = RelayError::ExecutionTimeout { timeout_ms: 100 };
        assert_eq!(err.to_string(), "tool execution timed out after 100ms");
        assert_eq!(err.code(), "execution_timeout");
    }
}
