pub mod correlator;
mod pending;
pub mod protocol;

pub use correlator::{
    ExecutionCorrelator, ExecutionFailure, PeerMessageOutcome, PendingDispatch, ProtocolHealth,
    ProtocolStatus, RequestContext, ToolCallResponse,
};
pub use pending::PendingSummary;
pub use protocol::{Envelope, ExecutionMetadata, PeerResult, ToolInvoke, ToolResponse};
