pub mod server;

pub mod config;
pub mod context;
pub mod error;
pub mod peers;
pub mod relay;
pub mod tools;
pub mod utils;

pub use crate::config::RelayConfig;
pub use crate::context::RelayContext;
pub use crate::error::{RelayError, RelayResult};
pub use crate::relay::{ExecutionCorrelator, ExecutionFailure, ToolCallResponse};
pub use crate::tools::{ToolDefinition, ToolRegistry};
