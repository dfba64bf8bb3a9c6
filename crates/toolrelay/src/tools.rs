//! Tool registry, parameter schemas and execution history.

pub mod builtin;
pub mod invocation;
pub mod registry;
pub mod schema;

pub use builtin::{console_hello_definition, register_builtin_tools, CONSOLE_HELLO_TOOL};
pub use invocation::{ExecutionHistory, ExecutionRecord, InvocationStatus};
pub use registry::{DiscoveryInfo, ExecutionStats, ToolRegistry, ToolSummary, ToolUsage, ValidatedCall};
pub use schema::{ExecutionHandler, ParamKind, ParamSpec, ParameterValidator, ToolDefinition};
