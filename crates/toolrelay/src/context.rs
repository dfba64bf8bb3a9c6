//! Process-wide relay state, built once at startup and shared by reference.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::RelayConfig;
use crate::error::RelayResult;
use crate::peers::Membership;
use crate::relay::ExecutionCorrelator;
use crate::tools::{register_builtin_tools, ToolRegistry};

#[derive(Clone)]
pub struct RelayContext {
    pub config: Arc<RelayConfig>,
    pub registry: Arc<RwLock<ToolRegistry>>,
    pub membership: Membership,
    pub correlator: Arc<ExecutionCorrelator>,
}

impl RelayContext {
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        config.validate()?;
        let mut registry = ToolRegistry::new(config.history_capacity);
        register_builtin_tools(&mut registry)?;
        let registry = Arc::new(RwLock::new(registry));
        let membership = Membership::new();
        let correlator = Arc::new(ExecutionCorrelator::new(
            Arc::clone(&registry),
            membership.clone(),
            config.execution_timeout(),
        ));
        Ok(Self {
            config: Arc::new(config),
            registry,
            membership,
            correlator,
        })
    }
}
