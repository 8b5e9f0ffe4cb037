//! Tool registration and dispatch.
//!
//! Providers surface tool calls in completion responses; the dispatcher
//! routes each call to a registered executor. Execution failures are
//! reported inside `ToolOutcome` so one bad call never aborts the cycle;
//! only unknown or disabled tools surface as dispatch errors.

mod write_file;

mod web_search;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use model_provider::{CancelSignal, ToolCall, ToolDefinition};
use serde_json::{Map, Value};

pub use web_search::{WebSearchTool, DEFAULT_SEARCH_ENDPOINT};
pub use write_file::WriteFileTool;

/// Result of executing one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    pub payload: Value,
    pub error: Option<String>,
}

impl ToolOutcome {
    #[must_use]
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A tool callable by the model.
pub trait ToolExecutor: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn execute(&self, arguments: &Map<String, Value>, cancel: &CancelSignal) -> ToolOutcome;
}

/// Dispatch-level failure, distinct from a tool's own execution failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    UnknownTool(String),
    ToolDisabled(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool(name) => write!(f, "unknown tool: {name}"),
            Self::ToolDisabled(name) => write!(f, "tool is disabled: {name}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Routes tool calls to registered executors.
#[derive(Default)]
pub struct ToolDispatcher {
    tools: BTreeMap<String, Arc<dyn ToolExecutor>>,
    disabled: BTreeSet<String>,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ToolExecutor>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    /// Keeps the tool registered but rejects dispatches to it.
    pub fn disable(&mut self, name: &str) {
        self.disabled.insert(name.to_string());
    }

    /// Definitions of every enabled tool, for inclusion in requests.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| tool.definition())
            .filter(|definition| !self.disabled.contains(&definition.name))
            .collect()
    }

    pub fn dispatch(
        &self,
        call: &ToolCall,
        cancel: &CancelSignal,
    ) -> Result<ToolOutcome, DispatchError> {
        if self.disabled.contains(&call.name) {
            return Err(DispatchError::ToolDisabled(call.name.clone()));
        }

        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| DispatchError::UnknownTool(call.name.clone()))?;

        tracing::debug!(tool = %call.name, call_id = %call.id, "dispatching tool call");
        Ok(tool.execute(&call.arguments, cancel))
    }
}

pub(crate) fn string_argument(arguments: &Map<String, Value>, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}
