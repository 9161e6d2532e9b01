//! The executor behind `tools/call`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{McpError, ToolDefinition};

/// Failure reported by a tool executor.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// The tool ran and reported a domain failure.
    #[error("{0}")]
    Failed(String),

    /// The arguments could not be decoded into the tool's parameters.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl From<ToolError> for McpError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Failed(msg) => McpError::ToolError(msg),
            ToolError::InvalidArguments(msg) => McpError::InvalidParams(msg),
            ToolError::UnknownTool(name) => McpError::ToolNotFound(name),
        }
    }
}

/// Performs the domain action behind each tool. Calls may be slow or fail;
/// the dispatcher bounds them with its own timeout as well.
#[async_trait]
pub trait ToolExecutor: Send + Sync + 'static {
    async fn list_tools(&self) -> Vec<ToolDefinition>;

    async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, ToolError>;

    /// Executor details reported by the health endpoint.
    fn describe(&self) -> Value {
        Value::Null
    }
}
