//! Error types and JSON-RPC error codes for the MCP server.

use std::time::Duration;

use serde_json::json;

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Server-defined error codes for session and tool failures.
pub mod mcp_error_codes {
    pub const INVALID_SESSION: i32 = -32001;
    pub const INVALID_STATE: i32 = -32002;
    pub const TOOL_ERROR: i32 = -32003;
    pub const TOOL_TIMEOUT: i32 = -32004;
    pub const RESUME_WINDOW_EXCEEDED: i32 = -32005;
    pub const SESSION_CLOSED: i32 = -32006;
    pub const REQUEST_CANCELLED: i32 = -32800;
}

/// All errors that can occur in the MCP server.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Protocol version mismatch: session negotiated {expected}, request sent {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Duplicate request id {0}: a request with this id is still in flight")]
    DuplicateRequestId(RequestId),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool '{tool}' timed out after {}s", timeout.as_secs_f64())]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("Resume window exceeded: last seen event {requested}, oldest retained event {oldest}")]
    ResumeWindowExceeded { requested: u64, oldest: u64 },

    #[error("Session closed")]
    SessionClosed,

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) | McpError::Json(_) => PARSE_ERROR,
            McpError::InvalidRequest(_)
            | McpError::NotAcceptable(_)
            | McpError::VersionMismatch { .. }
            | McpError::DuplicateRequestId(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_) | McpError::ToolNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => INVALID_PARAMS,
            McpError::InternalError(_)
            | McpError::Transport(_)
            | McpError::Config(_)
            | McpError::Io(_) => INTERNAL_ERROR,
            McpError::InvalidSession(_) => INVALID_SESSION,
            McpError::InvalidState(_) => INVALID_STATE,
            McpError::ToolError(_) => TOOL_ERROR,
            McpError::ToolTimeout { .. } => TOOL_TIMEOUT,
            McpError::ResumeWindowExceeded { .. } => RESUME_WINDOW_EXCEEDED,
            McpError::SessionClosed => SESSION_CLOSED,
            McpError::RequestCancelled => REQUEST_CANCELLED,
        }
    }

    /// Machine-readable kind, carried in `error.data.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            McpError::ParseError(_) | McpError::Json(_) => "PARSE_ERROR",
            McpError::InvalidRequest(_)
            | McpError::NotAcceptable(_)
            | McpError::VersionMismatch { .. }
            | McpError::DuplicateRequestId(_) => "INVALID_REQUEST",
            McpError::MethodNotFound(_) | McpError::ToolNotFound(_) => "METHOD_NOT_FOUND",
            McpError::InvalidParams(_) => "INVALID_PARAMS",
            McpError::InternalError(_)
            | McpError::Transport(_)
            | McpError::Config(_)
            | McpError::Io(_) => "INTERNAL_ERROR",
            McpError::InvalidSession(_) => "INVALID_SESSION",
            McpError::InvalidState(_) => "INVALID_STATE",
            McpError::ToolError(_) => "TOOL_ERROR",
            McpError::ToolTimeout { .. } => "TOOL_TIMEOUT",
            McpError::ResumeWindowExceeded { .. } => "RESUME_WINDOW_EXCEEDED",
            McpError::SessionClosed => "SESSION_CLOSED",
            McpError::RequestCancelled => "REQUEST_CANCELLED",
        }
    }

    /// HTTP status used when the error is raised before any dispatch.
    pub fn http_status(&self) -> u16 {
        match self {
            McpError::ParseError(_)
            | McpError::Json(_)
            | McpError::InvalidRequest(_)
            | McpError::VersionMismatch { .. }
            | McpError::DuplicateRequestId(_)
            | McpError::InvalidParams(_) => 400,
            McpError::InvalidSession(_) => 404,
            McpError::NotAcceptable(_) => 406,
            McpError::InvalidState(_) => 409,
            McpError::ResumeWindowExceeded { .. } => 410,
            McpError::MethodNotFound(_) | McpError::ToolNotFound(_) => 404,
            _ => 500,
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError::new(
            id,
            JsonRpcErrorObject {
                code: self.code(),
                message: self.to_string(),
                data: Some(json!({ "kind": self.kind() })),
            },
        )
    }

    /// Serialized error response; serialization of these shapes cannot fail.
    pub fn to_value(&self, id: RequestId) -> serde_json::Value {
        serde_json::to_value(self.to_json_rpc_error(id)).unwrap_or_default()
    }
}

pub type McpResult<T> = Result<T, McpError>;
