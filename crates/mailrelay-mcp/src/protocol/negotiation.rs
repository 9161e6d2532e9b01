//! Protocol version negotiation during initialization.

use crate::session::Session;
use crate::types::{InitializeParams, InitializeResult, McpResult, MCP_VERSION};

/// Protocol revisions this server speaks, newest first.
pub const SUPPORTED_VERSIONS: &[&str] = &[MCP_VERSION, "2025-03-26", "2024-11-05"];

pub fn is_supported(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// The requested version if supported, otherwise the latest one.
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == requested)
        .unwrap_or(MCP_VERSION)
}

/// Initialize result for a request answered outside any session.
pub fn initialize_result(params: &InitializeParams) -> InitializeResult {
    let version = negotiate_version(&params.protocol_version);
    if !is_supported(&params.protocol_version) {
        tracing::warn!(
            "Client requested protocol version {}, server supports {:?}; using {version}",
            params.protocol_version,
            SUPPORTED_VERSIONS
        );
    }
    InitializeResult {
        protocol_version: version.to_string(),
        ..InitializeResult::default_result()
    }
}

/// Record the negotiated parameters on `session` and move it to ACTIVE.
pub fn negotiate(session: &Session, params: InitializeParams) -> McpResult<InitializeResult> {
    let result = initialize_result(&params);
    session.activate(
        &result.protocol_version,
        params.capabilities,
        params.client_info.clone(),
    )?;

    if let Some(info) = &params.client_info {
        tracing::info!(
            "Session {} client: {} v{}",
            session.id(),
            info.name,
            info.version
        );
    }

    Ok(result.with_session(session.id(), session.state().as_str()))
}
