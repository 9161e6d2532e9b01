//! Mail-backed tool executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use mailrelay::{EmailOperations, MailError, Mailer};

use super::executor::{ToolError, ToolExecutor};
use super::{send_bulk_email, send_email, send_template_email, verify_connection};
use crate::types::ToolDefinition;

impl From<MailError> for ToolError {
    fn from(e: MailError) -> Self {
        ToolError::Failed(e.to_string())
    }
}

/// Decode tool arguments into their typed parameters.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

pub(crate) fn to_value(report: &impl Serialize) -> Result<Value, ToolError> {
    serde_json::to_value(report).map_err(|e| ToolError::Failed(e.to_string()))
}

/// Exposes [`EmailOperations`] as the four mail tools.
pub struct MailToolExecutor<M: Mailer> {
    ops: Arc<EmailOperations<M>>,
}

impl<M: Mailer> MailToolExecutor<M> {
    pub fn new(ops: EmailOperations<M>) -> Self {
        Self { ops: Arc::new(ops) }
    }

    pub fn operations(&self) -> &EmailOperations<M> {
        &self.ops
    }

    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            send_email::definition(),
            send_bulk_email::definition(),
            send_template_email::definition(),
            verify_connection::definition(),
        ]
    }
}

#[async_trait]
impl<M: Mailer> ToolExecutor for MailToolExecutor<M> {
    async fn list_tools(&self) -> Vec<ToolDefinition> {
        Self::definitions()
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let ops = self.ops.as_ref();
        match name {
            "send_email" => send_email::execute(arguments, ops, timeout).await,
            "send_bulk_email" => send_bulk_email::execute(arguments, ops, timeout).await,
            "send_template_email" => send_template_email::execute(arguments, ops, timeout).await,
            "verify_connection" => verify_connection::execute(arguments, ops, timeout).await,
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }

    fn describe(&self) -> Value {
        let config = self.ops.config();
        json!({
            "smtp_host": config.host,
            "smtp_port": config.port,
            "tls": config.tls,
            "encrypted": config.tls.is_encrypted(),
            "authenticated": config.has_credentials(),
            "defaulted": config.defaulted,
        })
    }
}
