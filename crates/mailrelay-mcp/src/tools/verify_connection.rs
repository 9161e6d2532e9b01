//! Tool: verify_connection. Check that the SMTP relay accepts a session.

use std::time::Duration;

use serde_json::{json, Value};

use mailrelay::{EmailOperations, Mailer};

use super::executor::ToolError;
use super::mail::to_value;
use crate::types::ToolDefinition;

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "verify_connection".to_string(),
        description: Some("Verify the SMTP connection and credentials".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {}
        }),
    }
}

pub async fn execute<M: Mailer>(
    _args: Value,
    ops: &EmailOperations<M>,
    timeout: Duration,
) -> Result<Value, ToolError> {
    let report = ops.verify_connection(timeout).await?;
    to_value(&report)
}
