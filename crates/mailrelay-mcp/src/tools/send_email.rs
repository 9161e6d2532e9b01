//! Tool: send_email. Send one message through the SMTP relay.

use std::time::Duration;

use serde_json::{json, Value};

use mailrelay::{EmailOperations, Mailer, OutgoingEmail};

use super::executor::ToolError;
use super::mail::{parse_args, to_value};
use crate::types::ToolDefinition;

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "send_email".to_string(),
        description: Some(
            "Send an email. The sender defaults to the configured SMTP user.".to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "to": { "type": "string", "description": "Recipient address" },
                "subject": { "type": "string" },
                "body": { "type": "string", "description": "Plain text or HTML body" },
                "from_addr": { "type": "string", "description": "Sender address" },
                "cc": { "type": "array", "items": { "type": "string" } },
                "bcc": { "type": "array", "items": { "type": "string" } },
                "html": { "type": "boolean", "default": false },
                "attachments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "filename": { "type": "string" },
                            "content": { "type": "string", "description": "Base64 file content" }
                        }
                    }
                }
            },
            "required": ["to", "subject", "body"]
        }),
    }
}

pub async fn execute<M: Mailer>(
    args: Value,
    ops: &EmailOperations<M>,
    timeout: Duration,
) -> Result<Value, ToolError> {
    let email: OutgoingEmail = parse_args(args)?;
    let report = ops.send_email(email, timeout).await?;
    to_value(&report)
}
