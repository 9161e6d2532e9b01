//! Tool: send_bulk_email. Send the same message to each recipient separately.

use std::time::Duration;

use serde_json::{json, Value};

use mailrelay::{BulkEmail, EmailOperations, Mailer};

use super::executor::ToolError;
use super::mail::{parse_args, to_value};
use crate::types::ToolDefinition;

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "send_bulk_email".to_string(),
        description: Some(
            "Send one message per recipient and report the outcome for each".to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "recipients": { "type": "array", "items": { "type": "string" } },
                "subject": { "type": "string" },
                "body": { "type": "string" },
                "from_addr": { "type": "string" },
                "html": { "type": "boolean", "default": false }
            },
            "required": ["recipients", "subject", "body"]
        }),
    }
}

pub async fn execute<M: Mailer>(
    args: Value,
    ops: &EmailOperations<M>,
    timeout: Duration,
) -> Result<Value, ToolError> {
    let bulk: BulkEmail = parse_args(args)?;
    let report = ops.send_bulk_email(bulk, timeout).await?;
    if report.failed_count > 0 {
        tracing::warn!(
            "Bulk send: {} of {} deliveries failed",
            report.failed_count,
            report.total
        );
    }
    to_value(&report)
}
