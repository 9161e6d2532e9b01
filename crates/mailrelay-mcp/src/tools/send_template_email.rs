//! Tool: send_template_email. Render `{name}` placeholders, then send.

use std::time::Duration;

use serde_json::{json, Value};

use mailrelay::{EmailOperations, Mailer, TemplateEmail};

use super::executor::ToolError;
use super::mail::{parse_args, to_value};
use crate::types::ToolDefinition;

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "send_template_email".to_string(),
        description: Some(
            "Send an email whose body replaces {placeholders} with the given variables"
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "to": { "type": "string" },
                "subject": { "type": "string" },
                "template": { "type": "string", "description": "Body with {name} placeholders" },
                "variables": { "type": "object", "description": "Placeholder values" },
                "from_addr": { "type": "string" },
                "html": { "type": "boolean", "default": false }
            },
            "required": ["to", "subject", "template", "variables"]
        }),
    }
}

pub async fn execute<M: Mailer>(
    args: Value,
    ops: &EmailOperations<M>,
    timeout: Duration,
) -> Result<Value, ToolError> {
    let template: TemplateEmail = parse_args(args)?;
    let report = ops.send_template_email(template, timeout).await?;
    to_value(&report)
}
