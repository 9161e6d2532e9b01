//! MIME message composition and template rendering.

use std::collections::BTreeMap;

use base64::Engine;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use serde_json::Value;

use crate::types::{MailError, MailResult, OutgoingEmail};

const ATTACHMENT_MIME: &str = "application/octet-stream";

/// Parse a single address, accepting both `a@b` and `Name <a@b>`.
pub fn parse_mailbox(address: &str) -> MailResult<Mailbox> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| MailError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Build a multipart message: the body first, then any decodable attachments.
///
/// `default_sender` is used when the email carries no `from_addr`.
pub fn build_message(email: &OutgoingEmail, default_sender: Option<&str>) -> MailResult<Message> {
    let sender = email
        .from_addr
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or(default_sender)
        .ok_or(MailError::MissingSender)?;

    let mut builder = Message::builder()
        .from(parse_mailbox(sender)?)
        .to(parse_mailbox(&email.to)?)
        .subject(email.subject.clone());

    for cc in &email.cc {
        builder = builder.cc(parse_mailbox(cc)?);
    }
    for bcc in &email.bcc {
        builder = builder.bcc(parse_mailbox(bcc)?);
    }

    let body = if email.html {
        SinglePart::html(email.body.clone())
    } else {
        SinglePart::plain(email.body.clone())
    };
    let mut parts = MultiPart::mixed().singlepart(body);

    for attachment in &email.attachments {
        let (Some(filename), Some(content)) = (
            attachment.filename.as_deref(),
            attachment.content.as_deref(),
        ) else {
            tracing::debug!("Skipping attachment without filename or content");
            continue;
        };
        if filename.is_empty() || content.is_empty() {
            tracing::debug!("Skipping empty attachment entry");
            continue;
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(content.trim())
            .map_err(|e| MailError::InvalidAttachment {
                filename: filename.to_string(),
                reason: format!("Invalid base64: {e}"),
            })?;
        let mime = ContentType::parse(ATTACHMENT_MIME).map_err(|e| MailError::InvalidAttachment {
            filename: filename.to_string(),
            reason: e.to_string(),
        })?;

        parts = parts.singlepart(Attachment::new(filename.to_string()).body(bytes, mime));
    }

    Ok(builder.multipart(parts)?)
}

/// Every envelope recipient of a composed message (to, cc and bcc).
pub fn envelope_recipients(message: &Message) -> Vec<String> {
    message
        .envelope()
        .to()
        .iter()
        .map(|address| address.to_string())
        .collect()
}

/// Substitute `{name}` placeholders. Keys are applied in sorted order;
/// string values are inserted verbatim, anything else as compact JSON.
pub fn render_template(template: &str, variables: &BTreeMap<String, Value>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in variables {
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rendered = rendered.replace(&format!("{{{key}}}"), &replacement);
    }
    rendered
}
