//! Core data types for outgoing mail and delivery reports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::TlsMode;

/// A single message to deliver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub from_addr: Option<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub html: bool,
    #[serde(default)]
    pub attachments: Vec<AttachmentSpec>,
}

/// A base64-encoded attachment as supplied by a client.
///
/// Either field may be missing; such entries are skipped during composition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentSpec {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// The same message sent separately to many recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkEmail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub from_addr: Option<String>,
    #[serde(default)]
    pub html: bool,
}

/// A message whose body is rendered from `{name}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEmail {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub from_addr: Option<String>,
    #[serde(default)]
    pub html: bool,
}

/// Outcome of a successful single delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReport {
    pub success: bool,
    pub message: String,
    pub recipients: Vec<String>,
}

/// Per-recipient line of a bulk delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub recipient: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate outcome of a bulk delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkReport {
    pub success: bool,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub results: Vec<BulkOutcome>,
}

/// Outcome of an SMTP connection check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
    pub server: String,
    pub port: u16,
    pub tls: TlsMode,
    pub authenticated: bool,
}

/// Errors raised while composing or delivering mail.
#[derive(thiserror::Error, Debug)]
pub enum MailError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("No sender address: pass from_addr or configure SMTP_USER")]
    MissingSender,

    #[error("No recipients given")]
    NoRecipients,

    #[error("Invalid attachment '{filename}': {reason}")]
    InvalidAttachment { filename: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("SMTP server {host}:{port} rejected the connection check")]
    ConnectionRejected { host: String, port: u16 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type MailResult<T> = Result<T, MailError>;
