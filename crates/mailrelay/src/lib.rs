//! mailrelay: mail composition, template rendering and SMTP delivery.

pub mod compose;
pub mod config;
pub mod mailer;
pub mod operations;
pub mod types;

pub use compose::{build_message, envelope_recipients, parse_mailbox, render_template};
pub use config::{SmtpConfig, TlsMode};
pub use mailer::{Mailer, SmtpMailer};
pub use operations::EmailOperations;
pub use types::*;

/// Re-exported so downstream `Mailer` implementations share the same message type.
pub use lettre::Message;
