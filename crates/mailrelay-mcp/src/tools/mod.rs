//! Tool executor boundary and the mail tools.

pub mod executor;
pub mod mail;
pub mod send_bulk_email;
pub mod send_email;
pub mod send_template_email;
pub mod verify_connection;

pub use executor::{ToolError, ToolExecutor};
pub use mail::MailToolExecutor;
