//! mailrelay MCP server: sessions, resumable event streams and tool
//! dispatch over streamable HTTP, with SMTP mail tools.

pub mod config;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::ServerConfig;
pub use protocol::Dispatcher;
pub use session::SessionManager;
pub use tools::{MailToolExecutor, ToolExecutor};
pub use transport::HttpTransport;
