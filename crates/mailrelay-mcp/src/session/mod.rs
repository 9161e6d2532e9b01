//! Sessions, their event logs and stream subscribers.

pub mod event_log;
pub mod manager;
pub mod state;
pub mod subscriber;

pub use event_log::{Event, EventKind, EventLog, DEFAULT_EVENT_CAPACITY};
pub use manager::SessionManager;
pub use state::{CallState, PendingCall, Session, SessionState};
pub use subscriber::Subscriber;
