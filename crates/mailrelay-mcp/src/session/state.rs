//! Session state, pending-call tracking and the subscriber slot.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::event_log::{EventKind, EventLog};
use crate::types::{ClientCapabilities, Implementation, LogLevel, McpError, McpResult, RequestId};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Active,
    Closing,
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Expired)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Completed,
    Failed,
}

/// A client request that has been admitted and has not yet terminated.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub method: String,
    pub arguments: Option<Value>,
    pub state: CallState,
    pub started: Instant,
    cancel: CancellationToken,
}

struct SubscriberSlot {
    id: u64,
    cancel: CancellationToken,
}

struct SessionInner {
    state: SessionState,
    protocol_version: String,
    client_capabilities: ClientCapabilities,
    client_info: Option<Implementation>,
    last_activity: Instant,
    log_level: Option<LogLevel>,
    pending: HashMap<RequestId, PendingCall>,
    subscriber: Option<SubscriberSlot>,
    next_subscriber: u64,
}

/// One client session. Shared as `Arc<Session>` between the manager, the
/// dispatcher and at most one subscriber.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    events: EventLog,
    closed: CancellationToken,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(
        id: String,
        protocol_version: &str,
        capabilities: ClientCapabilities,
        event_capacity: usize,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            events: EventLog::new(event_capacity),
            closed: CancellationToken::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Initializing,
                protocol_version: protocol_version.to_string(),
                client_capabilities: capabilities,
                client_info: None,
                last_activity: Instant::now(),
                log_level: None,
                pending: HashMap::new(),
                subscriber: None,
                next_subscriber: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn protocol_version(&self) -> String {
        self.lock().protocol_version.clone()
    }

    pub fn client_capabilities(&self) -> ClientCapabilities {
        self.lock().client_capabilities.clone()
    }

    pub fn client_info(&self) -> Option<Implementation> {
        self.lock().client_info.clone()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Cancelled once the session is closed or expired.
    pub fn close_signal(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn touch(&self) {
        self.lock().last_activity = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.lock().last_activity
    }

    /// How long the session has been idle at `now`. A session with a live
    /// subscriber or an in-flight call is never idle.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        let inner = self.lock();
        if inner.subscriber.is_some() || !inner.pending.is_empty() {
            return None;
        }
        Some(now.saturating_duration_since(inner.last_activity))
    }

    /// INITIALIZING -> ACTIVE with the negotiated parameters.
    pub fn activate(
        &self,
        protocol_version: &str,
        capabilities: ClientCapabilities,
        client_info: Option<Implementation>,
    ) -> McpResult<()> {
        let mut inner = self.lock();
        if inner.state != SessionState::Initializing {
            return Err(McpError::InvalidState(format!(
                "initialize is only valid while initializing; session is {}",
                inner.state
            )));
        }
        inner.state = SessionState::Active;
        inner.protocol_version = protocol_version.to_string();
        inner.client_capabilities = capabilities;
        inner.client_info = client_info;
        tracing::info!("Session {} initialized ({protocol_version})", self.id);
        Ok(())
    }

    /// Register an in-flight request. The returned token is cancelled when
    /// the call is cancelled or the session closes.
    pub fn begin_call(
        &self,
        id: &RequestId,
        method: &str,
        arguments: Option<Value>,
    ) -> McpResult<CancellationToken> {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return Err(McpError::SessionClosed);
        }
        if inner.pending.contains_key(id) {
            return Err(McpError::DuplicateRequestId(id.clone()));
        }
        let cancel = self.closed.child_token();
        inner.pending.insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                arguments,
                state: CallState::Pending,
                started: Instant::now(),
                cancel: cancel.clone(),
            },
        );
        Ok(cancel)
    }

    /// Retire a pending call with its final state.
    pub fn finish_call(&self, id: &RequestId, state: CallState) -> Option<PendingCall> {
        let mut call = self.lock().pending.remove(id)?;
        call.state = state;
        tracing::debug!(
            "Session {}: {} [{id}] {:?} after {:?}",
            self.id,
            call.method,
            call.state,
            call.started.elapsed()
        );
        Some(call)
    }

    pub fn pending_calls(&self) -> usize {
        self.lock().pending.len()
    }

    /// Cancel the pending call with this id. Returns false if none is in flight.
    pub fn cancel_call(&self, id: &RequestId) -> bool {
        match self.lock().pending.get(id) {
            Some(call) => {
                call.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Append to the event log while the session is ACTIVE.
    pub fn record(&self, kind: EventKind, message: &Value) -> Option<u64> {
        let inner = self.lock();
        if inner.state != SessionState::Active {
            return None;
        }
        Some(self.events.append(kind, message))
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.lock().log_level
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.lock().log_level = Some(level);
    }

    /// Take the subscriber slot, cancelling any previous holder.
    pub fn attach_subscriber(&self) -> (u64, CancellationToken) {
        let mut inner = self.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        let cancel = self.closed.child_token();
        if let Some(previous) = inner.subscriber.replace(SubscriberSlot {
            id,
            cancel: cancel.clone(),
        }) {
            previous.cancel.cancel();
            tracing::info!(
                "Session {}: subscriber {} replaced by {id}",
                self.id,
                previous.id
            );
        } else {
            tracing::info!("Session {}: subscriber {id} attached", self.id);
        }
        (id, cancel)
    }

    /// Release the slot if `id` still holds it.
    pub fn detach_subscriber(&self, id: u64) {
        let mut inner = self.lock();
        if inner.subscriber.as_ref().is_some_and(|s| s.id == id) {
            inner.subscriber = None;
            tracing::info!("Session {}: subscriber {id} detached", self.id);
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.lock().subscriber.is_some()
    }

    /// Move to a terminal state, cancelling the subscriber and every pending
    /// call. Returns false if the session was already closed.
    pub fn close(&self, final_state: SessionState) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = final_state;
        inner.subscriber = None;
        let pending = inner.pending.len();
        drop(inner);

        self.closed.cancel();
        tracing::info!(
            "Session {} {final_state} ({pending} pending calls failed)",
            self.id
        );
        true
    }
}
