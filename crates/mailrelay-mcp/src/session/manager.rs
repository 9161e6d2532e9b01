//! Session table, idle expiry and the background sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::event_log::DEFAULT_EVENT_CAPACITY;
use super::state::{Session, SessionState};
use crate::types::{ClientCapabilities, McpError, McpResult};

/// Owns every live session. Lookups share a read lock; only inserting or
/// removing an entry takes the write lock.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    event_capacity: usize,
}

impl SessionManager {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            event_capacity,
        }
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    /// Allocate a session in the INITIALIZING state under a fresh random id.
    pub async fn create_session(
        &self,
        protocol_version: &str,
        capabilities: ClientCapabilities,
    ) -> Arc<Session> {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(
            id.clone(),
            protocol_version,
            capabilities,
            self.event_capacity,
        ));
        self.sessions.write().await.insert(id.clone(), session.clone());
        tracing::info!("Created MCP session: {id}");
        session
    }

    /// Look up a live session and mark it active.
    pub async fn get_session(&self, id: &str) -> McpResult<Arc<Session>> {
        let session = self
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| McpError::InvalidSession(format!("Unknown session: {id}")))?;
        if session.is_closed() {
            return Err(McpError::InvalidSession(format!("Session {id} is closed")));
        }
        session.touch();
        Ok(session)
    }

    /// Explicit termination: CLOSING, then removal.
    pub async fn close_session(&self, id: &str) -> McpResult<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| McpError::InvalidSession(format!("Unknown session: {id}")))?;
        session.close(SessionState::Closing);
        Ok(())
    }

    /// Expire every session idle for longer than `idle_timeout` at `now`.
    /// Returns the expired ids.
    pub async fn expire_idle(&self, now: Instant, idle_timeout: Duration) -> Vec<String> {
        let is_stale = |session: &Session| {
            session
                .idle_for(now)
                .is_some_and(|idle| idle > idle_timeout)
        };

        let candidates: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| is_stale(s))
            .map(|s| s.id().to_string())
            .collect();
        if candidates.is_empty() {
            return candidates;
        }

        let mut expired = Vec::with_capacity(candidates.len());
        let mut sessions = self.sessions.write().await;
        for id in candidates {
            // Activity may have arrived between the scan and the write lock.
            if !sessions.get(&id).is_some_and(|s| is_stale(s)) {
                continue;
            }
            if let Some(session) = sessions.remove(&id) {
                session.close(SessionState::Expired);
                expired.push(id);
            }
        }
        expired
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of the live sessions, oldest first.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at());
        sessions
    }

    /// Close and drop every session.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<Session>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in &drained {
            session.close(SessionState::Closing);
        }
        tracing::info!("Closed {} sessions on shutdown", drained.len());
    }

    /// Run [`expire_idle`](Self::expire_idle) every `interval` until
    /// `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        idle_timeout: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = manager.expire_idle(Instant::now(), idle_timeout).await;
                        if !expired.is_empty() {
                            tracing::info!("Expired {} idle sessions", expired.len());
                        }
                    }
                }
            }
            tracing::debug!("Session sweeper stopped");
        })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
