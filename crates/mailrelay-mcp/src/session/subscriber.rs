//! The live reader attached to a session's event log.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::event_log::Event;
use super::state::Session;
use crate::types::McpResult;

/// Holds the session's subscriber slot for as long as it lives. Dropping it
/// releases the slot.
pub struct Subscriber {
    id: u64,
    session: Arc<Session>,
    cursor: u64,
    cancel: CancellationToken,
    wake: watch::Receiver<u64>,
}

impl Subscriber {
    /// Attach to `session`, replacing any existing subscriber. Without a
    /// cursor, delivery starts after the last event already appended.
    pub fn attach(session: Arc<Session>, cursor: Option<u64>) -> McpResult<Self> {
        let cursor = match cursor {
            Some(cursor) => {
                session.events().validate_cursor(cursor)?;
                cursor
            }
            None => session.events().last_sequence(),
        };
        // Subscribe before the first read so no append can be missed.
        let wake = session.events().subscribe();
        let (id, cancel) = session.attach_subscriber();
        Ok(Self {
            id,
            session,
            cursor,
            cancel,
            wake,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Sequence number of the last event handed out.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for the next non-empty batch of events after the cursor.
    ///
    /// Returns `None` once the subscriber is cancelled (replaced, or the
    /// session closed) and `Some(Err(..))` if the cursor fell out of the
    /// retention window.
    pub async fn next_batch(&mut self) -> Option<McpResult<Vec<Event>>> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            drop(self.wake.borrow_and_update());

            let batch: Vec<Event> = match self.session.events().read_from(self.cursor) {
                Ok(events) => events.collect(),
                Err(e) => return Some(Err(e)),
            };
            if let Some(last) = batch.last() {
                self.cursor = last.sequence;
                return Some(Ok(batch));
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                changed = self.wake.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.session.detach_subscriber(self.id);
    }
}
