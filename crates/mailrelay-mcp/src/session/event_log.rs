//! Per-session append-only log of outbound messages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::watch;

use crate::types::{McpError, McpResult};

/// Default number of events retained per session.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Reply correlated with a client request.
    Response,
    /// Server-initiated notification.
    Notification,
}

/// One sequence-numbered message. Immutable once appended.
#[derive(Debug, Clone)]
pub struct Event {
    pub sequence: u64,
    pub kind: EventKind,
    pub payload: Arc<str>,
}

impl Event {
    pub fn message(&self) -> McpResult<Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

struct LogInner {
    events: VecDeque<Event>,
    last_sequence: u64,
}

/// Bounded event buffer. Appends wake every receiver returned by
/// [`EventLog::subscribe`].
pub struct EventLog {
    inner: Mutex<LogInner>,
    notify: watch::Sender<u64>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            inner: Mutex::new(LogInner {
                events: VecDeque::new(),
                last_sequence: 0,
            }),
            notify,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a message and return its sequence number.
    pub fn append(&self, kind: EventKind, message: &Value) -> u64 {
        let payload: Arc<str> = Arc::from(message.to_string());
        let mut inner = self.lock();
        inner.last_sequence += 1;
        let sequence = inner.last_sequence;
        inner.events.push_back(Event {
            sequence,
            kind,
            payload,
        });
        while inner.events.len() > self.capacity {
            inner.events.pop_front();
        }
        // Published under the lock so receivers never observe a sequence
        // that is not yet readable.
        self.notify.send_replace(sequence);
        sequence
    }

    /// Snapshot of every retained event after `last_seen`, in order.
    pub fn read_from(&self, last_seen: u64) -> McpResult<impl Iterator<Item = Event>> {
        let inner = self.lock();
        Self::check(&inner, last_seen)?;
        let batch: Vec<Event> = inner
            .events
            .iter()
            .skip_while(|e| e.sequence <= last_seen)
            .cloned()
            .collect();
        Ok(batch.into_iter())
    }

    /// Fail the way [`read_from`](Self::read_from) would for this cursor.
    pub fn validate_cursor(&self, last_seen: u64) -> McpResult<()> {
        Self::check(&self.lock(), last_seen)
    }

    fn check(inner: &LogInner, last_seen: u64) -> McpResult<()> {
        if last_seen > inner.last_sequence {
            return Err(McpError::InvalidRequest(format!(
                "Last-Event-ID {last_seen} is ahead of the last assigned event {}",
                inner.last_sequence
            )));
        }
        let oldest = Self::first_retained_in(inner);
        if last_seen + 1 < oldest {
            return Err(McpError::ResumeWindowExceeded {
                requested: last_seen,
                oldest,
            });
        }
        Ok(())
    }

    fn first_retained_in(inner: &LogInner) -> u64 {
        inner
            .events
            .front()
            .map(|e| e.sequence)
            .unwrap_or(inner.last_sequence + 1)
    }

    pub fn last_sequence(&self) -> u64 {
        self.lock().last_sequence
    }

    /// Sequence number of the oldest retained event, or the next one to be
    /// assigned when nothing is retained.
    pub fn first_retained(&self) -> u64 {
        Self::first_retained_in(&self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Receiver that changes on every append.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sequences(log: &EventLog, after: u64) -> Vec<u64> {
        log.read_from(after).unwrap().map(|e| e.sequence).collect()
    }

    #[test]
    fn test_sequences_start_at_one() {
        let log = EventLog::new(10);
        assert_eq!(log.append(EventKind::Response, &json!({"n": 1})), 1);
        assert_eq!(log.append(EventKind::Notification, &json!({"n": 2})), 2);
        assert_eq!(log.last_sequence(), 2);
        assert_eq!(sequences(&log, 0), vec![1, 2]);
        assert_eq!(sequences(&log, 1), vec![2]);
        assert!(sequences(&log, 2).is_empty());
    }

    #[test]
    fn test_payload_round_trips() {
        let log = EventLog::new(10);
        log.append(EventKind::Response, &json!({"jsonrpc": "2.0", "id": 1}));
        let event = log.read_from(0).unwrap().next().unwrap();
        assert_eq!(event.kind, EventKind::Response);
        assert_eq!(event.message().unwrap()["id"], 1);
    }

    #[test]
    fn test_eviction_is_distinguishable() {
        let log = EventLog::new(3);
        for n in 0..5 {
            log.append(EventKind::Response, &json!(n));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.first_retained(), 3);
        // Cursor 2 still lines up with the oldest retained event.
        assert_eq!(sequences(&log, 2), vec![3, 4, 5]);

        let err = log.read_from(1).err().unwrap();
        assert!(matches!(
            err,
            McpError::ResumeWindowExceeded {
                requested: 1,
                oldest: 3
            }
        ));
    }

    #[test]
    fn test_future_cursor_rejected() {
        let log = EventLog::new(3);
        log.append(EventKind::Response, &json!(1));
        assert!(matches!(
            log.validate_cursor(5),
            Err(McpError::InvalidRequest(_))
        ));
        assert!(log.validate_cursor(1).is_ok());
    }

    #[test]
    fn test_concurrent_appends_are_totally_ordered() {
        let log = Arc::new(EventLog::new(10_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for n in 0..250 {
                        log.append(EventKind::Response, &json!(n));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = sequences(&log, 0);
        assert_eq!(seen.len(), 2000);
        assert!(seen.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[tokio::test]
    async fn test_append_wakes_receiver() {
        let log = EventLog::new(10);
        let mut rx = log.subscribe();
        log.append(EventKind::Response, &json!(1));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
    }
}
