//! Live event stream over a subscriber: replay first, then wake on append.

use std::collections::VecDeque;

use futures::stream::{self, Stream};

use crate::session::{Event, Subscriber};
use crate::types::McpError;

#[derive(Debug)]
pub enum StreamItem {
    Event(Event),
    /// The reader fell out of the retention window; nothing follows.
    Lagged(McpError),
}

struct StreamState {
    subscriber: Subscriber,
    buffered: VecDeque<Event>,
    finished: bool,
}

/// Turn a subscriber into a stream of events. The stream ends when the
/// subscriber is cancelled; dropping it detaches the subscriber.
pub fn subscriber_stream(subscriber: Subscriber) -> impl Stream<Item = StreamItem> + Send {
    let state = StreamState {
        subscriber,
        buffered: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.buffered.pop_front() {
                return Some((StreamItem::Event(event), state));
            }
            if state.finished {
                return None;
            }
            match state.subscriber.next_batch().await {
                None => return None,
                Some(Ok(batch)) => state.buffered.extend(batch),
                Some(Err(e)) => {
                    tracing::warn!(
                        "Session {}: subscriber {} lagged: {e}",
                        state.subscriber.session().id(),
                        state.subscriber.id()
                    );
                    state.finished = true;
                    return Some((StreamItem::Lagged(e), state));
                }
            }
        }
    })
}
