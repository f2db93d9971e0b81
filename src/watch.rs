//! Change notifications for managed values.
//!
//! Every initialization and every write through a
//! [`ManagedValue`](crate::managed::ManagedValue) is published on a
//! broadcast channel; subscribers receive the events whose key matches
//! their pattern.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::Stream;

/// Type of change that occurred to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// The key was loaded into the cache from storage (or its default).
    Initialized,
    /// A consumer wrote a new value.
    Updated,
}

/// An event representing a change to a cached key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    /// The key that changed.
    pub key: String,
    /// Type of change.
    pub event_type: EventType,
    /// The value now held by the cache.
    pub value: Value,
}

impl WatchEvent {
    /// Create a new Initialized event.
    pub fn initialized(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Initialized,
            value,
        }
    }

    /// Create a new Updated event.
    pub fn updated(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Updated,
            value,
        }
    }
}

/// A stream of watch events for a specific pattern.
///
/// Pattern can be an exact key or end with `*` for prefix matching.
pub struct WatchStream {
    inner: BroadcastStream<WatchEvent>,
    pattern: String,
}

impl WatchStream {
    /// Create a new watch stream for the given pattern.
    pub fn new(receiver: broadcast::Receiver<WatchEvent>, pattern: impl Into<String>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            pattern: pattern.into(),
        }
    }

    /// Get the pattern this stream is watching.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn matches(&self, key: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == self.pattern,
        }
    }
}

impl Stream for WatchStream {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(event)) => {
                    if self.matches(&event.key) {
                        return Poll::Ready(Some(event));
                    }
                }
                // Slow subscribers skip what they missed; the cache holds
                // the current value anyway.
                Some(Err(BroadcastStreamRecvError::Lagged(_))) => continue,
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Handle for sending watch events to subscribers.
#[derive(Clone)]
pub struct WatchSender {
    sender: broadcast::Sender<WatchEvent>,
}

impl WatchSender {
    /// Create a new watch sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    pub fn send(&self, event: WatchEvent) {
        // Fails only when nobody is subscribed.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self, pattern: impl Into<String>) -> WatchStream {
        WatchStream::new(self.sender.subscribe(), pattern)
    }

    /// Get the number of current subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WatchSender {
    fn default() -> Self {
        Self::new(256)
    }
}
