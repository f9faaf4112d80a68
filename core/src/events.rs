//! Process-wide typed publisher/subscriber bus (C9).
//!
//! In-process analogue of a UDP `Sender`/`Listener` pair: instead of
//! broadcasting over a socket, publishers append to each subscriber's queue
//! directly.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::errors::LooperError;

/// The closed set of events the bus can carry (§3 `Event`, §6 command
/// channel variants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OpenFile,
    SeekToTime(f64),
    LoopPointsChanged,
    AudioError {
        kind: ErrorKind,
        message: String,
    },
}

/// Coarse classification of a [`LooperError`] for `lastError`/`AudioError`
/// reporting, matching §7's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    File,
    Decode,
    Format,
    Empty,
    Alloc,
    Engine,
    Cancelled,
    Internal,
}

impl From<&LooperError> for ErrorKind {
    fn from(e: &LooperError) -> Self {
        match e {
            LooperError::ErrFile(_) => Self::File,
            LooperError::ErrDecode(_) => Self::Decode,
            LooperError::ErrFormat(_) => Self::Format,
            LooperError::ErrEmpty => Self::Empty,
            LooperError::ErrAlloc(_) => Self::Alloc,
            LooperError::ErrEngine(_) => Self::Engine,
            LooperError::ErrCancelled => Self::Cancelled,
            LooperError::ErrInternal(_) => Self::Internal,
        }
    }
}

impl Event {
    #[must_use]
    pub fn audio_error(error: &LooperError) -> Self {
        Self::AudioError {
            kind: ErrorKind::from(error),
            message: error.to_string(),
        }
    }
}

/// A process-wide publisher. Subscribers are added/removed concurrently;
/// delivery to a given subscriber is serialized by its own unbounded queue,
/// so publication order is preserved per-subscriber.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<Event>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber, returning a handle to its receiver.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        EventSubscription { rx }
    }

    /// Publishes `event` to every live subscriber. Best-effort: subscribers
    /// whose receiver has been dropped are pruned, not reported as errors.
    pub fn publish(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// A live subscription to the [`EventBus`]; dropping it unsubscribes.
pub struct EventSubscription {
    rx: UnboundedReceiver<Event>,
}

impl EventSubscription {
    /// Awaits the next published event, or `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_every_event_in_order() {
        let bus = EventBus::new();
        let mut subs: Vec<EventSubscription> = (0..3).map(|_| bus.subscribe()).collect();

        bus.publish(Event::OpenFile);
        bus.publish(Event::SeekToTime(1.5));

        for sub in &mut subs {
            assert_eq!(sub.recv().await, Some(Event::OpenFile));
            assert_eq!(sub.recv().await, Some(Event::SeekToTime(1.5)));
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned_on_next_publish() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe();
        }
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(Event::LoopPointsChanged);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn audio_error_carries_a_classified_kind() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(Event::audio_error(&LooperError::ErrEmpty));
        match sub.recv().await {
            Some(Event::AudioError { kind, .. }) => assert_eq!(kind, ErrorKind::Empty),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
