//! Subscriber fan-out for coordinator events
//!
//! Each subscriber owns an unbounded channel, so a slow consumer never causes
//! another subscriber to miss events. Emission holds the subscriber list lock,
//! which keeps the order identical across subscribers when several tasks emit
//! concurrently.

use parking_lot::Mutex;
use tokio::sync::mpsc;

pub type EventReceiver<E> = mpsc::UnboundedReceiver<E>;

pub struct EventBus<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone> EventBus<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber that receives every event emitted from now on
    pub fn subscribe(&self) -> EventReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber; dropped receivers are pruned.
    pub fn emit(&self, event: E) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
