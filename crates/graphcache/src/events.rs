//! Change notifications for cache subscribers.

use futures::channel::mpsc;

use crate::key::CacheKey;

/// One store mutation, delivered to subscribers in the order it was applied.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheEvent {
    /// Fields of the record under `key` were created or changed.
    Written { key: CacheKey, fields: Vec<String> },
    /// The record under `from` moved to `to`.
    Rekeyed { from: CacheKey, to: CacheKey },
}

#[derive(Default)]
pub(crate) struct Notifier {
    subscribers: Vec<mpsc::UnboundedSender<CacheEvent>>,
}

impl Notifier {
    pub(crate) fn subscribe(&mut self) -> mpsc::UnboundedReceiver<CacheEvent> {
        let (sender, receiver) = mpsc::unbounded();
        self.subscribers.push(sender);
        receiver
    }

    pub(crate) fn publish(&mut self, events: Vec<CacheEvent>) {
        if events.is_empty() {
            return;
        }

        self.subscribers.retain(|sender| !sender.is_closed());

        for event in events {
            for sender in &self.subscribers {
                // A receiver dropped mid-flush is pruned on the next publish
                let _ = sender.unbounded_send(event.clone());
            }
        }
    }
}
