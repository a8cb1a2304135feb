//! Fan-out of records to independent consumer queues.
use crossbeam::channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How a consumer queue behaves when its consumer falls behind.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Never drop; memory grows with consumer lag.
    #[default]
    Unbounded,
    /// Hold at most this many items, dropping the oldest queued item to make room.
    DropOldest(usize),
}

struct Queue<T> {
    name: String,
    tx: Sender<T>,
    // Distributor side handle on a bounded queue used to pop the oldest item when full.
    oldest: Option<Receiver<T>>,
    dropped: u64,
}

/// Broadcasts every published item to every registered queue.
///
/// Each queue gets its own clone of the item, so consumers never share mutable state. Per-queue
/// FIFO order matches publish order; nothing is promised across queues. Publishing never blocks on
/// a consumer.
///
/// A queue whose consumer has gone away is unregistered the next time something is published.
/// [QueuePolicy::DropOldest] queues keep a handle on their own channel and therefore are never
/// seen as disconnected; they stay registered and keep dropping at their capacity instead.
pub struct Distributor<T> {
    queues: Vec<Queue<T>>,
}

impl<T> Default for Distributor<T> {
    fn default() -> Self {
        Distributor { queues: Vec::new() }
    }
}

impl<T: Clone> Distributor<T> {
    /// Create a new queue with the given policy and return its consumer side.
    pub fn register(&mut self, name: &str, policy: QueuePolicy) -> Receiver<T> {
        let (tx, rx, oldest) = match policy {
            QueuePolicy::Unbounded => {
                let (tx, rx) = unbounded();
                (tx, rx, None)
            }
            QueuePolicy::DropOldest(capacity) => {
                let (tx, rx) = bounded(capacity.max(1));
                (tx, rx.clone(), Some(rx))
            }
        };
        debug!(consumer = name, ?policy, "registered consumer");
        self.queues.push(Queue {
            name: name.to_string(),
            tx,
            oldest,
            dropped: 0,
        });
        rx
    }

    /// Register a queue created by the caller. While a bounded channel is full, items for it
    /// are dropped.
    pub fn register_consumer(&mut self, name: &str, tx: Sender<T>) {
        debug!(consumer = name, "registered consumer");
        self.queues.push(Queue {
            name: name.to_string(),
            tx,
            oldest: None,
            dropped: 0,
        });
    }

    /// Hand a copy of `item` to every registered queue.
    pub fn publish(&mut self, item: T) {
        let mut idx = 0;
        while idx < self.queues.len() {
            let queue = &mut self.queues[idx];
            if queue.put(item.clone()) {
                idx += 1;
            } else {
                warn!(consumer = %queue.name, "consumer disconnected; unregistering");
                self.queues.remove(idx);
            }
        }
    }

    /// Number of registered queues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

impl<T> Queue<T> {
    /// Returns false if the consumer is gone.
    fn put(&mut self, item: T) -> bool {
        let item = match self.tx.try_send(item) {
            Ok(()) => return true,
            Err(TrySendError::Disconnected(_)) => return false,
            Err(TrySendError::Full(item)) => item,
        };

        // Make room by dropping the oldest. The consumer may have emptied the queue in the
        // meantime, in which case nothing is dropped.
        if let Some(ref oldest) = self.oldest {
            if oldest.try_recv().is_ok() {
                self.note_drop();
            }
        }
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Disconnected(_)) => false,
            Err(TrySendError::Full(_)) => {
                self.note_drop();
                true
            }
        }
    }

    fn note_drop(&mut self) {
        self.dropped += 1;
        if self.dropped == 1 || self.dropped % 1000 == 0 {
            warn!(
                consumer = %self.name,
                dropped = self.dropped,
                "consumer queue full; dropping"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_queue_gets_every_item_in_order() {
        let mut dist = Distributor::default();
        let a = dist.register("a", QueuePolicy::Unbounded);
        let b = dist.register("b", QueuePolicy::Unbounded);

        for i in 0..5 {
            dist.publish(i);
        }

        assert_eq!(a.try_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(b.try_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn registration_only_sees_future_items() {
        let mut dist = Distributor::default();
        let a = dist.register("a", QueuePolicy::Unbounded);
        dist.publish(1);
        let b = dist.register("b", QueuePolicy::Unbounded);
        dist.publish(2);

        assert_eq!(a.try_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(b.try_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn disconnected_consumer_is_unregistered() {
        let mut dist = Distributor::default();
        let a = dist.register("a", QueuePolicy::Unbounded);
        let b = dist.register("b", QueuePolicy::Unbounded);
        drop(a);

        dist.publish("x".to_string());

        assert_eq!(dist.len(), 1);
        assert_eq!(b.try_iter().collect::<Vec<_>>(), vec!["x".to_string()]);
    }

    #[test]
    fn drop_oldest_keeps_newest() {
        let mut dist = Distributor::default();
        let rx = dist.register("slow", QueuePolicy::DropOldest(3));

        for i in 0..10 {
            dist.publish(i);
        }

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!(dist.len(), 1);
    }

    #[test]
    fn caller_provided_queue() {
        let mut dist = Distributor::default();
        let (tx, rx) = bounded(1);
        dist.register_consumer("mine", tx);

        dist.publish(1);
        dist.publish(2);

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1]);
        assert!(!dist.is_empty());
    }
}
