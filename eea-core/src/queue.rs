//! Bounded queues decoupling the agent's tasks.
//!
//! Two shapes cover every channel in the agent:
//!
//! - [`bounded`]: a fixed-depth FIFO. Multi-producer, single consumer.
//!   Producers never block: a full queue drops the newest element, bumps a
//!   counter, and logs. Consumers poll with [`QueueReceiver::try_recv`].
//! - [`slot`]: a depth-1 latest-wins cell for bundles and persist
//!   requests, where a newer element supersedes an unconsumed older one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};

/// Create a bounded drop-newest FIFO.
pub fn bounded<T>(name: &'static str, depth: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(depth);
    (
        QueueSender {
            name,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        QueueReceiver { name, rx },
    )
}

/// Create a depth-1 replace slot.
pub fn slot<T: Clone>(name: &'static str) -> (SlotSender<T>, SlotReceiver<T>) {
    let (tx, rx) = watch::channel(None);
    (
        SlotSender {
            name,
            tx: Arc::new(tx),
        },
        SlotReceiver { rx },
    )
}

/// Producer half of a bounded FIFO. Cloneable; sends never block.
pub struct QueueSender<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueue without blocking. Returns false when the element was
    /// dropped (queue full or consumer gone).
    pub fn try_send(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(queue = self.name, dropped_total = total, "queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(queue = self.name, "queue consumer gone, message dropped");
                false
            }
        }
    }

    /// Number of elements dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half of a bounded FIFO.
pub struct QueueReceiver<T> {
    #[allow(dead_code)]
    name: &'static str,
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Dequeue without blocking.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Producer half of a replace slot. Cloneable; a newer element always
/// supersedes an unconsumed older one.
pub struct SlotSender<T> {
    name: &'static str,
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for SlotSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> SlotSender<T> {
    /// Place an element in the slot, replacing any pending one.
    pub fn replace(&self, item: T) {
        if self.tx.send(Some(item)).is_err() {
            tracing::warn!(queue = self.name, "slot consumer gone, element dropped");
        }
    }
}

/// Consumer half of a replace slot.
pub struct SlotReceiver<T: Clone> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> SlotReceiver<T> {
    /// Take the latest unconsumed element, if any.
    pub fn take(&mut self) -> Option<T> {
        match self.rx.has_changed() {
            Ok(true) => self.rx.borrow_and_update().clone(),
            Ok(false) | Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let (tx, mut rx) = bounded("test", 4);
        assert!(tx.try_send(1));
        assert!(tx.try_send(2));
        assert!(tx.try_send(3));
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.try_recv(), Some(2));
        assert_eq!(rx.try_recv(), Some(3));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn full_queue_drops_newest() {
        let (tx, mut rx) = bounded("test", 2);
        assert!(tx.try_send("a"));
        assert!(tx.try_send("b"));
        assert!(!tx.try_send("c"));
        assert_eq!(tx.dropped(), 1);
        // the two oldest survive
        assert_eq!(rx.try_recv(), Some("a"));
        assert_eq!(rx.try_recv(), Some("b"));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn senders_share_drop_counter() {
        let (tx, _rx) = bounded("test", 1);
        let tx2 = tx.clone();
        assert!(tx.try_send(1));
        assert!(!tx2.try_send(2));
        assert!(!tx.try_send(3));
        assert_eq!(tx.dropped(), 2);
        assert_eq!(tx2.dropped(), 2);
    }

    #[test]
    fn slot_is_empty_until_filled() {
        let (_tx, mut rx) = slot::<u32>("test");
        assert_eq!(rx.take(), None);
    }

    #[test]
    fn slot_latest_wins() {
        let (tx, mut rx) = slot("test");
        tx.replace(1);
        tx.replace(2);
        assert_eq!(rx.take(), Some(2));
        // consumed; nothing new
        assert_eq!(rx.take(), None);
        tx.replace(3);
        assert_eq!(rx.take(), Some(3));
    }

    #[test]
    fn slot_senders_clone() {
        let (tx, mut rx) = slot("test");
        let tx2 = tx.clone();
        tx.replace("bootstrap");
        tx2.replace("broker");
        assert_eq!(rx.take(), Some("broker"));
    }
}
