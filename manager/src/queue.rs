//! Bounded FIFO of pending transfers shared by the dispatcher and the workers.
//!
//! The entries live in a fixed ring of `capacity` slots guarded by a mutex that is only ever
//! held for slot bookkeeping, never across an `.await`. Waiting is done on [`Notify`] handles
//! that are armed before the state is checked, so a wake-up sent between the check and the
//! wait is not lost.

use common::PairKey;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::task::QueueEntry;

#[derive(Debug)]
struct Ring {
    slots: Vec<Option<QueueEntry>>,
    head: usize,
    tail: usize,
    count: usize,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    fn push(&mut self, entry: QueueEntry) {
        debug_assert!(!self.is_full());
        self.slots[self.tail] = Some(entry);
        self.tail = (self.tail + 1) % self.capacity();
        self.count += 1;
    }

    fn pop(&mut self) -> Option<QueueEntry> {
        if self.count == 0 {
            return None;
        }
        let entry = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.count -= 1;
        entry
    }

    /// Swap-and-shrink removal of every entry belonging to `key`.
    fn remove_matching(&mut self, key: &PairKey) -> usize {
        let capacity = self.capacity();
        let mut removed = 0;
        let mut offset = 0;
        while offset < self.count {
            let index = (self.head + offset) % capacity;
            let matches = self.slots[index]
                .as_ref()
                .and_then(QueueEntry::source)
                .is_some_and(|source| source == key);
            if !matches {
                offset += 1;
                continue;
            }
            let last = (self.head + self.count - 1) % capacity;
            let moved = self.slots[last].take();
            if index != last {
                self.slots[index] = moved;
            }
            self.tail = last;
            self.count -= 1;
            removed += 1;
            // the slot at `offset` now holds an unchecked entry
        }
        if self.count == 0 {
            self.head = 0;
            self.tail = 0;
        }
        removed
    }
}

#[derive(Debug)]
pub struct TaskQueue {
    ring: Mutex<Ring>,
    not_empty: Notify,
    not_full: Notify,
    drained: Notify,
}

impl TaskQueue {
    /// Creates a queue holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                count: 0,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            drained: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `entry`, waiting while the queue is full.
    pub async fn enqueue(&self, entry: QueueEntry) {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut ring = self.lock();
                if !ring.is_full() {
                    ring.push(entry);
                    drop(ring);
                    self.not_empty.notify_one();
                    return;
                }
            }
            notified.await;
        }
    }

    /// Takes the oldest entry, waiting while the queue is empty.
    pub async fn dequeue(&self) -> QueueEntry {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let popped = {
                let mut ring = self.lock();
                ring.pop().map(|entry| (entry, ring.count))
            };
            if let Some((entry, remaining)) = popped {
                self.not_full.notify_one();
                if remaining == 0 {
                    self.drained.notify_waiters();
                }
                return entry;
            }
            notified.await;
        }
    }

    /// Removes every queued transfer whose source is `key` and returns how many were removed.
    ///
    /// Entries already handed to a worker are not affected. Order of the surviving entries
    /// may change.
    pub fn cancel_matching(&self, key: &PairKey) -> usize {
        let (removed, remaining) = {
            let mut ring = self.lock();
            let removed = ring.remove_matching(key);
            (removed, ring.count)
        };
        if removed > 0 {
            self.not_full.notify_waiters();
            if remaining == 0 {
                self.drained.notify_waiters();
            }
        }
        removed
    }

    /// Resolves once the queue holds no entries.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn transfer(file: &str, source: &str) -> QueueEntry {
        QueueEntry::Transfer(Task::new(
            file,
            PairKey::from(source),
            PairKey::from("backup@127.0.0.1:9002"),
        ))
    }

    fn filename(entry: &QueueEntry) -> String {
        match entry {
            QueueEntry::Transfer(task) => task.filename.clone(),
            QueueEntry::Shutdown => "<shutdown>".to_string(),
        }
    }

    #[tokio::test]
    async fn single_consumer_sees_fifo_order() {
        let queue = TaskQueue::new(4);
        for file in ["a", "b", "c"] {
            queue.enqueue(transfer(file, "docs@h:1")).await;
        }
        queue.enqueue(QueueEntry::Shutdown).await;
        assert_eq!(queue.len(), 4);
        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(filename(&queue.dequeue().await));
        }
        assert_eq!(order, ["a", "b", "c", "<shutdown>"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn enqueue_waits_while_full() {
        let queue = Arc::new(TaskQueue::new(2));
        queue.enqueue(transfer("a", "docs@h:1")).await;
        queue.enqueue(transfer("b", "docs@h:1")).await;
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(transfer("c", "docs@h:1")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 2);
        assert_eq!(filename(&queue.dequeue().await), "a");
        tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .expect("producer should be woken")
            .unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(filename(&queue.dequeue().await), "b");
        assert_eq!(filename(&queue.dequeue().await), "c");
    }

    #[tokio::test]
    async fn dequeue_waits_while_empty() {
        let queue = Arc::new(TaskQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!consumer.is_finished());
        queue.enqueue(transfer("late", "docs@h:1")).await;
        let entry = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer should be woken")
            .unwrap();
        assert_eq!(filename(&entry), "late");
    }

    #[tokio::test]
    async fn cancel_removes_exactly_the_matching_pair() {
        let queue = TaskQueue::new(5);
        // move head away from slot 0 so the live window wraps around
        queue.enqueue(transfer("x1", "docs@h:1")).await;
        queue.enqueue(transfer("x2", "docs@h:1")).await;
        queue.dequeue().await;
        queue.dequeue().await;
        for (file, source) in [
            ("a1", "docs@h:1"),
            ("b1", "pics@h:1"),
            ("a2", "docs@h:1"),
            ("b2", "pics@h:1"),
            ("a3", "docs@h:1"),
        ] {
            queue.enqueue(transfer(file, source)).await;
        }
        assert_eq!(queue.cancel_matching(&PairKey::from("docs@h:1")), 3);
        assert_eq!(queue.len(), 2);
        let mut left = HashSet::new();
        left.insert(filename(&queue.dequeue().await));
        left.insert(filename(&queue.dequeue().await));
        assert_eq!(left, HashSet::from(["b1".to_string(), "b2".to_string()]));
    }

    #[tokio::test]
    async fn cancel_of_unknown_pair_keeps_everything() {
        let queue = TaskQueue::new(3);
        queue.enqueue(transfer("a", "docs@h:1")).await;
        queue.enqueue(QueueEntry::Shutdown).await;
        assert_eq!(queue.cancel_matching(&PairKey::from("pics@h:1")), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(filename(&queue.dequeue().await), "a");
    }

    #[tokio::test]
    async fn cancel_of_everything_resets_the_ring() {
        let queue = TaskQueue::new(3);
        queue.enqueue(transfer("x", "pics@h:1")).await;
        queue.dequeue().await;
        queue.enqueue(transfer("a", "docs@h:1")).await;
        queue.enqueue(transfer("b", "docs@h:1")).await;
        assert_eq!(queue.cancel_matching(&PairKey::from("docs@h:1")), 2);
        {
            let ring = queue.lock();
            assert_eq!((ring.head, ring.tail, ring.count), (0, 0, 0));
            assert!(ring.slots.iter().all(Option::is_none));
        }
        tokio::time::timeout(Duration::from_secs(5), queue.wait_until_empty())
            .await
            .expect("queue is empty");
    }

    #[tokio::test]
    async fn cancel_wakes_blocked_producer() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.enqueue(transfer("a", "docs@h:1")).await;
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(transfer("b", "pics@h:1")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.cancel_matching(&PairKey::from("docs@h:1")), 1);
        tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .expect("producer should be woken")
            .unwrap();
        assert_eq!(filename(&queue.dequeue().await), "b");
    }

    #[tokio::test]
    async fn wait_until_empty_follows_the_last_dequeue() {
        let queue = Arc::new(TaskQueue::new(4));
        queue.enqueue(QueueEntry::Shutdown).await;
        queue.enqueue(QueueEntry::Shutdown).await;
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_until_empty().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        queue.dequeue().await;
        queue.dequeue().await;
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_and_consumers_stay_bounded() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 100;
        const CONSUMERS: usize = 3;
        let queue = Arc::new(TaskQueue::new(8));
        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..PER_PRODUCER {
                    queue.enqueue(transfer(&format!("{p}-{i}"), "docs@h:1")).await;
                }
            }));
        }
        let mut consumers = Vec::new();
        for _ in 0..CONSUMERS {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                loop {
                    assert!(queue.len() <= queue.capacity());
                    match queue.dequeue().await {
                        QueueEntry::Shutdown => return seen,
                        entry => seen.push(filename(&entry)),
                    }
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        for _ in 0..CONSUMERS {
            queue.enqueue(QueueEntry::Shutdown).await;
        }
        let mut all = HashSet::new();
        for consumer in consumers {
            for file in consumer.await.unwrap() {
                assert!(all.insert(file), "entry delivered twice");
            }
        }
        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
        assert!(queue.is_empty());
    }
}
