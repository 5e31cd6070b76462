//! Bounded async priority queue.
//!
//! Items are served by ascending [`TaskPriority`] value, FIFO within a level.
//! Two semaphores model the bound: `slots` counts free capacity (producers
//! suspend on it when full) and `items` counts queued entries (consumers
//! suspend on it when empty). Closing the queue wakes every waiter.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::Semaphore;

use super::priority::TaskPriority;

/// Returned by [`PriorityQueue::push`] when the queue is closed, handing the
/// item back to the caller.
#[derive(Debug)]
pub struct QueueClosed<T>(pub T);

struct Entry<T> {
    priority: TaskPriority,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // BinaryHeap is a max-heap: the lowest priority value and the earliest
    // submission must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<T> {
    heap: BinaryHeap<Entry<T>>,
    closed: bool,
}

/// Bounded priority queue with suspending `push` and `pop`.
pub struct PriorityQueue<T> {
    state: Mutex<QueueState<T>>,
    slots: Semaphore,
    items: Semaphore,
    next_seq: AtomicU64,
    capacity: usize,
}

impl<T> PriorityQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::with_capacity(capacity),
                closed: false,
            }),
            slots: Semaphore::new(capacity),
            items: Semaphore::new(0),
            next_seq: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Enqueue `item`, suspending while the queue is full.
    ///
    /// Returns the submission sequence number.
    pub async fn push(&self, priority: TaskPriority, item: T) -> Result<u64, QueueClosed<T>> {
        let permit = match self.slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(QueueClosed(item)),
        };

        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueClosed(item));
        }
        permit.forget();

        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        state.heap.push(Entry { priority, seq, item });
        drop(state);

        self.items.add_permits(1);
        Ok(seq)
    }

    /// Dequeue the highest-priority item, suspending while the queue is
    /// empty. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<T> {
        let permit = self.items.acquire().await.ok()?;
        permit.forget();

        let entry = self.state.lock().heap.pop()?;
        self.slots.add_permits(1);
        Some(entry.item)
    }

    /// Close the queue and return every remaining item in service order.
    ///
    /// Blocked producers fail with [`QueueClosed`], blocked consumers get `None`.
    pub fn close(&self) -> Vec<T> {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.heap)
        };
        self.slots.close();
        self.items.close();

        // into_sorted_vec is ascending; the next-to-serve entry is greatest.
        drained
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|entry| entry.item)
            .collect()
    }
}

impl<T> std::fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pops_by_priority_then_fifo() {
        let queue = PriorityQueue::new(10);
        queue.push(TaskPriority::Low, "low-1").await.unwrap();
        queue.push(TaskPriority::Critical, "critical").await.unwrap();
        queue.push(TaskPriority::Low, "low-2").await.unwrap();
        queue.push(TaskPriority::High, "high").await.unwrap();

        assert_eq!(queue.pop().await, Some("critical"));
        assert_eq!(queue.pop().await, Some("high"));
        assert_eq!(queue.pop().await, Some("low-1"));
        assert_eq!(queue.pop().await, Some("low-2"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_blocks_when_full() {
        let queue = Arc::new(PriorityQueue::new(1));
        queue.push(TaskPriority::Medium, 1).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(TaskPriority::Medium, 2).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.pop().await, Some(1));
        assert!(producer.await.unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_close_drains_in_service_order_and_wakes_waiters() {
        let queue = Arc::new(PriorityQueue::new(2));
        queue.push(TaskPriority::Background, "bg").await.unwrap();
        queue.push(TaskPriority::Critical, "crit").await.unwrap();

        let blocked = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(TaskPriority::High, "late").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let drained = queue.close();
        assert_eq!(drained, vec!["crit", "bg"]);

        let QueueClosed(item) = blocked.await.unwrap().unwrap_err();
        assert_eq!(item, "late");
        assert_eq!(queue.pop().await, None);
    }
}
