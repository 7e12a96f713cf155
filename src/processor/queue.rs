//! Priority task queue.

use super::ProcessingTask;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Queued {
    priority: i32,
    seq: u64,
    task: ProcessingTask,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<Reverse<Queued>>,
    next_seq: u64,
}

/// Thread-safe queue ordered by `(priority, insertion sequence)`.
///
/// Lower priorities pop first; equal priorities pop in insertion order.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<Inner>,
}

impl TaskQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a task.
    pub fn push(&self, task: ProcessingTask) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Reverse(Queued {
            priority: task.priority,
            seq,
            task,
        }));
    }

    /// Take the next task, if any.
    pub fn pop(&self) -> Option<ProcessingTask> {
        self.lock().heap.pop().map(|Reverse(q)| q.task)
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Drop every queued task, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.heap.len();
        inner.heap.clear();
        removed
    }
}
