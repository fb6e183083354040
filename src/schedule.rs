//! Deadline-ordered task queue with cancellable handles.
//!
//! The engine runs on the host's single logical thread. Nothing here sleeps or
//! spawns: the host asks for the next deadline, waits however it likes, and
//! then pumps due tasks. Cancelling a handle removes the task before it can
//! fire, which is how a batch finalized by count cancels its timeout.

use crate::types::Timestamp;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Handle to a scheduled task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(u64);

/// Tasks are popped by deadline, then by scheduling order.
#[derive(Debug)]
pub struct TaskQueue<T> {
    heap: BinaryHeap<Reverse<(Timestamp, u64)>>,
    tasks: HashMap<u64, T>,
    next_seq: u64,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            tasks: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `task` to become due at `at`.
    pub fn schedule(&mut self, at: Timestamp, task: T) -> TaskHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((at, seq)));
        self.tasks.insert(seq, task);
        TaskHandle(seq)
    }

    /// Cancel a pending task. Returns it if it had not fired yet.
    pub fn cancel(&mut self, handle: TaskHandle) -> Option<T> {
        self.tasks.remove(&handle.0)
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.tasks.contains_key(&handle.0)
    }

    /// Deadline of the earliest live task.
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Marker separating tasks scheduled so far from tasks scheduled later.
    pub fn barrier(&self) -> TaskHandle {
        TaskHandle(self.next_seq)
    }

    /// Pop the earliest task due at `now`.
    pub fn pop_due(&mut self, now: Timestamp) -> Option<(TaskHandle, T)> {
        self.pop_due_before(now, TaskHandle(u64::MAX))
    }

    /// Pop the earliest task due at `now` that was scheduled before `barrier`.
    ///
    /// Tasks scheduled after the barrier stay queued even if already due, so a
    /// task that reschedules itself runs again on the next pump, not this one.
    pub fn pop_due_before(
        &mut self,
        now: Timestamp,
        barrier: TaskHandle,
    ) -> Option<(TaskHandle, T)> {
        self.discard_cancelled();

        let mut deferred = Vec::new();
        let mut found = None;
        while let Some(Reverse((at, seq))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            if seq >= barrier.0 {
                deferred.push(Reverse((at, seq)));
                continue;
            }
            if let Some(task) = self.tasks.remove(&seq) {
                found = Some((TaskHandle(seq), task));
                break;
            }
        }
        self.heap.extend(deferred);
        found
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.tasks.clear();
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, seq))) = self.heap.peek() {
            if self.tasks.contains_key(seq) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_in_deadline_order() {
        let mut queue = TaskQueue::new();
        queue.schedule(Timestamp(30), "c");
        queue.schedule(Timestamp(10), "a");
        queue.schedule(Timestamp(20), "b");

        assert_eq!(queue.next_deadline(), Some(Timestamp(10)));
        assert!(queue.pop_due(Timestamp(5)).is_none());

        let mut fired = Vec::new();
        while let Some((_, task)) = queue.pop_due(Timestamp(100)) {
            fired.push(task);
        }
        assert_eq!(fired, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_same_deadline_is_fifo() {
        let mut queue = TaskQueue::new();
        queue.schedule(Timestamp(10), 1);
        queue.schedule(Timestamp(10), 2);
        queue.schedule(Timestamp(10), 3);

        let fired: Vec<_> = std::iter::from_fn(|| queue.pop_due(Timestamp(10)).map(|(_, t)| t)).collect();
        assert_eq!(fired, vec![1, 2, 3]);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let mut queue = TaskQueue::new();
        let handle = queue.schedule(Timestamp(10), "timeout");
        assert!(queue.is_pending(handle));
        assert_eq!(queue.cancel(handle), Some("timeout"));
        assert!(!queue.is_pending(handle));
        assert_eq!(queue.cancel(handle), None);
        assert!(queue.pop_due(Timestamp(100)).is_none());
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_barrier_defers_later_tasks() {
        let mut queue = TaskQueue::new();
        queue.schedule(Timestamp(0), "first");
        let barrier = queue.barrier();
        queue.schedule(Timestamp(0), "rescheduled");

        let (_, task) = queue.pop_due_before(Timestamp(0), barrier).unwrap();
        assert_eq!(task, "first");
        assert!(queue.pop_due_before(Timestamp(0), barrier).is_none());
        assert_eq!(queue.len(), 1);

        let (_, task) = queue.pop_due(Timestamp(0)).unwrap();
        assert_eq!(task, "rescheduled");
    }
}
