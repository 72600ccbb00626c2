//! Priority queue of pending tasks.
//!
//! Ordering: descending priority, then ascending complexity, then batch
//! order. Workers pop exclusively; the queue is never reordered after a pop.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use crate::task::Task;

#[derive(Debug)]
struct QueuedTask {
    index: usize,
    task: Task,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    /// Greater means popped first from the max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .total_cmp(&other.task.priority)
            .then_with(|| other.task.complexity.total_cmp(&self.task.complexity))
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Shared task queue.
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<QueuedTask>>,
}

impl TaskQueue {
    /// Builds a queue; each task remembers its position in `tasks`.
    pub fn new(tasks: Vec<Task>) -> Self {
        let heap = tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| QueuedTask { index, task })
            .collect();
        Self {
            heap: Mutex::new(heap),
        }
    }

    /// Next task and its batch index.
    pub fn pop(&self) -> Option<(usize, Task)> {
        self.heap
            .lock()
            .ok()?
            .pop()
            .map(|queued| (queued.index, queued.task))
    }

    /// Removes every remaining task, in queue order.
    pub fn drain(&self) -> Vec<(usize, Task)> {
        let mut drained = Vec::new();
        while let Some(next) = self.pop() {
            drained.push(next);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.heap.lock().map(|heap| heap.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, priority: f64, complexity: f64) -> Task {
        Task::new(id, "src.py", "test_src.py", "p")
            .with_priority(priority)
            .with_complexity(complexity)
    }

    #[test]
    fn test_priority_then_complexity_then_order() {
        let queue = TaskQueue::new(vec![
            task("low", 1.0, 1.0),
            task("high-complex", 9.0, 8.0),
            task("high-simple", 9.0, 2.0),
            task("mid", 5.0, 1.0),
            task("high-simple-later", 9.0, 2.0),
        ]);
        let order: Vec<String> = queue.drain().into_iter().map(|(_, t)| t.id).collect();
        assert_eq!(
            order,
            vec!["high-simple", "high-simple-later", "high-complex", "mid", "low"]
        );
    }

    #[test]
    fn test_pop_keeps_batch_index() {
        let queue = TaskQueue::new(vec![task("a", 1.0, 0.0), task("b", 2.0, 0.0)]);
        assert_eq!(queue.len(), 2);
        let (index, first) = queue.pop().unwrap();
        assert_eq!((index, first.id.as_str()), (1, "b"));
        let (index, _) = queue.pop().unwrap();
        assert_eq!(index, 0);
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_nan_priority_does_not_panic() {
        let queue = TaskQueue::new(vec![task("nan", f64::NAN, 0.0), task("one", 1.0, 0.0)]);
        assert_eq!(queue.drain().len(), 2);
    }
}
