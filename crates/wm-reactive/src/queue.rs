#![forbid(unsafe_code)]

//! Single-threaded cooperative task queue.
//!
//! Everything in the composer runs on one thread. Work that must not happen
//! inside the event handler that triggered it (network completions,
//! debounced recomputation) is pushed onto a [`TaskQueue`] and runs when the
//! host drains the queue, one task at a time, in FIFO order.
//!
//! Keyed tasks coalesce: while a task with a given key is waiting, scheduling
//! the same key again is a no-op. This is the one-tick debounce used for
//! derived state that is expensive to rebuild during bursts of input.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

struct Task {
    key: Option<String>,
    run: Box<dyn FnOnce()>,
}

#[derive(Default)]
struct QueueInner {
    tasks: VecDeque<Task>,
    waiting_keys: HashSet<String>,
    executed: u64,
}

/// Cloneable handle to a FIFO of deferred tasks. All clones share one queue.
#[derive(Clone, Default)]
pub struct TaskQueue {
    inner: Rc<RefCell<QueueInner>>,
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task.
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.inner.borrow_mut().tasks.push_back(Task {
            key: None,
            run: Box::new(task),
        });
    }

    /// Append a task unless one with the same key is already waiting.
    ///
    /// Returns `true` if the task was enqueued. A waiting task keeps its
    /// place in the queue; the new closure is discarded.
    pub fn schedule_keyed(&self, key: impl Into<String>, task: impl FnOnce() + 'static) -> bool {
        let key = key.into();
        let mut inner = self.inner.borrow_mut();
        if !inner.waiting_keys.insert(key.clone()) {
            tracing::trace!(key = %key, "keyed task already waiting; coalesced");
            return false;
        }
        inner.tasks.push_back(Task {
            key: Some(key),
            run: Box::new(task),
        });
        true
    }

    /// Run the oldest waiting task. Returns `false` if the queue was empty.
    ///
    /// The task's key is released before it runs, so a task may schedule
    /// its own successor.
    pub fn run_next(&self) -> bool {
        let task = {
            let mut inner = self.inner.borrow_mut();
            let Some(task) = inner.tasks.pop_front() else {
                return false;
            };
            if let Some(key) = &task.key {
                inner.waiting_keys.remove(key);
            }
            inner.executed += 1;
            task
        };
        (task.run)();
        true
    }

    /// Drain the queue, including tasks scheduled by the tasks being run.
    /// Returns how many tasks ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        if ran > 0 {
            tracing::trace!(ran, "task queue drained");
        }
        ran
    }

    /// Number of tasks waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.borrow().tasks.is_empty()
    }

    /// Whether a task with `key` is waiting.
    #[must_use]
    pub fn is_waiting(&self, key: &str) -> bool {
        self.inner.borrow().waiting_keys.contains(key)
    }

    /// Total number of tasks run since creation.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.inner.borrow().executed
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("TaskQueue")
            .field("pending", &inner.tasks.len())
            .field("executed", &inner.executed)
            .finish()
    }
}
