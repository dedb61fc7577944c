//! Cooperative, single-thread task scheduler bound to one module.
//!
//! The scheduler never spawns anything. The host calls [`Scheduler::update`]
//! once per tick; the call reads the bound [`Clock`] and hands back the
//! payloads of every task that has come due, in the order they should run.
//! The owner (a module's runtime wrapper) invokes them, so no two tasks of the
//! same module ever run at the same time.
//!
//! # Ordering
//!
//! Tasks run in due-time order. Tasks due at the same instant run in the order
//! they were registered, including repeating tasks that have been rescheduled
//! many times.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use modhost::clock::ManualClock;
//! use modhost::scheduler::Scheduler;
//!
//! let clock = ManualClock::new();
//! let mut scheduler = Scheduler::new(Arc::new(clock.clone()));
//! scheduler.add_delayed("poll", Duration::from_millis(100), true);
//!
//! assert!(scheduler.update().is_empty());
//! clock.advance(Duration::from_millis(100));
//! assert_eq!(scheduler.update(), vec!["poll"]);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;

/// Identifies a scheduled task so it can be cancelled individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

#[derive(Debug)]
struct ScheduledTask<T> {
    payload: T,
    /// `None` for one-shot tasks.
    repeat: Option<Duration>,
}

/// Runs immediate and delayed tasks against an external clock.
pub struct Scheduler<T> {
    clock: Arc<dyn Clock>,
    /// Keyed by (due time, registration sequence).
    queue: BTreeMap<(Duration, u64), ScheduledTask<T>>,
    next_seq: u64,
}

impl<T: Clone> Scheduler<T> {
    /// Create an empty scheduler reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            queue: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `payload` to run once on the next update.
    pub fn add(&mut self, payload: T) -> TaskHandle {
        let now = self.clock.now();
        self.insert(now, payload, None)
    }

    /// Schedule `payload` to run after `interval`, and every `interval`
    /// afterwards when `repeat` is set.
    pub fn add_delayed(&mut self, payload: T, interval: Duration, repeat: bool) -> TaskHandle {
        let due = self.clock.now() + interval;
        self.insert(due, payload, repeat.then_some(interval))
    }

    /// Remove a single task. Returns `false` if it already ran or was cancelled.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let key = self.queue.keys().find(|(_, seq)| *seq == handle.0).copied();
        key.and_then(|key| self.queue.remove(&key)).is_some()
    }

    /// Drop every pending task.
    ///
    /// After this returns, no previously scheduled payload is ever yielded by
    /// [`update`](Self::update).
    pub fn cancel_delayed_tasks(&mut self) {
        self.queue.clear();
    }

    /// Number of tasks still waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Advance to the clock's current time and return the payloads that are due.
    ///
    /// A repeating task is yielded at most once per call. If the host fell
    /// behind by more than one interval, the next run is scheduled one interval
    /// from now rather than replaying the missed runs.
    pub fn update(&mut self) -> Vec<T> {
        let now = self.clock.now();

        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((due_at, seq), task) = entry.remove_entry();
            due.push((due_at, seq, task));
        }

        let mut payloads = Vec::with_capacity(due.len());
        for (due_at, seq, task) in due {
            payloads.push(task.payload.clone());
            if let Some(interval) = task.repeat {
                let mut next = due_at + interval;
                if next <= now {
                    next = now + interval;
                }
                self.queue.insert((next, seq), task);
            }
        }
        payloads
    }

    fn insert(&mut self, due: Duration, payload: T, repeat: Option<Duration>) -> TaskHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((due, seq), ScheduledTask { payload, repeat });
        TaskHandle(seq)
    }
}

impl<T> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.queue.len())
            .field("now", &self.clock.now())
            .finish()
    }
}
