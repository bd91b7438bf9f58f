//! The task queue that drives the worker pool (§3, §4.1).
//!
//! Grounded on `Worker.py`'s `Task`/`TaskQueue` classes: insertion keeps the
//! queue ordered by non-decreasing `when`, and a `replace`-tagged task
//! supersedes any earlier task with the same `(what, how)` identity.

use std::sync::Arc;

use crate::zone::Zone;

/// What kind of work a [`Task`] performs.
///
/// The only production tag is `SignZone`; the enum exists (rather than a
/// bare zone reference) so the queue's dedup-by-identity rule has something
/// to compare beyond the zone itself, and so other task kinds can be added
/// without changing the queue's contract.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    SignZone,
}

/// One pending unit of work.
#[derive(Clone)]
pub struct Task {
    /// Seconds-since-epoch at which the task becomes due; 0 means "as soon
    /// as possible".
    pub when: i64,
    /// The kind of work.
    pub what: TaskKind,
    /// The zone the task operates on.
    pub how: Arc<Zone>,
    /// If true, enqueuing this task drops any prior task with the same
    /// `(what, how)` pair.
    pub replace: bool,
    /// If positive, the worker re-enqueues this task after running it, with
    /// `when` advanced by this many seconds from the time it ran.
    pub repeat_interval: i64,
}

impl Task {
    pub fn new(when: i64, what: TaskKind, how: Arc<Zone>) -> Self {
        Task {
            when,
            what,
            how,
            replace: true,
            repeat_interval: 0,
        }
    }

    pub fn with_repeat(mut self, repeat_interval: i64) -> Self {
        self.repeat_interval = repeat_interval;
        self
    }

    pub fn with_replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    fn same_identity(&self, other: &Task) -> bool {
        self.what == other.what && Arc::ptr_eq(&self.how, &other.how)
    }
}

/// An ordered collection of pending [`Task`]s, kept sorted by non-decreasing
/// `when`.
///
/// The queue has no lock of its own: callers (the engine, the workers) hold
/// it behind a `Mutex` together with the condition variable that signals
/// waiters, per §4.2/§5.
#[derive(Default)]
pub struct TaskQueue {
    tasks: Vec<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue { tasks: Vec::new() }
    }

    /// Insert `task` before the first existing task with a strictly greater
    /// `when`, preserving insertion order among equal `when` values. If
    /// `task.replace`, any prior task with the same `(what, how)` identity
    /// is dropped in the same pass.
    pub fn add(&mut self, task: Task) {
        if task.replace {
            self.tasks.retain(|t| !t.same_identity(&task));
        }
        let pos = self
            .tasks
            .iter()
            .position(|t| t.when > task.when)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(pos, task);
    }

    /// True iff the head of the queue is due at `now` (strictly in the
    /// past).
    pub fn has_due(&self, now: i64) -> bool {
        self.tasks.first().is_some_and(|t| t.when < now)
    }

    /// How long (in seconds) until the head becomes due; zero if the queue
    /// is empty or already due.
    pub fn next_wait(&self, now: i64) -> i64 {
        match self.tasks.first() {
            Some(t) => t.when - now,
            None => 0,
        }
    }

    /// Remove and return the head of the queue.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty; callers must check [`TaskQueue::has_due`]
    /// or non-emptiness first.
    pub fn pop(&mut self) -> Task {
        assert!(!self.tasks.is_empty(), "pop() called on an empty queue");
        self.tasks.remove(0)
    }

    /// Set `when = 0` for every task, preserving relative order.
    pub fn reschedule_all_now(&mut self) {
        for t in &mut self.tasks {
            t.when = 0;
        }
    }

    /// Remove every task whose `how` points at `zone`.
    pub fn cancel_for_zone(&mut self, zone: &Arc<Zone>) {
        self.tasks.retain(|t| !Arc::ptr_eq(&t.how, zone));
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// A textual rendering of the queue, for the `queue` command (§4.7).
    pub fn render(&self) -> String {
        let mut out = String::new();
        for t in &self.tasks {
            out.push_str(&format!(
                "{:?} {} at {}\n",
                t.what,
                t.how.name_str(),
                t.when
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::Zone;
    use camino::Utf8PathBuf;

    fn test_zone(name: &str) -> Arc<Zone> {
        Arc::new(Zone::new_for_test(
            name,
            Utf8PathBuf::from(format!("/tmp/{name}.in")),
            Utf8PathBuf::from(format!("/tmp/{name}.out")),
            Utf8PathBuf::from("/tmp/work"),
        ))
    }

    #[test]
    fn add_keeps_non_decreasing_when() {
        let z1 = test_zone("a.example");
        let z2 = test_zone("b.example");
        let mut q = TaskQueue::new();
        q.add(Task::new(500, TaskKind::SignZone, z2.clone()).with_replace(false));
        q.add(Task::new(100, TaskKind::SignZone, z1.clone()).with_replace(false));
        q.add(Task::new(300, TaskKind::SignZone, z1.clone()).with_replace(false));
        let whens: Vec<i64> = q.tasks.iter().map(|t| t.when).collect();
        assert_eq!(whens, vec![100, 300, 500]);
    }

    #[test]
    fn replace_dedups_same_identity() {
        let z = test_zone("a.example");
        let mut q = TaskQueue::new();
        q.add(Task::new(100, TaskKind::SignZone, z.clone()));
        q.add(Task::new(200, TaskKind::SignZone, z.clone()));
        assert_eq!(q.len(), 1);
        assert_eq!(q.tasks[0].when, 200);
    }

    #[test]
    fn has_due_and_next_wait() {
        let z = test_zone("a.example");
        let mut q = TaskQueue::new();
        assert!(!q.has_due(1000));
        assert_eq!(q.next_wait(1000), 0);
        q.add(Task::new(900, TaskKind::SignZone, z));
        assert!(q.has_due(1000));
        assert_eq!(q.next_wait(800), 100);
    }

    #[test]
    fn reschedule_all_now_preserves_order() {
        let z1 = test_zone("a.example");
        let z2 = test_zone("b.example");
        let mut q = TaskQueue::new();
        q.add(Task::new(600, TaskKind::SignZone, z1.clone()).with_replace(false));
        q.add(Task::new(1200, TaskKind::SignZone, z2.clone()).with_replace(false));
        q.reschedule_all_now();
        assert!(q.tasks.iter().all(|t| t.when == 0));
        assert!(Arc::ptr_eq(&q.tasks[0].how, &z1));
        assert!(Arc::ptr_eq(&q.tasks[1].how, &z2));
    }
}
