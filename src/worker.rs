//! The worker pool that drains the [`TaskQueue`] (§4.2).
//!
//! Grounded on `Worker.py`'s `Worker.run()` loop, redesigned per
//! SPEC_FULL.md §9: the Python spinlock-with-1-second-poll is replaced with
//! a real condition variable, since the two are behaviourally equivalent and
//! the condvar is strictly cheaper and simpler to reason about.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::task::{Task, TaskQueue};

/// Shared state a worker pool waits on: the queue itself, plus the
/// `work` flag that tells workers to keep running.
pub struct WorkerShared {
    pub queue: Mutex<TaskQueue>,
    pub condvar: Condvar,
    pub work: AtomicBool,
}

impl WorkerShared {
    pub fn new() -> Arc<Self> {
        Arc::new(WorkerShared {
            queue: Mutex::new(TaskQueue::new()),
            condvar: Condvar::new(),
            work: AtomicBool::new(true),
        })
    }

    /// Add a task to the queue and wake whichever worker can make progress
    /// soonest.
    pub fn enqueue(&self, task: Task) {
        let mut queue = self.queue.lock().unwrap();
        queue.add(task);
        drop(queue);
        self.condvar.notify_one();
    }

    /// `flush`: make every pending task due immediately and wake everyone.
    pub fn reschedule_all_now(&self) {
        let mut queue = self.queue.lock().unwrap();
        queue.reschedule_all_now();
        drop(queue);
        self.condvar.notify_all();
    }

    /// Stop the pool: clear the work flag and wake every waiter so each
    /// worker observes the flag on its next iteration and returns.
    pub fn shutdown(&self) {
        self.work.store(false, Ordering::SeqCst);
        self.condvar.notify_all();
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A fixed pool of OS threads draining a shared [`TaskQueue`].
pub struct WorkerPool {
    shared: Arc<WorkerShared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` worker threads. `run` is invoked with each popped task;
    /// its panics are not caught (a misbehaving tool invocation should be a
    /// handled `Err`, not a panic).
    pub fn spawn<F>(shared: Arc<WorkerShared>, count: usize, run: F) -> Self
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        let run = Arc::new(run);
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let shared = shared.clone();
            let run = run.clone();
            handles.push(thread::spawn(move || worker_loop(id, shared, run)));
        }
        WorkerPool { shared, handles }
    }

    pub fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }

    /// Signal shutdown and join every worker thread.
    pub fn join(self) {
        self.shared.shutdown();
        for h in self.handles {
            let _ = h.join();
        }
    }
}

fn worker_loop<F>(id: usize, shared: Arc<WorkerShared>, run: Arc<F>)
where
    F: Fn(&Task) + Send + Sync + 'static,
{
    debug!(worker = id, "worker started");
    loop {
        if !shared.work.load(Ordering::SeqCst) {
            break;
        }

        let mut queue = shared.queue.lock().unwrap();
        let now = now_unix();

        if queue.has_due(now) {
            let task = queue.pop();
            drop(queue);

            debug!(worker = id, zone = task.how.name_str(), "picked up task");
            run(&task);

            if task.repeat_interval > 0 {
                let next_when = now_unix() + task.repeat_interval;
                let mut task = task;
                task.when = next_when;
                let mut queue = shared.queue.lock().unwrap();
                queue.add(task);
                drop(queue);
                shared.condvar.notify_one();
            }
            continue;
        }

        let wait = queue.next_wait(now);
        if !shared.work.load(Ordering::SeqCst) {
            break;
        }
        if wait > 0 {
            let (q, timeout) = shared
                .condvar
                .wait_timeout(queue, Duration::from_secs(wait as u64))
                .unwrap();
            drop(q);
            if timeout.timed_out() {
                // Expected: either nothing was due yet, or we were woken
                // spuriously; the next loop iteration re-checks has_due.
            }
        } else {
            let q = shared.condvar.wait(queue).unwrap();
            drop(q);
        }
    }
    warn!(worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;
    use crate::zone::Zone;
    use camino::Utf8PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn test_zone(name: &str) -> Arc<Zone> {
        Arc::new(Zone::new_for_test(
            name,
            Utf8PathBuf::from(format!("/tmp/{name}.in")),
            Utf8PathBuf::from(format!("/tmp/{name}.out")),
            Utf8PathBuf::from("/tmp/work"),
        ))
    }

    #[test]
    fn runs_a_due_task_promptly() {
        let shared = WorkerShared::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let pool = WorkerPool::spawn(shared.clone(), 1, move |_task| {
            ran2.fetch_add(1, Ordering::SeqCst);
        });

        let zone = test_zone("a.example");
        shared.enqueue(Task::new(0, TaskKind::SignZone, zone));

        let start = Instant::now();
        while ran.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        pool.join();
    }

    #[test]
    fn flush_runs_future_tasks_immediately() {
        let shared = WorkerShared::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let pool = WorkerPool::spawn(shared.clone(), 1, move |_task| {
            ran2.fetch_add(1, Ordering::SeqCst);
        });

        let zone = test_zone("a.example");
        shared.enqueue(
            Task::new(now_unix() + 600, TaskKind::SignZone, zone).with_replace(false),
        );
        shared.reschedule_all_now();

        let start = Instant::now();
        while ran.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        pool.join();
    }
}
