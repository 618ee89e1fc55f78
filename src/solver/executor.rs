//! Bounded worker pool driving path-edge tasks to quiescence.
//!
//! Tasks never block on one another, so completion is simply "the pending
//! counter reached zero": it is incremented before a task is handed to the
//! channel and decremented after the task ran, which means the counter can
//! only reach zero once no task is queued, running, or about to be spawned
//! by a running task.
//!
//! A panic in any task is captured, recorded once, and flips the kill flag
//! so the remaining queue drains without doing work.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    pending: AtomicUsize,
    killed: AtomicBool,
    panic_message: Mutex<Option<String>>,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl Shared {
    fn task_finished(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
    }
}

pub struct Executor {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl Executor {
    pub fn new(num_threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Task>();
        let shared = Arc::new(Shared {
            pending: AtomicUsize::new(0),
            killed: AtomicBool::new(false),
            panic_message: Mutex::new(None),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
        });

        let workers = (0..num_threads.max(1))
            .map(|i| {
                let receiver: Receiver<Task> = receiver.clone();
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("taintflow-worker-{i}"))
                    .spawn(move || {
                        for task in receiver.iter() {
                            if !shared.killed.load(Ordering::Acquire) {
                                if let Err(payload) =
                                    panic::catch_unwind(AssertUnwindSafe(task))
                                {
                                    let message = panic_message(payload);
                                    log::error!("solver task panicked: {message}");
                                    shared.panic_message.lock().get_or_insert(message);
                                    shared.killed.store(true, Ordering::Release);
                                }
                            }
                            shared.task_finished();
                        }
                    })
                    .unwrap_or_else(|e| {
                        // Thread spawn failure at pool construction is
                        // unrecoverable for the solve anyway.
                        panic!("failed to spawn solver worker: {e}")
                    })
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            shared,
        }
    }

    /// Queues a task. Returns false without queueing once the pool is killed.
    pub fn execute(&self, task: Task) -> bool {
        if self.shared.killed.load(Ordering::Acquire) {
            return false;
        }
        let Some(sender) = &self.sender else {
            return false;
        };
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(task).is_err() {
            self.shared.task_finished();
            return false;
        }
        true
    }

    /// Blocks until every queued task (and every task they spawned) ran.
    pub fn await_completion(&self) {
        let mut guard = self.shared.idle_lock.lock();
        while self.shared.pending.load(Ordering::Acquire) > 0 {
            self.shared.idle.wait(&mut guard);
        }
    }

    /// Stops accepting tasks and lets already-queued ones drain as no-ops.
    pub fn kill(&self) {
        self.shared.killed.store(true, Ordering::Release);
    }

    pub fn is_killed(&self) -> bool {
        self.shared.killed.load(Ordering::Acquire)
    }

    /// Clears the kill flag so the pool can run another solve.
    pub fn clear_kill(&self) {
        self.shared.killed.store(false, Ordering::Release);
    }

    /// The first captured panic message, consumed.
    pub fn take_panic(&self) -> Option<String> {
        self.shared.panic_message.lock().take()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Closing the channel ends the worker loops.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn runs_tasks_that_spawn_tasks() {
        let executor = Arc::new(Executor::new(4));
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..10 {
            let executor2 = Arc::clone(&executor);
            let counter2 = Arc::clone(&counter);
            executor.execute(Box::new(move || {
                counter2.fetch_add(1, Ordering::Relaxed);
                let counter3 = Arc::clone(&counter2);
                executor2.execute(Box::new(move || {
                    counter3.fetch_add(1, Ordering::Relaxed);
                }));
            }));
        }
        executor.await_completion();
        assert_eq!(counter.load(Ordering::Relaxed), 20);
    }

    #[test]
    fn panic_is_captured_and_kills_the_pool() {
        let executor = Executor::new(2);
        executor.execute(Box::new(|| panic!("boom")));
        executor.await_completion();

        assert!(executor.is_killed());
        assert_eq!(executor.take_panic().as_deref(), Some("boom"));
        // Later tasks are refused.
        assert!(!executor.execute(Box::new(|| {})));
    }

    #[test]
    fn await_returns_immediately_with_nothing_queued() {
        let executor = Executor::new(1);
        executor.await_completion();
    }
}
