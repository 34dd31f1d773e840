// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A bounded pool of worker threads executing FIFO-scheduled, zero-argument tasks, with a
//! `wait()` barrier. One dispatcher thread matches queued tasks to lazily spawned workers.
//!
//! See `spec.md` §4.1 for the full contract this module implements.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use slab::Slab;

use crate::sync::Semaphore;

/// A zero-argument, side-effecting task. Tasks carry their own error handling; a panicking task
/// is caught by its worker and does not affect the pool or other tasks.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct WorkerSlot {
    available: AtomicBool,
    ready: Arc<Semaphore>,
    task: Mutex<Option<Task>>,
}

/// Bounded, dynamically-sized pool of worker threads.
pub struct Pool {
    inner: Arc<Inner>,
}

struct Inner {
    max_workers: usize,
    queue: Mutex<VecDeque<Task>>,
    queue_sem: Semaphore,
    avail_sem: Semaphore,
    // `outstanding` plus `completed` form a reusable barrier: `wait()` re-checks the live count
    // under the lock on every call, so it can't be fooled by a signal left over from an earlier
    // zero-transition the way a one-shot semaphore permit can (see `wait()`'s doc comment).
    outstanding: Mutex<usize>,
    completed: Condvar,
    workers: Mutex<Slab<Arc<WorkerSlot>>>,
}

impl Pool {
    /// Constructs a pool that spawns up to `max_workers` threads as work demands.
    ///
    /// # Panics
    /// Panics if `max_workers` is zero — a pool that can never run anything is a configuration
    /// error, not a runtime condition to recover from.
    pub fn new(max_workers: usize) -> Self {
        assert!(max_workers > 0, "Pool requires at least one worker");

        let inner = Arc::new(Inner {
            max_workers,
            queue: Mutex::new(VecDeque::new()),
            queue_sem: Semaphore::new(0),
            avail_sem: Semaphore::new(max_workers),
            outstanding: Mutex::new(0),
            completed: Condvar::new(),
            workers: Mutex::new(Slab::with_capacity(max_workers)),
        });

        let dispatcher_inner = inner.clone();
        thread::spawn(move || dispatch(dispatcher_inner));

        Self { inner }
    }

    /// Schedules `task` for eventual execution, once every previously scheduled task has been
    /// claimed by a worker in turn. Never blocks on worker availability.
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.inner.outstanding.lock().unwrap() += 1;
        self.inner.queue.lock().unwrap().push_back(Box::new(task));
        self.inner.queue_sem.release();
    }

    /// Blocks until every task scheduled before this call has finished executing. Idempotent:
    /// calling `wait()` again with nothing newly scheduled returns immediately. Re-entrant in the
    /// sense that any number of callers may block here concurrently; all of them wake once the
    /// count reaches zero, and none can observe a stale wakeup left over from a previous
    /// zero-transition, since the predicate is re-checked under the lock on every call rather than
    /// relying on a single consumable permit.
    pub fn wait(&self) {
        let mut outstanding = self.inner.outstanding.lock().unwrap();
        while *outstanding != 0 {
            outstanding = self.inner.completed.wait(outstanding).unwrap();
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("max_workers", &self.inner.max_workers)
            .field("outstanding", &*self.inner.outstanding.lock().unwrap())
            .finish()
    }
}

fn dispatch(inner: Arc<Inner>) {
    loop {
        inner.queue_sem.acquire();
        inner.avail_sem.acquire();

        let task = {
            let mut queue = inner.queue.lock().unwrap();
            match queue.pop_front() {
                Some(task) => task,
                // queue_sem's count matches queue length; this should be unreachable, but a
                // spurious wakeup here must not deadlock the dispatcher.
                None => {
                    inner.avail_sem.release();
                    continue;
                }
            }
        };

        let mut workers = inner.workers.lock().unwrap();
        let existing = workers
            .iter()
            .find(|(_, slot)| slot.available.load(Ordering::Acquire))
            .map(|(k, _)| k);

        if let Some(key) = existing {
            let slot = workers[key].clone();
            slot.available.store(false, Ordering::Release);
            *slot.task.lock().unwrap() = Some(task);
            slot.ready.release();
        } else {
            let ready = Arc::new(Semaphore::new(0));
            let slot = Arc::new(WorkerSlot {
                available: AtomicBool::new(false),
                ready: ready.clone(),
                task: Mutex::new(Some(task)),
            });
            let key = workers.insert(slot);
            drop(workers);

            let worker_inner = inner.clone();
            thread::spawn(move || work(worker_inner, key, ready));
            continue;
        }
    }
}

fn work(inner: Arc<Inner>, key: usize, ready: Arc<Semaphore>) {
    loop {
        ready.acquire();

        let task = {
            let workers = inner.workers.lock().unwrap();
            workers[key].task.lock().unwrap().take()
        };

        if let Some(task) = task {
            // Catch a panicking task so one bad task cannot take down its worker thread, matching
            // `spec.md` §4.1 "Failure semantics": confined to the worker, logged, worker
            // continues.
            if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
                log::error!("pool worker {key} task panicked: {}", panic_message(&payload));
            }
        }

        {
            let workers = inner.workers.lock().unwrap();
            workers[key].available.store(true, Ordering::Release);
        }
        inner.avail_sem.release();

        // Decrement and zero-check happen under the same lock `wait()` reads, so the signal
        // can't race a concurrent `schedule` (`spec.md` §4.1/§9's REQUIRES): either `schedule`'s
        // increment is visible before this lock is taken, or it isn't, but the two can never
        // interleave mid-update.
        let mut outstanding = inner.outstanding.lock().unwrap();
        *outstanding -= 1;
        if *outstanding == 0 {
            inner.completed.notify_all();
        }
        drop(outstanding);
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
