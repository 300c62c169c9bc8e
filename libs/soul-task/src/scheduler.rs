// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::TaskError;
use crate::state::{self, Completion, Job, State};
use crate::task::{Task, TaskToken};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;

/// Multi-threaded cooperative scheduler: a pool of worker threads consuming
/// one shared FIFO queue of type-erased jobs.
///
/// Jobs either run a blocking callable to completion or release a suspended
/// task's deferred body. Workers never suspend on application logic
/// themselves.
pub struct TaskScheduler {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Handed to task states as their back-reference; weak so completed
    /// states never keep a stopped scheduler alive.
    weak_self: Weak<TaskScheduler>,
}

impl TaskScheduler {
    /// Spawns the worker pool. `worker_count == 0` selects the hardware
    /// parallelism, with a minimum of one worker.
    #[must_use]
    pub fn new(worker_count: usize) -> Arc<Self> {
        let worker_count = if worker_count == 0 {
            std::thread::available_parallelism().map_or(1, usize::from)
        } else {
            worker_count
        };

        let scheduler = Arc::new_cyclic(|weak_self| Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            weak_self: weak_self.clone(),
        });

        let mut workers = scheduler
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for id in 0..worker_count {
            let worker = Arc::clone(&scheduler);
            let handle = std::thread::Builder::new()
                .name(format!("soul-worker-{id}"))
                .spawn(move || worker.worker_loop(id))
                .expect("failed to spawn scheduler worker");
            workers.push(handle);
        }
        drop(workers);

        scheduler
    }

    fn worker_loop(&self, id: usize) {
        let _span = tracing::debug_span!("worker", worker = id).entered();

        loop {
            let job = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                loop {
                    if let Some(job) = queue.pop_front() {
                        break Some(job);
                    }
                    if !self.running.load(Ordering::Acquire) {
                        break None;
                    }
                    queue = self
                        .available
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };

            match job {
                Some(job) => {
                    tracing::trace!(worker = id, "running job");
                    job();
                }
                None => {
                    tracing::debug!(worker = id, "stop signal received, shutting down");
                    return;
                }
            }
        }
    }

    /// Pushes a job onto the shared queue. Silently dropped once the
    /// scheduler has been stopped.
    pub(crate) fn enqueue(&self, job: Job) {
        if !self.running.load(Ordering::Acquire) {
            tracing::trace!("scheduler stopped, dropping job");
            return;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
        self.available.notify_one();
    }

    /// Marks the scheduler running. Workers spin on this flag; it is set on
    /// construction, so this only matters after an explicit `stop`.
    pub fn run(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Clears the running flag, wakes every worker and joins them. Queued
    /// jobs drain first; subsequent submissions are no-ops.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        {
            // Pairs the flag change with the queue lock so no worker can
            // miss the wakeup between its empty-check and its wait.
            let _queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        }
        self.available.notify_all();

        let workers = core::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            let _ = worker.join();
        }
    }

    /// Runs `body` on the worker pool, capturing its return value (or
    /// panic) into a fresh task state.
    pub fn submit_async<F, T>(&self, body: F) -> Task<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.start_now(State::deferred(move || Ok(body())))
    }

    /// Runs a fallible `body` on the worker pool; an `Err` is captured as
    /// [`TaskError::Failed`] and rethrown at await or `get`.
    pub fn submit_fallible<F, T, E>(&self, body: F) -> Task<T>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<Box<dyn core::error::Error + Send + Sync>>,
    {
        self.start_now(State::deferred(move || body().map_err(TaskError::failed)))
    }

    fn start_now<T: Send + 'static>(&self, state: Arc<State<T>>) -> Task<T> {
        let task = Task::from_state(state);
        task.state().core().bind_scheduler(self.weak_self.clone());
        state::release(&task.erased());
        task
    }

    /// Binds `task` to this scheduler and releases it once every valid
    /// dependency has completed. Dependencies that are already complete (or
    /// complete while being linked) are not linked.
    pub fn schedule<T: Send + 'static>(&self, task: Task<T>, dependencies: &[TaskToken]) -> Task<T> {
        let erased = task.erased();
        erased.core().bind_scheduler(self.weak_self.clone());

        // Guard against a dependency completing mid-link and releasing the
        // task before the whole list is registered.
        erased.core().acquire_guard();

        let mut linked = 0_u32;
        for token in dependencies {
            let Some(dependency) = token.state() else {
                continue;
            };
            if dependency.core().link_dependent(&erased) {
                linked += 1;
            }
        }
        tracing::trace!(linked, "scheduled task");

        if erased.core().release_guard() {
            state::release(&erased);
        }
        task
    }

    /// Blocks until the token's task completes. Invalid tokens return
    /// immediately.
    pub fn wait(&self, token: &TaskToken) {
        if let Some(state) = token.state() {
            state.core().wait_completed();
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl core::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
