// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::TaskError;
use crate::scheduler::TaskScheduler;
use core::panic::AssertUnwindSafe;
use core::task::Waker;
use smallvec::SmallVec;
use std::panic;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Type-erased view of a task's completion state, shared by tokens and the
/// dependency graph.
pub(crate) trait Completion: Send + Sync {
    fn core(&self) -> &Core;
}

/// The untyped half of a task state: completion flag, continuation wakers,
/// dependency bookkeeping and the deferred-start slot (the "resumable").
pub(crate) struct Core {
    inner: Mutex<CoreInner>,
    completion: Condvar,
    /// Unresolved dependencies. While this is non-zero the deferred start
    /// must not run; the final decrement releases it.
    pending_dependencies: AtomicU32,
}

pub(crate) struct CoreInner {
    completed: bool,
    wakers: SmallVec<[Waker; 2]>,
    dependents: Vec<Weak<dyn Completion>>,
    start: Option<Job>,
    scheduler: Weak<TaskScheduler>,
}

impl Core {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(CoreInner {
                completed: false,
                wakers: SmallVec::new(),
                dependents: Vec::new(),
                start: None,
                scheduler: Weak::new(),
            }),
            completion: Condvar::new(),
            pending_dependencies: AtomicU32::new(0),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.lock().completed
    }

    pub(crate) fn bind_scheduler(&self, scheduler: Weak<TaskScheduler>) {
        self.lock().scheduler = scheduler;
    }

    pub(crate) fn set_start(&self, job: Job) {
        self.lock().start = Some(job);
    }

    /// Blocks the calling thread until the completion flag is raised.
    pub(crate) fn wait_completed(&self) {
        let mut inner = self.lock();
        while !inner.completed {
            inner = self
                .completion
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Registers a continuation waker, or reports `true` when the state is
    /// already complete (the fast path: the caller resumes itself).
    pub(crate) fn register_waker(&self, waker: &Waker) -> bool {
        let mut inner = self.lock();
        if inner.completed {
            return true;
        }
        if let Some(existing) = inner.wakers.iter_mut().find(|w| w.will_wake(waker)) {
            existing.clone_from(waker);
        } else {
            inner.wakers.push(waker.clone());
        }
        false
    }

    /// Transitions to completed: raises the flag, signals synchronous
    /// waiters, drains the continuation wakers exactly once, then releases
    /// any dependent whose last dependency this was.
    pub(crate) fn complete(&self) {
        let (wakers, dependents) = {
            let mut inner = self.lock();
            debug_assert!(!inner.completed, "task completed twice");
            inner.completed = true;
            (
                core::mem::take(&mut inner.wakers),
                core::mem::take(&mut inner.dependents),
            )
        };

        self.completion.notify_all();

        for waker in wakers {
            waker.wake();
        }

        for dependent in dependents {
            let Some(dependent) = dependent.upgrade() else {
                continue;
            };
            if dependent
                .core()
                .pending_dependencies
                .fetch_sub(1, Ordering::AcqRel)
                == 1
            {
                release(&dependent);
            }
        }
    }

    /// Registers `dependent` to be released once this state completes.
    /// Reports `false` when this state already completed (nothing linked).
    pub(crate) fn link_dependent(&self, dependent: &Arc<dyn Completion>) -> bool {
        let mut inner = self.lock();
        if inner.completed {
            return false;
        }
        // The counter bump happens under this lock so the completion drain
        // (which takes the same lock) always observes it.
        dependent
            .core()
            .pending_dependencies
            .fetch_add(1, Ordering::Relaxed);
        inner.dependents.push(Arc::downgrade(dependent));
        true
    }

    /// Bumps the pending counter by one; used as a guard while a dependency
    /// list is being linked.
    pub(crate) fn acquire_guard(&self) {
        self.pending_dependencies.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops the linking guard; reports `true` when this was the last
    /// unresolved dependency and the start job must be released.
    pub(crate) fn release_guard(&self) -> bool {
        self.pending_dependencies.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn has_pending_dependencies(&self) -> bool {
        self.pending_dependencies.load(Ordering::Acquire) != 0
    }
}

/// Takes the deferred start job (if still present) and runs it: enqueued on
/// the bound scheduler, or inline when the state was never bound.
pub(crate) fn release(state: &Arc<dyn Completion>) {
    let core = state.core();
    let (job, scheduler) = {
        let mut inner = core.lock();
        (inner.start.take(), inner.scheduler.upgrade())
    };
    let Some(job) = job else {
        return;
    };

    // The stored job only weakly references its state (a strong capture
    // would cycle through the start slot). Once released, the job must keep
    // the state alive until it ran - dependents are wired through it.
    let keep_alive = Arc::clone(state);
    let job: Job = Box::new(move || {
        job();
        drop(keep_alive);
    });

    if let Some(scheduler) = scheduler {
        scheduler.enqueue(job);
    } else {
        job();
    }
}

/// Releases the start job unless dependencies are still unresolved; used by
/// `get`/poll to kick an unstarted task.
pub(crate) fn trigger(state: &Arc<dyn Completion>) {
    if state.core().has_pending_dependencies() {
        return;
    }
    release(state);
}

/// The typed half: the untyped core plus the result slot.
pub(crate) struct State<T> {
    core: Core,
    result: Mutex<Option<Result<T, TaskError>>>,
}

impl<T: Send + 'static> State<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            core: Core::new(),
            result: Mutex::new(None),
        })
    }

    /// Creates a state whose deferred start runs `body`, captures its
    /// outcome (including panics) and completes the state.
    pub(crate) fn deferred<F>(body: F) -> Arc<Self>
    where
        F: FnOnce() -> Result<T, TaskError> + Send + 'static,
    {
        let state = Self::new();
        // Weak by design: the start slot lives inside the state, so a strong
        // capture could never be freed. `release` pins the state while the
        // job is in flight.
        let job_state = Arc::downgrade(&state);
        state.core.set_start(Box::new(move || {
            let Some(job_state) = job_state.upgrade() else {
                return;
            };
            let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
                Ok(result) => result,
                Err(payload) => Err(TaskError::Panicked(payload)),
            };
            job_state.finish(outcome);
        }));
        state
    }

    pub(crate) fn finish(&self, outcome: Result<T, TaskError>) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.core.complete();
    }

    pub(crate) fn take_result(&self) -> Option<Result<T, TaskError>> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<T: Send + 'static> Completion for State<T> {
    fn core(&self) -> &Core {
        &self.core
    }
}
