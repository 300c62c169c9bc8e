// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::TaskError;
use crate::state::{self, Completion, State};
use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Arc;

/// Move-only handle to a scheduled unit of work.
///
/// Awaiting a `Task` (it implements [`Future`]) registers the awaiter as a
/// continuation and kicks the deferred body if it has not started yet;
/// [`get`][Self::get] is the synchronous bridge. The produced value is
/// extracted exactly once, enforced by consuming the handle.
pub struct Task<T> {
    state: Arc<State<T>>,
}

impl<T: Send + 'static> Task<T> {
    /// A deferred task over `body`. It runs when released by a scheduler
    /// (see [`TaskScheduler::schedule`][crate::TaskScheduler::schedule]) or
    /// inline on first `get`/poll when never bound to one.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            state: State::deferred(move || Ok(body())),
        }
    }

    /// A deferred task whose body may fail; the error is captured and
    /// rethrown as [`TaskError::Failed`] at await or `get`.
    pub fn new_fallible<F, E>(body: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<Box<dyn core::error::Error + Send + Sync>>,
    {
        Self {
            state: State::deferred(move || body().map_err(TaskError::failed)),
        }
    }

    pub(crate) fn from_state(state: Arc<State<T>>) -> Self {
        Self { state }
    }

    pub(crate) fn state(&self) -> &Arc<State<T>> {
        &self.state
    }

    pub(crate) fn erased(&self) -> Arc<dyn Completion> {
        Arc::clone(&self.state) as Arc<dyn Completion>
    }

    /// Whether the task has already completed (successfully or not).
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.core().is_completed()
    }

    /// A shared observer over this task's completion state.
    #[must_use]
    pub fn token(&self) -> TaskToken {
        TaskToken {
            state: Some(self.erased()),
        }
    }

    /// Synchronously waits for completion and extracts the outcome.
    ///
    /// Triggers the deferred body first when it has not started: inline on
    /// this thread if the task was never bound to a scheduler, otherwise on
    /// the bound worker pool.
    ///
    /// # Errors
    ///
    /// The captured [`TaskError`] when the body failed or panicked.
    pub fn get(self) -> Result<T, TaskError> {
        let erased = self.erased();
        state::trigger(&erased);
        self.state.core().wait_completed();
        self.state
            .take_result()
            .expect("task result extracted twice")
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if !this.state.core().register_waker(cx.waker()) {
            // Not yet complete; make sure the producer is running.
            state::trigger(&this.erased());

            // The completion drain may have raced the registration; only the
            // flag decides.
            if !this.state.core().is_completed() {
                return Poll::Pending;
            }
        }

        Poll::Ready(
            this.state
                .take_result()
                .expect("task polled after completion"),
        )
    }
}

impl<T> core::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

/// Shared, read-only observer of a task's completion state.
///
/// Tokens express dependencies between tasks and support synchronous
/// waiting; they never carry the result payload.
#[derive(Clone, Default)]
pub struct TaskToken {
    state: Option<Arc<dyn Completion>>,
}

impl TaskToken {
    /// Whether the token references a task state at all.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state.is_some()
    }

    /// Whether the referenced task has completed. Invalid tokens report
    /// `false`.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.core().is_completed())
    }

    pub(crate) fn state(&self) -> Option<&Arc<dyn Completion>> {
        self.state.as_ref()
    }
}

impl core::fmt::Debug for TaskToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskToken")
            .field("valid", &self.is_valid())
            .finish()
    }
}
