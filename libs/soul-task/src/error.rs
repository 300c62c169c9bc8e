// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::any::Any;
use core::fmt;

type BoxError = Box<dyn core::error::Error + Send + Sync>;

/// Failure captured while a task body ran, rethrown at await or `get`.
pub enum TaskError {
    /// The body returned an error.
    Failed(BoxError),
    /// The body panicked; the unwind payload is preserved.
    Panicked(Box<dyn Any + Send>),
}

impl TaskError {
    pub fn failed(err: impl Into<BoxError>) -> Self {
        TaskError::Failed(err.into())
    }

    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }

    /// The panic message, when the payload was a string.
    #[must_use]
    pub fn panic_message(&self) -> Option<&str> {
        let TaskError::Panicked(payload) = self else {
            return None;
        };
        payload
            .downcast_ref::<&'static str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
    }

    /// Downcasts the inner failure of a [`TaskError::Failed`].
    #[must_use]
    pub fn failure<E: core::error::Error + 'static>(&self) -> Option<&E> {
        let TaskError::Failed(inner) = self else {
            return None;
        };
        inner.downcast_ref()
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Failed(inner) => f.debug_tuple("Failed").field(inner).finish(),
            TaskError::Panicked(_) => f
                .debug_tuple("Panicked")
                .field(&self.panic_message().unwrap_or("..."))
                .finish(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Failed(inner) => write!(f, "task failed: {inner}"),
            TaskError::Panicked(_) => match self.panic_message() {
                Some(message) => write!(f, "task panicked: {message}"),
                None => f.write_str("task panicked"),
            },
        }
    }
}

impl core::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            TaskError::Failed(inner) => Some(inner.as_ref()),
            TaskError::Panicked(_) => None,
        }
    }
}
