//! Per-evaluation deadline and the cancellation flag shared by a pipe tree.
//!
//! The deadline is only checked by the pull side of the result bridge.
//! Producers never look at the clock; they see the cancellation flag
//! through `is_closed()` once the consumer has failed or gone away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wall-clock budget of a query was exceeded
#[derive(Debug, Clone, thiserror::Error)]
#[error("Query evaluation exceeded timeout of {timeout:?} (ran for {elapsed:?})")]
pub struct TimeoutError {
    pub timeout: Duration,
    pub elapsed: Duration,
}

/// Shared stop flag of one evaluation
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Deadline of one evaluation plus its cancellation flag.
///
/// A zero budget means no deadline.
#[derive(Clone, Debug)]
pub struct QueryTimeout {
    started: Instant,
    budget: Option<Duration>,
    cancel: CancelHandle,
}

impl QueryTimeout {
    pub fn new(budget: Option<Duration>) -> Self {
        QueryTimeout::starting_at(Instant::now(), budget)
    }

    /// Budget counted from `started` rather than from now
    pub fn starting_at(started: Instant, budget: Option<Duration>) -> Self {
        QueryTimeout {
            started,
            budget: budget.filter(|b| !b.is_zero()),
            cancel: CancelHandle::default(),
        }
    }

    pub fn infinite() -> Self {
        QueryTimeout::new(None)
    }

    /// Fails once the budget is spent; cancellation alone never fails
    pub fn check(&self) -> Result<(), TimeoutError> {
        match self.budget {
            Some(timeout) if self.started.elapsed() > timeout => Err(TimeoutError {
                timeout,
                elapsed: self.started.elapsed(),
            }),
            _ => Ok(()),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.budget
    }

    /// Time left before the deadline, `None` without one
    pub fn remaining(&self) -> Option<Duration> {
        self.budget.map(|b| b.saturating_sub(self.started.elapsed()))
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}
