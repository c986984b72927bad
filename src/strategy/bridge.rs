//! Pull Bridge
//!
//! Turns the push stream arriving at the root of a pipe tree into a
//! blocking iterator.
//!
//! ```text
//! producers ──push──► RootPipe ──bounded queue──► BindingSetPipeIterator::next
//!                        │                               │
//!                        └── first error, suppressed ────┘  (checked every poll)
//! ```
//!
//! A full queue blocks the pushing thread, which holds back every producer
//! feeding it. The consumer polls the queue so that it can notice stored
//! errors and the query deadline while producers are silent.

use super::pipe::{BindingSetPipe, PipeRef};
use crate::binding::BindingSet;
use crate::execution::{CancelHandle, QueryError, QueryResult, QueryTimeout};
use crate::iteration::BindingSetIteration;
use crossbeam_channel::{self as channel, RecvTimeoutError, SendTimeoutError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Queue and polling parameters of a bridge
#[derive(Debug, Clone, Copy)]
pub(crate) struct BridgeSettings {
    pub queue_capacity: usize,
    pub poll_interval: Duration,
}

enum Slot {
    Item(BindingSet),
    End,
    /// Wakes the consumer so it sees a stored error
    Failed,
}

#[derive(Default)]
struct ErrorSlot {
    first: Option<QueryError>,
    suppressed: Vec<QueryError>,
}

/// Root pipe of one evaluation
pub(crate) struct RootPipe {
    sender: channel::Sender<Slot>,
    cancel: CancelHandle,
    errors: Mutex<ErrorSlot>,
    poll_interval: Duration,
    /// Pipe of an enclosing evaluation whose closing also closes this one
    outer: Option<PipeRef>,
}

impl RootPipe {
    fn take_error(&self) -> Option<QueryError> {
        let mut errors = self.errors.lock();
        let first = errors.first.take()?;
        let suppressed = std::mem::take(&mut errors.suppressed);
        Some(if suppressed.is_empty() {
            first
        } else {
            QueryError::Chained {
                error: Box::new(first),
                suppressed,
            }
        })
    }
}

impl BindingSetPipe for RootPipe {
    fn push(&self, bs: Option<BindingSet>) -> bool {
        let more = bs.is_some();
        let mut slot = bs.map_or(Slot::End, Slot::Item);
        loop {
            if self.is_closed() {
                return false;
            }
            match self.sender.send_timeout(slot, self.poll_interval) {
                Ok(()) => return more,
                Err(SendTimeoutError::Timeout(back)) => slot = back,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn parent(&self) -> Option<&PipeRef> {
        None
    }

    fn handle_error(&self, err: QueryError) {
        {
            let mut errors = self.errors.lock();
            if errors.first.is_none() {
                warn!(error = %err, "evaluation_failed");
                errors.first = Some(err);
            } else {
                debug!(error = %err, "evaluation_error_suppressed");
                errors.suppressed.push(err);
            }
        }
        self.cancel.cancel();
        let _ = self.sender.try_send(Slot::Failed);
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outer.as_ref().is_some_and(|o| o.is_closed())
    }
}

/// Blocking, closeable iterator over the results of one evaluation
pub struct BindingSetPipeIterator {
    receiver: channel::Receiver<Slot>,
    root: Arc<RootPipe>,
    timeout: QueryTimeout,
    poll_interval: Duration,
    finished: bool,
}

impl BindingSetPipeIterator {
    /// Create the bridge and the root pipe the evaluation pushes into
    pub(crate) fn new(
        settings: BridgeSettings,
        timeout: QueryTimeout,
        outer: Option<PipeRef>,
    ) -> (Self, Arc<RootPipe>) {
        let (sender, receiver) = channel::bounded(settings.queue_capacity.max(1));
        let poll_interval = settings.poll_interval.max(Duration::from_millis(1));
        let root = Arc::new(RootPipe {
            sender,
            cancel: timeout.cancel_handle(),
            errors: Mutex::new(ErrorSlot::default()),
            poll_interval,
            outer,
        });
        let iter = BindingSetPipeIterator {
            receiver,
            root: Arc::clone(&root),
            timeout,
            poll_interval,
            finished: false,
        };
        (iter, root)
    }

    /// Stop the evaluation and discard anything still queued
    pub fn close(&mut self) {
        if !self.root.cancel.is_cancelled() {
            debug!(elapsed_ms = self.timeout.elapsed().as_millis() as u64, "bridge_closed");
        }
        self.finished = true;
        self.root.cancel.cancel();
        while self.receiver.try_recv().is_ok() {}
    }

    /// Whether `close` has been called or the stream is over
    pub fn is_closed(&self) -> bool {
        self.finished
    }

    fn fail(&mut self, err: QueryError) -> Option<QueryResult<BindingSet>> {
        self.close();
        Some(Err(err))
    }
}

impl Iterator for BindingSetPipeIterator {
    type Item = QueryResult<BindingSet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let wait = self
                .timeout
                .remaining()
                .map_or(self.poll_interval, |r| r.min(self.poll_interval));
            let received = self.receiver.recv_timeout(wait);
            if let Some(err) = self.root.take_error() {
                return self.fail(err);
            }
            if let Err(err) = self.timeout.check() {
                info!(
                    timeout_ms = err.timeout.as_millis() as u64,
                    elapsed_ms = err.elapsed.as_millis() as u64,
                    "query_timeout"
                );
                return self.fail(err.into());
            }
            match received {
                Ok(Slot::Item(bs)) => return Some(Ok(bs)),
                Ok(Slot::End) | Err(RecvTimeoutError::Disconnected) => {
                    self.close();
                    return None;
                }
                Ok(Slot::Failed) | Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

impl BindingSetIteration for BindingSetPipeIterator {
    fn close(&mut self) {
        BindingSetPipeIterator::close(self);
    }
}

impl Drop for BindingSetPipeIterator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::thread;
    use std::time::Instant;

    fn settings(capacity: usize) -> BridgeSettings {
        BridgeSettings {
            queue_capacity: capacity,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn row(i: i64) -> BindingSet {
        BindingSet::from_pairs([("i", Value::Integer(i))])
    }

    #[test]
    fn test_items_then_end() {
        let (mut iter, root) =
            BindingSetPipeIterator::new(settings(8), QueryTimeout::infinite(), None);
        assert!(root.push(Some(row(1))));
        assert!(root.push(Some(row(2))));
        assert!(!root.push(None));
        assert_eq!(iter.next().unwrap().unwrap(), row(1));
        assert_eq!(iter.next().unwrap().unwrap(), row(2));
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_full_queue_blocks_producer() {
        let (mut iter, root) =
            BindingSetPipeIterator::new(settings(2), QueryTimeout::infinite(), None);
        let producer = thread::spawn(move || {
            for i in 0..5 {
                root.push(Some(row(i)));
            }
            root.push(None);
        });
        thread::sleep(Duration::from_millis(100));
        assert!(!producer.is_finished());
        let all: Vec<_> = iter.by_ref().map(Result::unwrap).collect();
        assert_eq!(all.len(), 5);
        producer.join().unwrap();
    }

    #[test]
    fn test_first_error_wins_and_discards_items() {
        let (mut iter, root) =
            BindingSetPipeIterator::new(settings(8), QueryTimeout::infinite(), None);
        root.push(Some(row(1)));
        root.handle_error(QueryError::Evaluation("first".into()));
        root.handle_error(QueryError::Evaluation("second".into()));
        let err = iter.next().unwrap().unwrap_err();
        assert!(matches!(err.root(), QueryError::Evaluation(m) if m == "first"));
        assert_eq!(err.suppressed().len(), 1);
        assert!(iter.next().is_none());
        assert!(root.is_closed());
    }

    #[test]
    fn test_timeout_raised_while_idle() {
        let timeout = QueryTimeout::new(Some(Duration::from_millis(50)));
        let (mut iter, _root) = BindingSetPipeIterator::new(settings(8), timeout, None);
        let start = Instant::now();
        let err = iter.next().unwrap().unwrap_err();
        assert!(matches!(err, QueryError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_close_releases_blocked_producer() {
        let (mut iter, root) =
            BindingSetPipeIterator::new(settings(1), QueryTimeout::infinite(), None);
        let producer = thread::spawn(move || {
            let mut accepted = 0;
            while root.push(Some(row(accepted))) {
                accepted += 1;
            }
            accepted
        });
        thread::sleep(Duration::from_millis(50));
        iter.close();
        let accepted = producer.join().unwrap();
        assert!(accepted >= 1);
    }

    #[test]
    fn test_outer_close_propagates() {
        let (mut outer_iter, outer_root) =
            BindingSetPipeIterator::new(settings(4), QueryTimeout::infinite(), None);
        let outer: PipeRef = outer_root;
        let (_inner_iter, inner_root) =
            BindingSetPipeIterator::new(settings(4), QueryTimeout::infinite(), Some(outer));
        assert!(!inner_root.is_closed());
        outer_iter.close();
        assert!(inner_root.is_closed());
    }
}
