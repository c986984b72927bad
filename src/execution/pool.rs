//! Worker Pool
//!
//! Fixed set of named threads fed through an unbounded crossbeam channel.
//! Leaf evaluations (store scans, delegated iterations) run here so that
//! the dispatcher itself never blocks.
//!
//! ```text
//! dispatcher --job_tx--► worker 0..N
//!                         `- drains one leaf iteration into its pipe
//! ```
//!
//! A job may block on a nested evaluation (EXISTS, grouping, path
//! closure) whose own leaves need a worker. When no core worker is idle,
//! `execute` runs the job on a short-lived overflow thread instead of
//! queueing it behind blocked workers.
//!
//! Dropping the pool disconnects the channel; workers finish their current
//! job and exit. Workers are never joined from `Drop` because the last
//! reference may be released on a worker thread.

use crossbeam_channel as channel;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool of threads that run leaf evaluations
pub struct WorkerPool {
    sender: channel::Sender<Job>,
    idle: Arc<AtomicUsize>,
    overflow: AtomicUsize,
    size: usize,
}

fn run_job(job: Job, worker: &str) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(worker, "worker_job_panicked");
    }
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one)
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let size = threads.max(1);
        let (sender, receiver) = channel::unbounded::<Job>();
        let idle = Arc::new(AtomicUsize::new(size));
        for i in 0..size {
            let receiver = receiver.clone();
            let idle = Arc::clone(&idle);
            let name = format!("tuplex-worker-{i}");
            thread::Builder::new().name(name.clone()).spawn(move || {
                while let Ok(job) = receiver.recv() {
                    run_job(job, &name);
                    idle.fetch_add(1, Ordering::AcqRel);
                }
                debug!(worker = %name, "worker_exit");
            })?;
        }
        debug!(threads = size, "worker_pool_started");
        Ok(WorkerPool {
            sender,
            idle,
            overflow: AtomicUsize::new(0),
            size,
        })
    }

    /// Number of core worker threads
    pub fn size(&self) -> usize {
        self.size
    }

    /// Overflow threads started so far
    pub fn overflow_count(&self) -> usize {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Run a job on an idle worker, or on an overflow thread when every
    /// worker is busy. Returns false if the job could not be started.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let claimed = self
            .idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if claimed {
            return match self.sender.send(Box::new(job)) {
                Ok(()) => true,
                Err(_) => {
                    self.idle.fetch_add(1, Ordering::AcqRel);
                    false
                }
            };
        }
        let n = self.overflow.fetch_add(1, Ordering::Relaxed);
        trace!(overflow = n, "worker_pool_overflow");
        let name = format!("tuplex-overflow-{n}");
        let job: Job = Box::new(job);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_job(job, &name))
            .map_err(|e| error!(error = %e, "overflow_spawn_failed"))
            .is_ok()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("idle", &self.idle.load(Ordering::Relaxed))
            .field("overflow", &self.overflow_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_on_named_threads() {
        let pool = WorkerPool::new(2).unwrap();
        let (tx, rx) = channel::unbounded();
        for i in 0..10 {
            let tx = tx.clone();
            assert!(pool.execute(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            }));
        }
        let mut seen = Vec::new();
        for _ in 0..10 {
            let (i, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(name.unwrap().starts_with("tuplex-"));
            seen.push(i);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.execute(|| panic!("boom"));
        let (tx, rx) = channel::bounded(1);
        let c = Arc::clone(&counter);
        pool.execute(move || {
            c.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blocked_workers_do_not_starve_nested_jobs() {
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let (done_tx, done_rx) = channel::bounded(1);
        let inner_pool = Arc::clone(&pool);
        pool.execute(move || {
            // The only core worker waits on a job it queues itself
            let (tx, rx) = channel::bounded(1);
            inner_pool.execute(move || tx.send(7).unwrap());
            done_tx.send(rx.recv().unwrap()).unwrap();
        });
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert!(pool.overflow_count() >= 1);
    }

    #[test]
    fn test_zero_threads_means_one() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.size(), 1);
    }
}
