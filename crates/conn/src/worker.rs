//! Bounded pool for application calls that must not run on the reactor thread.
//!
//! At most `size` jobs run at once, each on tokio's blocking thread pool; further jobs
//! wait for a permit. Jobs are never cancelled: a connection that goes away while its job
//! runs simply discards the result.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::connection::Job;

/// Default number of concurrently running jobs
pub const DEFAULT_WORKERS: usize = 20;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self { permits: Arc::new(Semaphore::new(size)), size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of jobs that could start right now without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Queues a job. Must be called from within a tokio runtime.
    pub fn submit(&self, job: Job) {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(cause = %e, "worker pool closed, dropping job");
                    return;
                }
            };

            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job();
            })
            .await;

            if let Err(e) = result {
                error!(cause = %e, "worker job failed");
            } else {
                debug!("worker job finished");
            }
        });
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn runs_jobs_off_the_runtime_thread() {
        let pool = WorkerPool::new(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runtime_thread = std::thread::current().id();

        pool.submit(Box::new(move || {
            let _ = tx.send(std::thread::current().id());
        }));

        let job_thread = rx.recv().await.unwrap();
        assert_ne!(job_thread, runtime_thread);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bounds_concurrency() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(());
            }));
        }

        for _ in 0..6 {
            rx.recv().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
