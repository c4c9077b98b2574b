//! WorkerPool - bounded fire-and-forget task execution
//!
//! Submission never blocks the caller: the concurrency permit is acquired
//! inside the spawned task. Task failures go to the pool's error callback
//! (or the log), never back to the submitter.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::error;

use fx_common::{ErrorHandler, Result};

pub struct WorkerPool {
    name: String,
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicU32>,
    active: Arc<AtomicU32>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            pending: Arc::new(AtomicU32::new(0)),
            active: Arc::new(AtomicU32::new(0)),
            error_handler: None,
        }
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Submit a task. Returns immediately; the task runs once a permit is
    /// available.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let pending = self.pending.clone();
        let active = self.active.clone();
        let handler = self.error_handler.clone();
        let name = self.name.clone();

        pending.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    pending.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };
            active.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = task.await {
                match &handler {
                    Some(handler) => handler.handle(e),
                    None => error!(pool = %name, error = %e, "worker task failed"),
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
            pending.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }

    /// Tasks currently executing.
    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    /// Tasks submitted but not yet finished, executing or queued.
    pub fn pending_count(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every submitted task has finished.
    pub async fn wait_idle(&self) {
        while self.pending.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn tasks_run_and_pool_drains() {
        let pool = WorkerPool::new("test", 2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            pool.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        pool.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::new("test", 1);
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let peak = peak.clone();
            let current = current.clone();
            pool.spawn(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        pool.wait_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submission_does_not_block() {
        let pool = WorkerPool::new("test", 1);
        pool.spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        });
        let started = std::time::Instant::now();
        pool.spawn(async { Ok(()) });
        assert!(started.elapsed() < Duration::from_millis(20));
        pool.wait_idle().await;
    }
}
