//! Bounded fan-out for a single pipeline invocation
//!
//! Each run owns its own pool, so one slow run cannot starve another.
//! Cancelling the pool's token aborts every task still in flight.

use crate::errors::{AppError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-run worker pool
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a pool with `max_workers` concurrent tasks
    pub fn new(max_workers: usize, cancel: CancellationToken) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Await `work` unless the token fires first.
    ///
    /// Wrap provider and store calls only; status emits must never be raced.
    pub async fn until_cancelled<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
            output = work => output,
        }
    }

    /// Run every task, returning outputs in submission order.
    ///
    /// Fails with `Cancelled` as soon as the token fires; remaining tasks
    /// are aborted before returning.
    pub async fn run_all<T, Fut>(&self, tasks: impl IntoIterator<Item = Fut>) -> Result<Vec<T>>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let mut set = JoinSet::new();
        let mut count = 0;
        for (index, task) in tasks.into_iter().enumerate() {
            let permits = self.permits.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, task.await)
            });
            count += 1;
        }

        let mut results: Vec<Option<T>> = (0..count).map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(pending = set.len(), "Aborting worker tasks");
                    set.abort_all();
                    return Err(AppError::Cancelled);
                }
                next = set.join_next() => match next {
                    None => break,
                    Some(Ok((index, value))) => results[index] = Some(value),
                    Some(Err(e)) => {
                        set.abort_all();
                        return Err(AppError::Internal {
                            message: format!("Worker task failed: {}", e),
                        });
                    }
                },
            }
        }

        Ok(results.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_submission_order() {
        let pool = WorkerPool::new(4, CancellationToken::new());
        let tasks = [30u64, 10, 20].into_iter().map(|delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            delay
        });

        let results = tokio_test::assert_ok!(pool.run_all(tasks).await);
        assert_eq!(results, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2, CancellationToken::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..6).map(|_| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        });

        pool.run_all(tasks).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_tasks() {
        let token = CancellationToken::new();
        let pool = WorkerPool::new(2, token.clone());
        let finished = Arc::new(AtomicUsize::new(0));

        let tasks = (0..2).map(|_| {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            }
        });

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = pool.run_all(tasks).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_until_cancelled_passes_output_through() {
        let pool = WorkerPool::new(1, CancellationToken::new());
        let value = tokio_test::assert_ok!(pool.until_cancelled(async { Ok(7) }).await);
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_until_cancelled_stops_slow_work() {
        let token = CancellationToken::new();
        let pool = WorkerPool::new(1, token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = pool
            .until_cancelled(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let pool = WorkerPool::new(1, CancellationToken::new());
        let results: Vec<u8> = pool.run_all(Vec::<std::future::Ready<u8>>::new()).await.unwrap();
        assert!(results.is_empty());
    }
}
