//! Bounded-concurrency task scheduler shared by background workers.
//!
//! Used by the health monitor's per-tick probes and the directory
//! cache's bus-driven update loop to cap in-flight work without an
//! unbounded spawn storm.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Configuration for a [`TaskScheduler`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    max_concurrency: NonZeroUsize,
}

impl SchedulerConfig {
    /// Creates a configuration with the given maximum concurrency.
    #[must_use]
    pub const fn new(max_concurrency: NonZeroUsize) -> Self {
        Self { max_concurrency }
    }

    /// Returns the configured maximum concurrency.
    #[must_use]
    pub const fn max_concurrency(self) -> NonZeroUsize {
        self.max_concurrency
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: NonZeroUsize::new(32).expect("non-zero"),
        }
    }
}

/// Errors raised while scheduling work.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler has been closed and rejects new work.
    #[error("scheduler is closed")]
    Closed,
}

/// Bounded-concurrency task scheduler backed by a semaphore.
#[derive(Clone)]
pub struct TaskScheduler {
    semaphore: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    config: SchedulerConfig,
}

impl TaskScheduler {
    /// Creates a new scheduler with the given configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrency().get())),
            closed: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Returns the configured maximum concurrency.
    #[must_use]
    pub const fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Spawns a task, blocking the caller until a concurrency permit is
    /// available.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] if the scheduler has been
    /// closed.
    pub async fn spawn<F, T>(&self, future: F) -> Result<JoinHandle<T>, SchedulerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::Closed);
        }

        let semaphore = Arc::clone(&self.semaphore);
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| SchedulerError::Closed)?;

        Ok(tokio::spawn(async move {
            let _permit = permit;
            future.await
        }))
    }

    /// Marks the scheduler closed; subsequent `spawn` calls fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if the scheduler has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn respects_concurrency_cap() {
        let config = SchedulerConfig::new(NonZeroUsize::new(2).unwrap());
        let scheduler = TaskScheduler::new(config);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let concurrent = Arc::clone(&concurrent);
            let max_seen = Arc::clone(&max_seen);
            let handle = scheduler
                .spawn(async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            handles.push(handle);
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn closed_scheduler_rejects_spawn() {
        let scheduler = TaskScheduler::new(SchedulerConfig::default());
        scheduler.close();
        let err = scheduler.spawn(async {}).await.expect_err("closed");
        assert!(matches!(err, SchedulerError::Closed));
    }
}
