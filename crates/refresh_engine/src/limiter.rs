//! Bounded fan-out of fetch tasks.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Caps how many submitted tasks run at once. Everything submitted is
/// spawned immediately; tasks beyond the ceiling park on the semaphore.
pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
    limit: usize,
    tasks: JoinSet<()>,
}

impl ConcurrencyLimiter {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            tasks: JoinSet::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Queue `work`. Never fails; admission order is not guaranteed.
    pub fn submit<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            work.await;
        });
    }

    /// Tasks currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Tasks submitted and not yet finished, running or waiting.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every submitted task to finish.
    pub async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("Fetch task panicked: {}", e);
                }
            }
        }
    }

    /// Cancel whatever has not finished yet and wait for the cancellations.
    pub async fn abort_all(&mut self) {
        self.tasks.shutdown().await;
    }
}
