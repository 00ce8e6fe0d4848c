use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::{JoinError, JoinHandle};

/// Spawns tasks onto the runtime while keeping at most `max_concurrent` of
/// them alive at once.
pub struct LimitedSpawner {
    semaphore: Arc<Semaphore>,
}

impl LimitedSpawner {
    pub fn new(max_concurrent: NonZeroUsize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.get())),
        }
    }

    pub async fn spawn<F>(&self, f: F) -> Result<JoinHandle<F::Output>, AcquireError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        Ok(tokio::spawn(async move {
            let _permit = permit;
            f.await
        }))
    }

    /// Spawns every job in submission order and joins them in that same
    /// order, so slot `i` of the result always belongs to job `i` no matter
    /// which task finishes first.
    pub async fn run_ordered<F>(
        &self,
        jobs: impl IntoIterator<Item = F>,
    ) -> Result<Vec<Result<F::Output, JoinError>>, AcquireError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut handles = Vec::new();
        for job in jobs {
            handles.push(self.spawn(job).await?);
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await);
        }
        Ok(results)
    }
}
