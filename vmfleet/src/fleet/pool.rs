//! Bounded worker pool.
//!
//! Workers run on their own tokio tasks, at most `max_parallelism` at a
//! time. Each worker is tagged with a key so its result can be attributed
//! even when it panicked.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A worker that panicked instead of returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPanic(pub String);

pub struct WorkerPool<K, T> {
    semaphore: Arc<Semaphore>,
    set: JoinSet<(K, Result<T, WorkerPanic>)>,
}

impl<K, T> WorkerPool<K, T>
where
    K: Send + 'static,
    T: Send + 'static,
{
    /// Pool running at most `max_parallelism` workers (at least one).
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallelism.max(1))),
            set: JoinSet::new(),
        }
    }

    /// Spawn a worker immediately; it starts once a slot is free.
    pub fn spawn<F>(&mut self, key: K, work: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        self.set.spawn(async move {
            // Hold the permit until the work finishes. The semaphore is
            // never closed, so a failed acquire only drops the limit.
            let _permit = semaphore.acquire_owned().await.ok();
            let output = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .map_err(|payload| WorkerPanic(panic_message(payload)));
            (key, output)
        });
    }

    /// Wait for the next worker to finish.
    ///
    /// Workers cancelled by the runtime are logged and skipped.
    pub async fn join_next(&mut self) -> Option<(K, Result<T, WorkerPanic>)> {
        loop {
            match self.set.join_next().await? {
                Ok(result) => return Some(result),
                Err(e) => tracing::error!(error = %e, "Worker task did not complete"),
            }
        }
    }

    /// True once every worker has been joined.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
