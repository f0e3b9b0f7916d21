//! Bounded fail-fast task group
//!
//! Tasks are spawned on a [`JoinSet`] and each holds a permit of a shared
//! [`Semaphore`] while it runs. [`TaskGroup::wait`] is the only join point:
//! the first error aborts every sibling and is returned.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct TaskGroup<T> {
    set: JoinSet<Result<T>>,
    permits: Arc<Semaphore>,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Group drawing permits from `permits`
    pub fn new(permits: Arc<Semaphore>) -> Self {
        Self {
            set: JoinSet::new(),
            permits,
        }
    }

    /// Group allowing `limit` tasks at once
    pub fn with_limit(limit: usize) -> Self {
        Self::new(Arc::new(Semaphore::new(limit.max(1))))
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.set.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| Error::Task(e.to_string()))?;
            task.await
        });
    }

    /// Wait for every task. Results come back in completion order.
    pub async fn wait(mut self) -> Result<Vec<T>> {
        let mut results = Vec::with_capacity(self.set.len());
        while let Some(joined) = self.set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Task(e.to_string())),
            };
            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    self.set.abort_all();
                    return Err(e);
                }
            }
        }
        Ok(results)
    }
}
