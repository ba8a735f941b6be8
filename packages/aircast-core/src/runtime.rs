//! Background task spawning with shutdown tracking.
//!
//! Long-lived tasks (discovery producers, the coordinator loop, the API
//! server) are spawned through [`TokioSpawner`] so shutdown can wait for them
//! after the cancellation token fires.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Spawns named tasks on a Tokio runtime and remembers their handles.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
    tasks: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
}

impl TokioSpawner {
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Uses the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }

    /// Spawns a tracked background task.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle.spawn(future);
        let mut tasks = self.tasks.lock();
        tasks.retain(|(_, h)| !h.is_finished());
        tasks.push((name, handle));
    }

    /// Number of tracked tasks still running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.tasks.lock().iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Waits up to `grace` for every tracked task, then aborts stragglers.
    ///
    /// Returns the number of tasks that had to be aborted.
    pub async fn join_all(&self, grace: Duration) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;

        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => log::error!("[Runtime] Task '{}' panicked", name),
                Ok(Err(_)) => {}
                Err(_) => {
                    log::warn!("[Runtime] Task '{}' did not stop in time, aborting", name);
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}
