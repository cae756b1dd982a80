//! Background execution for promotion and deletion.
//!
//! Operations run inline by default. A [`Scheduler`] hands them to a single
//! worker task instead: `schedule` returns after enqueueing, and tasks
//! execute strictly in the order they were scheduled. Ordering is a
//! convenience; the attacher's compare-and-swap makes out-of-order
//! completion safe regardless.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::error;

use crate::error::{AttachError, AttachResult};

/// A unit of background work
pub type Task = BoxFuture<'static, AttachResult<()>>;

/// Callback invoked when a background task fails
pub type FailureCallback = dyn Fn(&AttachError) + Send + Sync;

/// Where promote/delete work runs: inline in the caller, or handed off
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, task: Task) -> AttachResult<()>;
}

/// Runs the task in the caller, blocking until it completes
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatch;

#[async_trait]
impl Dispatch for InlineDispatch {
    async fn dispatch(&self, task: Task) -> AttachResult<()> {
        task.await
    }
}

/// Single-worker FIFO task queue backed by the tokio runtime
pub struct Scheduler {
    queue: mpsc::UnboundedSender<Task>,
}

impl Scheduler {
    /// Spawn the worker. Task failures are logged and reported through
    /// `on_failure`; they never stop the worker.
    pub fn spawn(on_failure: Arc<FailureCallback>) -> Arc<Self> {
        let (queue, mut tasks) = mpsc::unbounded_channel::<Task>();

        tokio::spawn(async move {
            while let Some(task) = tasks.recv().await {
                if let Err(err) = task.await {
                    error!(error = %err, "background attachment task failed");
                    on_failure(&err);
                }
            }
        });

        Arc::new(Self { queue })
    }

    /// Enqueue a task. Returns immediately; the worker runs tasks in
    /// scheduling order.
    pub fn schedule(&self, task: Task) -> AttachResult<()> {
        self.queue
            .send(task)
            .map_err(|_| AttachError::internal("background scheduler is stopped"))
    }

    /// Wait until every task scheduled so far has finished
    pub async fn flush(&self) -> AttachResult<()> {
        let (done, waiter) = tokio::sync::oneshot::channel();
        self.schedule(Box::pin(async move {
            let _ = done.send(());
            Ok(())
        }))?;
        waiter
            .await
            .map_err(|_| AttachError::internal("background scheduler is stopped"))
    }
}

/// Dispatch that defers to a [`Scheduler`]
pub struct BackgroundDispatch {
    scheduler: Arc<Scheduler>,
}

impl BackgroundDispatch {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Dispatch for BackgroundDispatch {
    async fn dispatch(&self, task: Task) -> AttachResult<()> {
        self.scheduler.schedule(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn ignore_failures() -> Arc<FailureCallback> {
        Arc::new(|_err: &AttachError| {})
    }

    #[tokio::test]
    async fn tasks_run_in_scheduling_order() {
        let scheduler = Scheduler::spawn(ignore_failures());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10u32 {
            let seen = seen.clone();
            scheduler
                .schedule(Box::pin(async move {
                    seen.lock().push(i);
                    Ok(())
                }))
                .unwrap();
        }

        scheduler.flush().await.unwrap();
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failures_reach_the_callback_and_do_not_stop_the_worker() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let scheduler = Scheduler::spawn(Arc::new(move |err: &AttachError| {
            sink.lock().push(err.to_string());
        }));

        scheduler
            .schedule(Box::pin(async { Err(AttachError::internal("boom")) }))
            .unwrap();

        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        scheduler
            .schedule(Box::pin(async move {
                *flag.lock() = true;
                Ok(())
            }))
            .unwrap();

        scheduler.flush().await.unwrap();
        assert_eq!(failures.lock().len(), 1);
        assert!(*ran.lock());
    }
}
