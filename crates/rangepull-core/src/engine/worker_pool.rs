//! Bounded worker pool
//!
//! A fixed set of worker tasks pull boxed futures off one shared, bounded
//! queue. The pool knows nothing about what it runs: tasks report their own
//! results through whatever channel the caller handed them.
//!
//! Back-pressure comes from the queue bound. Once every worker is busy and
//! the queue is full, `submit` suspends until a worker frees up, so at most
//! `worker_count + queue_capacity` tasks are ever accepted but unfinished.
//!
//! A task that panics is caught and logged and its worker moves on to the
//! next task. This needs `panic = "unwind"`; the workspace profiles keep it.

use crate::error::RangepullError;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Task = BoxFuture<'static, ()>;

/// Queue slots used by [`WorkerPool::new`]
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// Fixed-size pool of concurrent executors
pub struct WorkerPool {
    worker_count: usize,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with `worker_count` workers and the minimal queue.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(worker_count: usize) -> Result<Self, RangepullError> {
        Self::with_queue_capacity(worker_count, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a pool whose queue buffers up to `capacity` waiting tasks
    pub fn with_queue_capacity(worker_count: usize, capacity: usize) -> Result<Self, RangepullError> {
        if worker_count == 0 {
            return Err(RangepullError::InvalidOperation(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel::<Task>(capacity.max(1));
        let queue = Arc::new(AsyncMutex::new(rx));

        let workers = (0..worker_count)
            .map(|worker_id| tokio::spawn(run_worker(worker_id, queue.clone())))
            .collect();

        debug!(worker_count, capacity, "Worker pool started");

        Ok(Self {
            worker_count,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether `stop` has been called
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Enqueue a task, waiting while the queue is full.
    ///
    /// Fails with [`RangepullError::PoolClosed`] once the pool is stopped.
    pub async fn submit<F>(&self, task: F) -> Result<(), RangepullError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock().clone().ok_or(RangepullError::PoolClosed)?;
        sender
            .send(Box::pin(task))
            .await
            .map_err(|_| RangepullError::PoolClosed)
    }

    /// Close submission and wait for every queued and running task to finish.
    pub async fn stop(&self) {
        // Submitters already blocked in `send` hold their own sender clone;
        // the queue closes once they have delivered.
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }

        debug!("Stopping worker pool, draining {} workers", workers.len());
        for handle in workers {
            if let Err(e) = handle.await {
                warn!("Worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(worker_id: usize, queue: Arc<AsyncMutex<mpsc::Receiver<Task>>>) {
    loop {
        let task = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };

        let Some(task) = task else {
            break;
        };

        if AssertUnwindSafe(task).catch_unwind().await.is_err() {
            warn!(worker_id, "Task panicked; worker keeps serving");
        }
    }

    debug!(worker_id, "Worker exiting");
}
