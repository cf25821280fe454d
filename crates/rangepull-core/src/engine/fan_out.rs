//! Fan-out over the worker pool
//!
//! Runs one async action per item on a shared [`WorkerPool`] and streams
//! the results back in completion order.

use crate::engine::worker_pool::WorkerPool;
use crate::error::RangepullError;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result for one submitted item
#[derive(Debug)]
pub struct FanOutResult<K, T> {
    pub key: K,
    pub result: Result<T, RangepullError>,
}

/// Fans items out to a worker pool
#[derive(Clone)]
pub struct FanOutFetcher {
    pool: Arc<WorkerPool>,
}

impl FanOutFetcher {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    /// Run `action` once for every item.
    ///
    /// Submission happens on a background task, so this returns at once.
    /// Every item yields exactly one [`FanOutResult`]; items the pool
    /// refused carry the submission error.
    pub fn run<K, I, T, F, Fut>(&self, items: Vec<(K, I)>, action: F) -> FanOutStream<K, T>
    where
        K: Clone + Send + 'static,
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RangepullError>> + Send + 'static,
    {
        let expected = items.len();
        let (tx, rx) = mpsc::channel(expected.max(1));
        let pool = self.pool.clone();

        let producer = tokio::spawn(async move {
            debug!("Fanning out {} items over {} workers", expected, pool.worker_count());

            for (key, item) in items {
                let task_tx = tx.clone();
                let task_key = key.clone();
                let work = action(item);

                let submitted = pool
                    .submit(async move {
                        let result = work.await;
                        let _ = task_tx
                            .send(FanOutResult {
                                key: task_key,
                                result,
                            })
                            .await;
                    })
                    .await;

                if let Err(e) = submitted {
                    warn!("Fan-out submission failed: {}", e);
                    let _ = tx.send(FanOutResult { key, result: Err(e) }).await;
                }
            }
        });

        FanOutStream {
            expected,
            rx,
            producer: Some(producer),
        }
    }
}

/// Results of one [`FanOutFetcher::run`], in completion order
pub struct FanOutStream<K, T> {
    expected: usize,
    rx: mpsc::Receiver<FanOutResult<K, T>>,
    producer: Option<JoinHandle<()>>,
}

impl<K, T> FanOutStream<K, T> {
    /// Number of results this stream will yield
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub async fn recv(&mut self) -> Option<FanOutResult<K, T>> {
        self.rx.recv().await
    }

    /// Wait until every item has been handed to the pool or refused by it.
    ///
    /// Results keep arriving afterwards; stopping the pool once this returns
    /// lets every accepted item finish first.
    pub async fn submitted(&mut self) {
        if let Some(producer) = self.producer.take() {
            if let Err(e) = producer.await {
                warn!("Fan-out producer ended abnormally: {}", e);
            }
        }
    }

    /// Wait for every result
    pub async fn collect_all(mut self) -> Vec<FanOutResult<K, T>> {
        let mut results = Vec::with_capacity(self.expected);
        while let Some(result) = self.rx.recv().await {
            results.push(result);
        }
        self.submitted().await;
        results
    }
}

impl<K, T> Stream for FanOutStream<K, T> {
    type Item = FanOutResult<K, T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ten_items_over_three_workers() {
        let pool = Arc::new(WorkerPool::new(3).unwrap());
        let fetcher = FanOutFetcher::new(pool.clone());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items = (0..10).map(|i| (i, i * 10)).collect();
        let (running_c, peak_c) = (running.clone(), peak.clone());
        let mut stream = fetcher.run(items, move |value: u32| {
            let running = running_c.clone();
            let peak = peak_c.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(value + 1)
            }
        });

        assert_eq!(stream.expected(), 10);
        stream.submitted().await;
        pool.stop().await;

        let results = stream
            .collect_all()
            .now_or_never()
            .expect("every result is buffered once the pool has stopped");

        assert_eq!(results.len(), 10);
        let keys: HashSet<u32> = results.iter().map(|r| r.key).collect();
        assert_eq!(keys.len(), 10);
        for r in &results {
            assert_eq!(*r.result.as_ref().unwrap(), r.key * 10 + 1);
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn errors_are_delivered_per_item() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let fetcher = FanOutFetcher::new(pool.clone());

        let items = vec![("ok", 1u32), ("bad", 2u32)];
        let mut stream = fetcher.run(items, |n: u32| async move {
            if n == 2 {
                Err(RangepullError::Timeout)
            } else {
                Ok(n)
            }
        });

        let mut seen = Vec::new();
        while let Some(result) = stream.next().await {
            seen.push((result.key, result.result.is_ok()));
        }
        seen.sort();
        assert_eq!(seen, vec![("bad", false), ("ok", true)]);

        pool.stop().await;
    }

    #[tokio::test]
    async fn stopped_pool_reports_every_item() {
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        pool.stop().await;

        let results = FanOutFetcher::new(pool)
            .run(vec![(1, ()), (2, ())], |_| async { Ok::<_, RangepullError>(()) })
            .collect_all()
            .await;

        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r.result, Err(RangepullError::PoolClosed))));
    }

    #[tokio::test]
    async fn empty_input_ends_immediately() {
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let results = FanOutFetcher::new(pool.clone())
            .run(Vec::<(u8, ())>::new(), |_| async { Ok::<_, RangepullError>(()) })
            .collect_all()
            .await;
        assert!(results.is_empty());
        pool.stop().await;
    }
}
