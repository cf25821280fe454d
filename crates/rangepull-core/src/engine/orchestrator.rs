//! Download orchestrator - coordinates the chunk fetchers of one download
//!
//! Each job walks `Probing -> Planning -> Dispatching -> Aggregating ->
//! Reassembling -> Done`, or drops to `Failed` at the first error. Chunks
//! run on the shared [`WorkerPool`]; the destination file is only written
//! once every chunk has reported success.

use crate::engine::chunk_fetcher::{ChunkFetcher, ChunkOutcome};
use crate::engine::range_planner::plan;
use crate::engine::reassembler::{combine, remove_chunks};
use crate::engine::worker_pool::WorkerPool;
use crate::error::RangepullError;
use crate::probe::{filename_from_url, parse_url, probe, probe_size};
use chrono::Utc;
use rangepull_types::{DownloadEvent, DownloadJob, DownloadSummary, JobStage, Settings};
use reqwest::Client;
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 1024;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Starts and tracks ranged downloads
pub struct DownloadOrchestrator {
    client: Client,
    pool: Arc<WorkerPool>,
    chunk_size: NonZeroU64,
    probe_timeout: Duration,
    chunk_timeout: Duration,
    event_tx: broadcast::Sender<DownloadEvent>,
}

impl DownloadOrchestrator {
    /// Create an orchestrator that runs its chunks on `pool`
    pub fn new(pool: Arc<WorkerPool>, settings: &Settings) -> Result<Self, RangepullError> {
        settings.validate().map_err(RangepullError::InvalidOperation)?;
        let chunk_size = NonZeroU64::new(settings.chunk_size).ok_or_else(|| {
            RangepullError::InvalidOperation("chunk size must be at least one byte".to_string())
        })?;

        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()?;

        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            client,
            pool,
            chunk_size,
            probe_timeout: Duration::from_secs(settings.probe_timeout_secs),
            chunk_timeout: Duration::from_secs(settings.chunk_timeout_secs),
            event_tx,
        })
    }

    /// Replace the HTTP client (proxies, custom TLS, ...)
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: NonZeroU64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Subscribe to events of every job started afterwards
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.event_tx.subscribe()
    }

    /// Same as [`subscribe`](Self::subscribe), as a `Stream`
    pub fn events(&self) -> BroadcastStream<DownloadEvent> {
        BroadcastStream::new(self.subscribe())
    }

    /// File name to save `url` under: the server's `Content-Disposition`
    /// name, else the last segment of the final URL.
    ///
    /// Falls back to the requested URL's name when the HEAD request fails;
    /// the download itself reports that failure.
    pub async fn suggested_filename(&self, url: &str) -> Result<String, RangepullError> {
        let parsed = parse_url(url)?;
        match probe(&self.client, &parsed, self.probe_timeout).await {
            Ok(info) => Ok(info.filename),
            Err(e) => {
                debug!("No server file name for {}: {}", url, e);
                Ok(filename_from_url(&parsed))
            }
        }
    }

    /// Start downloading `url` into `destination`.
    ///
    /// Returns at once; the job runs in the background. Subscribe before
    /// calling this to see every event of the job.
    pub fn download(&self, url: &str, destination: impl Into<PathBuf>) -> DownloadHandle {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let job = JobRunner {
            id,
            url: url.to_string(),
            destination: destination.into(),
            client: self.client.clone(),
            pool: self.pool.clone(),
            chunk_size: self.chunk_size,
            probe_timeout: self.probe_timeout,
            chunk_timeout: self.chunk_timeout,
            event_tx: self.event_tx.clone(),
            cancel: cancel.clone(),
            stage: JobStage::Probing,
        };

        DownloadHandle {
            id,
            cancel,
            task: tokio::spawn(job.run()),
        }
    }
}

/// Handle to a running download job
pub struct DownloadHandle {
    id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<Result<DownloadSummary, RangepullError>>,
}

impl DownloadHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Abort the job. In-flight chunk requests are dropped and their files removed.
    pub fn cancel(&self) {
        info!("Download {} cancelled", self.id);
        self.cancel.cancel();
    }

    /// Token that cancels this job when triggered, for use from other tasks
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the job's terminal result
    pub async fn wait(self) -> Result<DownloadSummary, RangepullError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(RangepullError::Unknown(format!("download task panicked: {}", e))),
        }
    }
}

/// State owned by one running job
struct JobRunner {
    id: Uuid,
    url: String,
    destination: PathBuf,
    client: Client,
    pool: Arc<WorkerPool>,
    chunk_size: NonZeroU64,
    probe_timeout: Duration,
    chunk_timeout: Duration,
    event_tx: broadcast::Sender<DownloadEvent>,
    cancel: CancellationToken,
    stage: JobStage,
}

impl JobRunner {
    async fn run(mut self) -> Result<DownloadSummary, RangepullError> {
        info!("Starting download {}: {} -> {:?}", self.id, self.url, self.destination);

        let result = self.execute().await;

        match &result {
            Ok(summary) => {
                info!("Download completed: {:?} ({} bytes)", summary.destination, summary.bytes);
                self.emit(DownloadEvent::Completed {
                    id: self.id,
                    bytes: summary.bytes,
                });
            }
            Err(e) => {
                let stage = e.stage().unwrap_or(self.stage);
                error!("Download {} failed during {}: {}", self.id, stage, e);
                self.stage = JobStage::Failed;
                self.emit(DownloadEvent::Failed {
                    id: self.id,
                    stage,
                    error: e.to_string(),
                });
            }
        }

        result
    }

    async fn execute(&mut self) -> Result<DownloadSummary, RangepullError> {
        let started_at = Utc::now();

        self.enter(JobStage::Probing);
        let url = parse_url(&self.url).map_err(|e| RangepullError::Probe(Box::new(e)))?;
        let total_size = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RangepullError::Cancelled),
            size = probe_size(&self.client, &url, self.probe_timeout) => {
                size.map_err(|e| RangepullError::Probe(Box::new(e)))?
            }
        };

        self.enter(JobStage::Planning);
        let ranges = plan(total_size, self.chunk_size);
        let job = DownloadJob::new(
            self.id,
            url.to_string(),
            self.destination.clone(),
            total_size,
            self.chunk_size.get(),
            self.pool.worker_count(),
        );
        let chunk_count = ranges.len();
        info!(
            "Planned {} chunks of {} bytes for {} ({} bytes, {} workers)",
            chunk_count, job.chunk_size, job.source_url, job.total_size, job.parallelism
        );
        self.emit(DownloadEvent::JobStarted {
            id: self.id,
            total_size,
            chunk_count,
        });

        if chunk_count == 0 {
            debug!("Empty resource, nothing to fetch");
        } else {
            self.fetch_chunks(&job, &url, ranges).await?;
        }

        if self.cancel.is_cancelled() {
            remove_chunks(&self.destination, chunk_count).await;
            return Err(RangepullError::Cancelled);
        }

        self.enter(JobStage::Reassembling);
        let bytes = combine(&self.destination, chunk_count)
            .await
            .map_err(|e| RangepullError::Reassembly(Box::new(e)))?;

        self.enter(JobStage::Done);
        Ok(DownloadSummary {
            id: self.id,
            destination: self.destination.clone(),
            bytes,
            chunk_count,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Dispatch every range to the pool and wait until each has reported.
    async fn fetch_chunks(
        &mut self,
        job: &DownloadJob,
        url: &Url,
        ranges: Vec<rangepull_types::ByteRange>,
    ) -> Result<(), RangepullError> {
        let chunk_count = ranges.len();
        let downloaded = Arc::new(AtomicU64::new(0));
        let chunk_cancel = self.cancel.child_token();

        let fetchers: Vec<ChunkFetcher> = ranges
            .into_iter()
            .map(|range| {
                ChunkFetcher::new(
                    self.client.clone(),
                    url.to_string(),
                    range,
                    job.total_size,
                    &job.destination,
                    self.chunk_timeout,
                    downloaded.clone(),
                    chunk_cancel.clone(),
                )
            })
            .collect();

        // Every range reports exactly once, so this never fills up.
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<ChunkOutcome>(chunk_count);

        self.enter(JobStage::Dispatching);
        let dispatcher = tokio::spawn(dispatch(
            self.pool.clone(),
            fetchers,
            outcome_tx,
            chunk_cancel.clone(),
        ));

        self.enter(JobStage::Aggregating);
        let reporter_stop = CancellationToken::new();
        let reporter = self.spawn_progress_reporter(job.total_size, downloaded.clone(), reporter_stop.clone());

        let mut first_error: Option<RangepullError> = None;
        let mut received = 0usize;
        let mut completed_bytes = 0u64;

        while received < chunk_count {
            let Some(outcome) = outcome_rx.recv().await else {
                break;
            };
            received += 1;

            let index = outcome.index;
            match outcome.into_result() {
                Ok(bytes) => {
                    completed_bytes += bytes;
                    self.emit(DownloadEvent::ChunkCompleted {
                        id: self.id,
                        index,
                        bytes,
                        completed_bytes,
                        total: job.total_size,
                    });
                }
                Err(e) if first_error.is_none() => {
                    first_error = Some(match e {
                        RangepullError::Cancelled => RangepullError::Cancelled,
                        other => RangepullError::chunk(index, other),
                    });
                    warn!("Chunk {} failed, cancelling remaining chunks", index);
                    chunk_cancel.cancel();
                }
                Err(e) => debug!("Chunk {} ended after job failure: {}", index, e),
            }
        }

        if let Err(e) = dispatcher.await {
            warn!("Chunk dispatcher ended abnormally: {}", e);
        }

        reporter_stop.cancel();
        let _ = reporter.await;

        if first_error.is_none() && received < chunk_count {
            first_error = Some(RangepullError::Unknown(format!(
                "only {} of {} chunks reported",
                received, chunk_count
            )));
        }

        match first_error {
            Some(e) => {
                remove_chunks(&job.destination, chunk_count).await;
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Spawn a background task to report progress periodically
    fn spawn_progress_reporter(
        &self,
        total: u64,
        downloaded: Arc<AtomicU64>,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let id = self.id;
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut last_downloaded = 0u64;
            let mut last_time = Instant::now();
            let mut smoothed_speed: f64 = 0.0;
            let alpha = 0.3;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(PROGRESS_INTERVAL) => {}
                }

                let now = Instant::now();
                let current = downloaded.load(Ordering::Acquire);
                let elapsed = now.duration_since(last_time).as_secs_f64();
                let instant_speed = if elapsed > 0.0 {
                    current.saturating_sub(last_downloaded) as f64 / elapsed
                } else {
                    0.0
                };
                smoothed_speed = alpha * instant_speed + (1.0 - alpha) * smoothed_speed;
                let speed = smoothed_speed as u64;

                let eta = (speed > 0).then(|| total.saturating_sub(current) / speed);

                let _ = event_tx.send(DownloadEvent::Progress {
                    id,
                    downloaded: current,
                    total,
                    speed,
                    eta,
                });

                last_downloaded = current;
                last_time = now;
            }

            let _ = event_tx.send(DownloadEvent::Progress {
                id,
                downloaded: downloaded.load(Ordering::Acquire),
                total,
                speed: smoothed_speed as u64,
                eta: None,
            });
        })
    }

    fn enter(&mut self, stage: JobStage) {
        debug!("Download {} entering {:?}", self.id, stage);
        self.stage = stage;
        self.emit(DownloadEvent::StageChanged { id: self.id, stage });
    }

    fn emit(&self, event: DownloadEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Submit one fetch task per range, in ascending index order.
///
/// Guarantees exactly one outcome per fetcher: ranges that never reach a
/// worker report their submission error instead.
async fn dispatch(
    pool: Arc<WorkerPool>,
    fetchers: Vec<ChunkFetcher>,
    outcomes: mpsc::Sender<ChunkOutcome>,
    cancel: CancellationToken,
) {
    for fetcher in fetchers {
        let index = fetcher.index();

        if cancel.is_cancelled() {
            let _ = outcomes.send(ChunkOutcome::failure(index, RangepullError::Cancelled)).await;
            continue;
        }

        let tx = outcomes.clone();
        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RangepullError::Cancelled),
            result = pool.submit(async move {
                let outcome = fetcher.fetch().await;
                let _ = tx.send(outcome).await;
            }) => result,
        };

        if let Err(e) = submitted {
            let _ = outcomes.send(ChunkOutcome::failure(index, e)).await;
        }
    }
}
