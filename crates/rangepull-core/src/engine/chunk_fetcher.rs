//! Chunk fetcher - downloads a single byte range to its own chunk file
//!
//! Each fetcher is independent and writes only to `<dest>.partNNN`.
//! The file is removed on every failure path; only a fully verified chunk
//! is left on disk for the reassembler.

use crate::engine::reassembler::chunk_path;
use crate::error::RangepullError;
use futures::TryStreamExt;
use rangepull_types::ByteRange;
use reqwest::{header, Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Size of the buffer used to stream a response body to disk
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Result of fetching one range
#[derive(Debug)]
pub struct ChunkOutcome {
    pub index: u32,
    pub bytes_written: u64,
    pub error: Option<RangepullError>,
}

impl ChunkOutcome {
    pub fn success(index: u32, bytes_written: u64) -> Self {
        Self {
            index,
            bytes_written,
            error: None,
        }
    }

    pub fn failure(index: u32, error: RangepullError) -> Self {
        Self {
            index,
            bytes_written: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<u64, RangepullError> {
        match self.error {
            None => Ok(self.bytes_written),
            Some(e) => Err(e),
        }
    }
}

/// Downloads one [`ByteRange`] of a resource into its chunk file
pub struct ChunkFetcher {
    client: Client,
    url: String,
    range: ByteRange,
    total_size: u64,
    chunk_path: PathBuf,
    timeout: Duration,
    downloaded: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl ChunkFetcher {
    /// Create a fetcher writing next to `destination`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        url: String,
        range: ByteRange,
        total_size: u64,
        destination: &Path,
        timeout: Duration,
        downloaded: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> Self {
        let chunk_path = chunk_path(destination, range.part_number());

        Self {
            client,
            url,
            range,
            total_size,
            chunk_path,
            timeout,
            downloaded,
            cancel,
        }
    }

    pub fn index(&self) -> u32 {
        self.range.index
    }

    pub fn chunk_path(&self) -> &Path {
        &self.chunk_path
    }

    /// Run the fetch. Never panics on transport or disk errors; they come
    /// back in the outcome.
    pub async fn fetch(self) -> ChunkOutcome {
        let index = self.range.index;
        let cancel = self.cancel.clone();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RangepullError::Cancelled),
            result = self.run() => result,
        };

        match result {
            Ok(bytes) => {
                debug!("Chunk {} complete ({} bytes)", index, bytes);
                ChunkOutcome::success(index, bytes)
            }
            Err(RangepullError::Cancelled) => {
                debug!("Chunk {} cancelled", index);
                ChunkOutcome::failure(index, RangepullError::Cancelled)
            }
            Err(e) => {
                warn!("Chunk {} failed: {}", index, e);
                ChunkOutcome::failure(index, e)
            }
        }
    }

    async fn run(&self) -> Result<u64, RangepullError> {
        let index = self.range.index;
        let expected = self.range.len();
        let range_header = self.range.header_value();
        debug!("Chunk {} requesting range: {}", index, range_header);

        let response = self
            .client
            .get(&self.url)
            .header(header::RANGE, range_header)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(RangepullError::from_request)?;

        let status = response.status();
        let covers_whole = self.range.start == 0 && self.range.end + 1 == self.total_size;
        if status == StatusCode::OK && !covers_whole {
            return Err(RangepullError::ServerError {
                status: status.as_u16(),
                message: format!("server ignored Range header for chunk {}", index),
            });
        }
        if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
            return Err(RangepullError::ServerError {
                status: status.as_u16(),
                message: format!("failed to download chunk {}", index),
            });
        }

        if let Some(declared) = response.content_length() {
            if declared != expected {
                return Err(RangepullError::LengthMismatch {
                    index,
                    expected,
                    actual: declared,
                });
            }
        }

        if let Some(parent) = self.chunk_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let guard = PartFileGuard::new(self.chunk_path.clone());
        let mut counted = CountedBytes::new(&self.downloaded);
        let mut file = File::create(&self.chunk_path).await?;

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(body);
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut written: u64 = 0;

        loop {
            let n = reader.read(&mut buffer).await.map_err(body_error)?;
            if n == 0 {
                break;
            }

            written += n as u64;
            if written > expected {
                return Err(RangepullError::LengthMismatch {
                    index,
                    expected,
                    actual: written,
                });
            }

            file.write_all(&buffer[..n]).await?;
            counted.add(n as u64);
        }

        file.flush().await?;
        file.sync_all().await?;

        if written != expected {
            return Err(RangepullError::LengthMismatch {
                index,
                expected,
                actual: written,
            });
        }

        guard.commit();
        counted.commit();
        Ok(written)
    }
}

/// Turn a body read error back into the transport error it wraps
fn body_error(error: std::io::Error) -> RangepullError {
    if error.get_ref().is_some_and(|inner| inner.is::<reqwest::Error>()) {
        match error.into_inner().map(|inner| inner.downcast::<reqwest::Error>()) {
            Some(Ok(e)) => RangepullError::from_request(*e),
            Some(Err(other)) => RangepullError::Unknown(other.to_string()),
            None => RangepullError::Unknown("body read failed".to_string()),
        }
    } else {
        RangepullError::Io(error)
    }
}

/// Deletes a partially written chunk file unless committed
struct PartFileGuard {
    path: PathBuf,
    armed: bool,
}

impl PartFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for PartFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial chunk {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial chunk {:?}: {}", self.path, e),
        }
    }
}

/// Bytes added to the shared progress counter by one chunk attempt.
///
/// They are taken back out on drop unless committed, so a chunk that fails
/// or is cancelled leaves no trace in the job's downloaded total.
struct CountedBytes<'a> {
    counter: &'a AtomicU64,
    added: u64,
    committed: bool,
}

impl<'a> CountedBytes<'a> {
    fn new(counter: &'a AtomicU64) -> Self {
        Self {
            counter,
            added: 0,
            committed: false,
        }
    }

    fn add(&mut self, n: u64) {
        self.counter.fetch_add(n, Ordering::AcqRel);
        self.added += n;
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for CountedBytes<'_> {
    fn drop(&mut self) {
        if !self.committed && self.added > 0 {
            self.counter.fetch_sub(self.added, Ordering::AcqRel);
        }
    }
}
