//! Shared types for rangepull
//!
//! This crate contains the plain data structures passed between the
//! download engine and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Download Types
// ============================================================================

/// A single ranged download, created once the resource size is known
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: Uuid,
    pub source_url: String,
    pub destination: PathBuf,
    pub total_size: u64,
    pub chunk_size: u64,
    pub parallelism: usize,
    pub created_at: DateTime<Utc>,
}

impl DownloadJob {
    pub fn new(
        id: Uuid,
        source_url: String,
        destination: PathBuf,
        total_size: u64,
        chunk_size: u64,
        parallelism: usize,
    ) -> Self {
        Self {
            id,
            source_url,
            destination,
            total_size,
            chunk_size,
            parallelism,
            created_at: Utc::now(),
        }
    }
}

/// A contiguous byte range of a resource. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// 0-based position of this range in the plan
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(index: u32, start: u64, end: u64) -> Self {
        Self { index, start, end }
    }

    /// Number of bytes covered by this range
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Ranges always hold at least one byte
    pub fn is_empty(&self) -> bool {
        false
    }

    /// 1-based number used in chunk file names
    pub fn part_number(&self) -> u32 {
        self.index + 1
    }

    /// Value for the HTTP `Range` request header
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Lifecycle stage of a download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Probing,
    Planning,
    Dispatching,
    Aggregating,
    Reassembling,
    Done,
    Failed,
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStage::Probing => "probe",
            JobStage::Planning => "planning",
            JobStage::Dispatching => "dispatch",
            JobStage::Aggregating => "chunk",
            JobStage::Reassembling => "reassembly",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a finished job produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSummary {
    pub id: Uuid,
    pub destination: PathBuf,
    pub bytes: u64,
    pub chunk_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DownloadSummary {
    /// Average throughput over the whole job, in bytes per second
    pub fn average_speed(&self) -> u64 {
        let millis = (self.finished_at - self.started_at).num_milliseconds();
        if millis <= 0 {
            return self.bytes;
        }
        (self.bytes as f64 / (millis as f64 / 1000.0)) as u64
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the engine while jobs run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DownloadEvent {
    JobStarted {
        id: Uuid,
        total_size: u64,
        chunk_count: usize,
    },
    StageChanged {
        id: Uuid,
        stage: JobStage,
    },
    ChunkCompleted {
        id: Uuid,
        index: u32,
        bytes: u64,
        /// Sum of bytes from every chunk completed so far
        completed_bytes: u64,
        total: u64,
    },
    Progress {
        id: Uuid,
        downloaded: u64,
        total: u64,
        speed: u64,
        eta: Option<u64>, // seconds
    },
    Completed {
        id: Uuid,
        bytes: u64,
    },
    Failed {
        id: Uuid,
        stage: JobStage,
        error: String,
    },
}

impl DownloadEvent {
    /// Id of the job this event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            DownloadEvent::JobStarted { id, .. }
            | DownloadEvent::StageChanged { id, .. }
            | DownloadEvent::ChunkCompleted { id, .. }
            | DownloadEvent::Progress { id, .. }
            | DownloadEvent::Completed { id, .. }
            | DownloadEvent::Failed { id, .. } => *id,
        }
    }

    /// Whether this event ends the job's stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadEvent::Completed { .. } | DownloadEvent::Failed { .. }
        )
    }
}

// ============================================================================
// API Types
// ============================================================================

/// Metadata about a remote resource (from probing)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub url: String,
    pub final_url: Option<String>,
    pub filename: String,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub accepts_ranges: bool,
    pub error: Option<String>,
}

// ============================================================================
// Settings Types
// ============================================================================

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub download_dir: PathBuf,
    /// Concurrent chunk requests per download
    pub workers: usize,
    /// Size of each ranged request in bytes
    pub chunk_size: u64,
    pub probe_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    /// Whole-download retries on retryable failures (0 disables)
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: dirs::download_dir()
                .map(|p| p.join("rangepull"))
                .unwrap_or_else(|| PathBuf::from("./downloaded")),
            workers: 8,
            chunk_size: 512 * 1024,
            probe_timeout_secs: 10,
            chunk_timeout_secs: 60,
            connect_timeout_secs: 30,
            user_agent: concat!("rangepull/", env!("CARGO_PKG_VERSION")).to_string(),
            max_retries: 0,
            retry_delay_secs: 5,
        }
    }
}

impl Settings {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        if self.chunk_size == 0 {
            return Err("chunk_size must be at least 1 byte".to_string());
        }
        if self.probe_timeout_secs == 0 {
            return Err("probe_timeout_secs must be at least 1".to_string());
        }
        if self.chunk_timeout_secs == 0 {
            return Err("chunk_timeout_secs must be at least 1".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be at least 1".to_string());
        }
        if self.user_agent.trim().is_empty() {
            return Err("user_agent must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_helpers() {
        let range = ByteRange::new(2, 1024, 2047);
        assert_eq!(range.len(), 1024);
        assert_eq!(range.part_number(), 3);
        assert_eq!(range.header_value(), "bytes=1024-2047");
    }

    #[test]
    fn settings_fill_missing_fields_from_defaults() {
        let settings: Settings = serde_json::from_str(r#"{ "workers": 3 }"#).unwrap();
        assert_eq!(settings.workers, 3);
        assert_eq!(settings.chunk_size, 512 * 1024);
        assert_eq!(settings.probe_timeout_secs, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zero_counts_or_timeouts_are_invalid() {
        assert!(Settings::default().validate().is_ok());

        let settings = Settings {
            workers: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            chunk_size: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            probe_timeout_secs: 0,
            ..Settings::default()
        };
        assert!(settings.validate().unwrap_err().contains("probe_timeout_secs"));

        let settings = Settings {
            chunk_timeout_secs: 0,
            ..Settings::default()
        };
        assert!(settings.validate().unwrap_err().contains("chunk_timeout_secs"));

        let settings = Settings {
            connect_timeout_secs: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn event_is_tagged_and_terminal() {
        let id = Uuid::new_v4();
        let event = DownloadEvent::Failed {
            id,
            stage: JobStage::Probing,
            error: "no length".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Failed");
        assert_eq!(json["payload"]["stage"], "probing");
        assert!(event.is_terminal());
        assert_eq!(event.job_id(), id);
        assert!(!DownloadEvent::StageChanged { id, stage: JobStage::Planning }.is_terminal());
    }
}
