//! Progress bar driven by download events

use crate::output::{format_bytes, format_eta, format_speed};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rangepull_types::{DownloadEvent, JobStage};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

/// Single progress bar for one download job
pub struct DownloadProgress {
    bar: ProgressBar,
    label: String,
}

impl DownloadProgress {
    pub fn new(label: impl Into<String>) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );

        let label = label.into();
        bar.set_message(label.clone());

        Self { bar, label }
    }

    /// Follow the events of job `id` until it ends
    pub async fn run(self, mut events: broadcast::Receiver<DownloadEvent>, id: Uuid) {
        loop {
            match events.recv().await {
                Ok(event) if event.job_id() == id => {
                    let terminal = event.is_terminal();
                    self.handle_event(&event);
                    if terminal {
                        break;
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Update the bar from an event
    pub fn handle_event(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::JobStarted {
                total_size,
                chunk_count,
                ..
            } => {
                self.bar.set_length(*total_size);
                self.bar.set_message(format!(
                    "{} ({} chunks)",
                    self.label,
                    chunk_count
                ));
            }

            DownloadEvent::StageChanged { stage, .. } => {
                if *stage == JobStage::Reassembling {
                    self.bar.set_message(format!("{} merging", self.label));
                }
            }

            DownloadEvent::Progress {
                downloaded,
                speed,
                eta,
                ..
            } => {
                self.bar.set_position(*downloaded);
                self.bar.set_message(format!(
                    "{} {} eta {}",
                    self.label,
                    format_speed(*speed),
                    format_eta(eta.unwrap_or(0))
                ));
            }

            DownloadEvent::ChunkCompleted {
                completed_bytes, ..
            } => {
                if *completed_bytes > self.bar.position() {
                    self.bar.set_position(*completed_bytes);
                }
            }

            DownloadEvent::Completed { bytes, .. } => {
                self.bar.set_position(*bytes);
                self.bar.finish_with_message(format!(
                    "{} Download complete ({})",
                    style("✓").green().bold(),
                    format_bytes(*bytes)
                ));
            }

            DownloadEvent::Failed { stage, error, .. } => {
                self.bar.abandon_with_message(format!(
                    "{} Failed during {}: {}",
                    style("✗").red().bold(),
                    stage,
                    error
                ));
            }
        }
    }
}
