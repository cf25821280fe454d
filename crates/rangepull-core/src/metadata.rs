//! Metadata collection - probes many URLs at once over the worker pool

use crate::engine::{FanOutFetcher, WorkerPool};
use crate::error::RangepullError;
use crate::probe::{parse_url, probe};
use rangepull_types::{ResourceInfo, Settings};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Probes a batch of URLs concurrently and optionally saves the results
pub struct MetadataCollector {
    client: Client,
    fan_out: FanOutFetcher,
    timeout: Duration,
}

impl MetadataCollector {
    pub fn new(pool: Arc<WorkerPool>, settings: &Settings) -> Result<Self, RangepullError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            fan_out: FanOutFetcher::new(pool),
            timeout: Duration::from_secs(settings.probe_timeout_secs),
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Probe every URL. Results come back in input order; per-URL failures
    /// are recorded in [`ResourceInfo::error`].
    ///
    /// With `save_dir`, each result is also written to
    /// `NNN_<name>_data.json` (1-based position).
    pub async fn collect(
        &self,
        urls: Vec<String>,
        save_dir: Option<&Path>,
    ) -> Result<Vec<ResourceInfo>, RangepullError> {
        info!("Collecting metadata for {} URLs", urls.len());

        let client = self.client.clone();
        let timeout = self.timeout;
        let items = urls
            .into_iter()
            .enumerate()
            .map(|(idx, url)| ((idx, url.clone()), url))
            .collect();

        let results = self
            .fan_out
            .run(items, move |url: String| {
                let client = client.clone();
                async move {
                    let parsed = parse_url(&url)?;
                    probe(&client, &parsed, timeout).await
                }
            })
            .collect_all()
            .await;

        let mut infos: Vec<(usize, ResourceInfo)> = results
            .into_iter()
            .map(|r| {
                let (idx, url) = r.key;
                let info = r.result.unwrap_or_else(|e| {
                    warn!("Probe of {} failed: {}", url, e);
                    failed_info(url, e)
                });
                (idx, info)
            })
            .collect();
        infos.sort_by_key(|(idx, _)| *idx);

        if let Some(dir) = save_dir {
            tokio::fs::create_dir_all(dir).await?;
            for (idx, info) in &infos {
                let path = metadata_path(dir, *idx, &info.filename);
                let content = serde_json::to_string_pretty(info)?;
                tokio::fs::write(&path, content).await?;
                debug!("Wrote metadata {:?}", path);
            }
        }

        Ok(infos.into_iter().map(|(_, info)| info).collect())
    }
}

fn failed_info(url: String, error: RangepullError) -> ResourceInfo {
    let filename = url::Url::parse(&url)
        .map(|u| crate::probe::filename_from_url(&u))
        .unwrap_or_else(|_| "download".to_string());

    ResourceInfo {
        url,
        final_url: None,
        filename,
        size: None,
        content_type: None,
        accepts_ranges: false,
        error: Some(error.to_string()),
    }
}

/// `<dir>/NNN_<snake_name>_data.json` for the 0-based `idx`
pub fn metadata_path(dir: &Path, idx: usize, filename: &str) -> PathBuf {
    dir.join(format!("{:03}_{}_data.json", idx + 1, snake_case(filename)))
}

/// Lowercase ASCII alphanumerics joined by single underscores
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        "item".to_string()
    } else {
        trimmed.to_string()
    }
}
