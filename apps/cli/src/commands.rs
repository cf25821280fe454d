//! CLI command implementations

use crate::output::{format_bytes, format_speed, print_json, truncate};
use crate::progress::DownloadProgress;
use crate::{ConfigAction, GetArgs, OutputFormat};
use anyhow::{anyhow, Result};
use console::style;
use rangepull_core::{DownloadOrchestrator, MetadataCollector, Storage, WorkerPool};
use rangepull_types::{DownloadSummary, Settings};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Hard ceiling on concurrent requests per job
pub const MAX_WORKERS: usize = 32;

/// Clamp a requested worker count to `1..=min(MAX_WORKERS, cpus * 4)`
pub fn clamp_workers(requested: usize) -> usize {
    let cpu_cap = std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(MAX_WORKERS);
    requested.clamp(1, MAX_WORKERS.min(cpu_cap).max(1))
}

// ============================================================================
// Download Commands
// ============================================================================

pub async fn get(storage: &Storage, args: GetArgs, format: OutputFormat) -> Result<()> {
    let mut settings = storage.load_settings().await?;
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    if let Some(chunk_size) = args.chunk_size {
        settings.chunk_size = chunk_size;
    }
    if let Some(retries) = args.retries {
        settings.max_retries = retries;
    }
    settings.validate().map_err(|e| anyhow!(e))?;

    let workers = clamp_workers(settings.workers);
    if workers != settings.workers {
        warn!("Clamped workers from {} to {}", settings.workers, workers);
    }

    let pool = Arc::new(WorkerPool::new(workers)?);
    let orchestrator = DownloadOrchestrator::new(pool.clone(), &settings)?;

    let destination = match target(args.output, &settings.download_dir) {
        Target::File(path) => path,
        Target::Directory(dir) => dir.join(orchestrator.suggested_filename(&args.url).await?),
    };
    let interactive = std::io::stdin().is_terminal();
    if needs_confirmation(destination.exists(), args.force, interactive)
        && !confirm_overwrite(&destination)?
    {
        pool.stop().await;
        println!("{} Skipped {}", style("○").dim(), destination.display());
        return Ok(());
    }

    let show_progress = !args.no_progress
        && matches!(format, OutputFormat::Human)
        && console::Term::stderr().is_term();
    let label = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.url.clone());

    let mut attempt = 0;
    let result = loop {
        let events = orchestrator.subscribe();
        let handle = orchestrator.download(&args.url, &destination);
        let id = handle.id();
        info!("Download {} started (attempt {})", id, attempt + 1);

        let progress = show_progress
            .then(|| tokio::spawn(DownloadProgress::new(label.clone()).run(events, id)));

        let token = handle.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });

        let result = handle.wait().await;
        interrupt.abort();
        if let Some(progress) = progress {
            let _ = progress.await;
        }

        match result {
            Err(e) if attempt < settings.max_retries && e.is_retryable() => {
                attempt += 1;
                eprintln!(
                    "{} {} (retry {}/{} in {}s)",
                    style("!").yellow().bold(),
                    e,
                    attempt,
                    settings.max_retries,
                    settings.retry_delay_secs
                );
                tokio::time::sleep(Duration::from_secs(settings.retry_delay_secs)).await;
            }
            other => break other,
        }
    };

    pool.stop().await;
    let summary = result?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => print_summary_table(&summary),
        OutputFormat::Human => {
            println!(
                "{} Downloaded {}",
                style("✓").green().bold(),
                style(summary.destination.display()).cyan()
            );
            println!("  Size: {}", format_bytes(summary.bytes));
            println!("  Chunks: {}", summary.chunk_count);
            println!("  Average speed: {}", format_speed(summary.average_speed()));
        }
    }

    Ok(())
}

/// Where a download goes before the file name is known
#[derive(Debug, PartialEq)]
enum Target {
    /// Exact path given with `-o`
    File(PathBuf),
    /// Directory that receives the server's file name
    Directory(PathBuf),
}

fn target(output: Option<PathBuf>, download_dir: &Path) -> Target {
    match output {
        Some(path) if path.is_dir() => Target::Directory(path),
        Some(path) => Target::File(path),
        None => Target::Directory(download_dir.to_path_buf()),
    }
}

/// Only an existing file, without `--force`, on an interactive stdin asks
fn needs_confirmation(exists: bool, force: bool, interactive: bool) -> bool {
    exists && !force && interactive
}

fn confirm_overwrite(path: &Path) -> Result<bool> {
    use dialoguer::Confirm;
    let confirmed = Confirm::new()
        .with_prompt(format!("{} already exists. Replace it?", path.display()))
        .default(false)
        .interact()?;
    Ok(confirmed)
}

fn print_summary_table(summary: &DownloadSummary) {
    use tabled::{Table, Tabled};

    #[derive(Tabled)]
    struct SummaryRow {
        file: String,
        size: String,
        chunks: usize,
        speed: String,
    }

    let row = SummaryRow {
        file: truncate(&summary.destination.display().to_string(), 60),
        size: format_bytes(summary.bytes),
        chunks: summary.chunk_count,
        speed: format_speed(summary.average_speed()),
    };
    println!("{}", Table::new([row]));
}

// ============================================================================
// Probe Commands
// ============================================================================

pub async fn probe_urls(
    storage: &Storage,
    urls: Vec<String>,
    save_dir: Option<PathBuf>,
    workers: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let settings = storage.load_settings().await?;
    let pool = Arc::new(WorkerPool::new(clamp_workers(
        workers.unwrap_or(settings.workers),
    ))?);
    let collector = MetadataCollector::new(pool.clone(), &settings)?;

    let results = collector.collect(urls, save_dir.as_deref()).await;
    pool.stop().await;
    let results = results?;

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct LinkRow {
                filename: String,
                size: String,
                ranges: String,
                error: String,
            }

            let rows: Vec<LinkRow> = results
                .iter()
                .map(|info| LinkRow {
                    filename: truncate(&info.filename, 40),
                    size: info
                        .size
                        .map(format_bytes)
                        .unwrap_or_else(|| "?".to_string()),
                    ranges: if info.accepts_ranges { "Yes" } else { "No" }.to_string(),
                    error: info.error.clone().unwrap_or_default(),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            for info in &results {
                if let Some(ref error) = info.error {
                    println!(
                        "{} {}: {}",
                        style("✗").red(),
                        info.url,
                        style(error).red()
                    );
                    continue;
                }

                println!("{} {}", style("✓").green(), info.filename);
                match info.size {
                    Some(size) => println!("    Size: {}", format_bytes(size)),
                    None => println!("    Size: {}", style("unknown (cannot be chunked)").yellow()),
                }
                if let Some(ref ct) = info.content_type {
                    println!("    Type: {}", ct);
                }
                if let Some(ref final_url) = info.final_url {
                    println!("    Redirected to: {}", final_url);
                }
                println!(
                    "    Ranges: {}",
                    if info.accepts_ranges {
                        style("Yes").green()
                    } else {
                        style("No").yellow()
                    }
                );
            }
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

const CONFIG_KEYS: &[&str] = &[
    "download_dir",
    "workers",
    "chunk_size",
    "probe_timeout_secs",
    "chunk_timeout_secs",
    "connect_timeout_secs",
    "user_agent",
    "max_retries",
    "retry_delay_secs",
];

fn config_value(settings: &Settings, key: &str) -> Result<String> {
    let value = match key {
        "download_dir" => settings.download_dir.display().to_string(),
        "workers" => settings.workers.to_string(),
        "chunk_size" => settings.chunk_size.to_string(),
        "probe_timeout_secs" => settings.probe_timeout_secs.to_string(),
        "chunk_timeout_secs" => settings.chunk_timeout_secs.to_string(),
        "connect_timeout_secs" => settings.connect_timeout_secs.to_string(),
        "user_agent" => settings.user_agent.clone(),
        "max_retries" => settings.max_retries.to_string(),
        "retry_delay_secs" => settings.retry_delay_secs.to_string(),
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    };
    Ok(value)
}

fn set_config_value(settings: &mut Settings, key: &str, value: String) -> Result<()> {
    match key {
        "download_dir" => settings.download_dir = PathBuf::from(value),
        "workers" => settings.workers = value.parse()?,
        "chunk_size" => settings.chunk_size = value.parse()?,
        "probe_timeout_secs" => settings.probe_timeout_secs = value.parse()?,
        "chunk_timeout_secs" => settings.chunk_timeout_secs = value.parse()?,
        "connect_timeout_secs" => settings.connect_timeout_secs = value.parse()?,
        "user_agent" => settings.user_agent = value,
        "max_retries" => settings.max_retries = value.parse()?,
        "retry_delay_secs" => settings.retry_delay_secs = value.parse()?,
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    }
    settings.validate().map_err(|e| anyhow!(e))
}

pub async fn config_action(
    storage: &Storage,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = storage.load_settings().await?;

            match format {
                OutputFormat::Json => print_json(&settings)?,
                _ => {
                    println!("rangepull configuration ({}):", storage.settings_path().display());
                    println!();
                    for key in CONFIG_KEYS {
                        println!("  {}: {}", key, config_value(&settings, key)?);
                    }
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let settings = storage.load_settings().await?;
            println!("{}", config_value(&settings, &key)?);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut settings = storage.load_settings().await?;
            set_config_value(&mut settings, &key, value)?;
            storage.save_settings(&settings).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset { yes }) => {
            use dialoguer::Confirm;

            let confirmed = yes
                || Confirm::new()
                    .with_prompt("Reset all settings to defaults?")
                    .default(false)
                    .interact()?;

            if confirmed {
                storage.reset_settings().await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}
