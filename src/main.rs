//! CLI entry point for segfetch.

use std::collections::HashSet;
use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use segfetch_core::download::file_name_from_url;
use segfetch_core::pool::CacheMonitor;
use segfetch_core::{
    BackpressureGate, DownloadTask, Downloader, FailureLedger, HttpClient, PoolConfig,
    RateLimiter, RcloneVfsMonitor, WorkerPool,
};
use tracing::{debug, error, info, warn};
use url::Url;

mod app_config;
mod cli;
mod progress;

use app_config::{Settings, VerbositySetting, load_config};
use cli::Args;
use progress::ProgressBoard;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let loaded = load_config(args.config.as_deref())?;
    let settings = Settings::resolve(&args, loaded.config.as_ref())?;

    // Priority: RUST_LOG env var > -q/-v flags > config verbosity > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings.verbosity.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    debug!(config_path = ?loaded.path, from_file = loaded.config.is_some(), "configuration resolved");
    debug!(?settings, "effective settings");

    let urls = read_urls(&args)?;
    if urls.is_empty() {
        info!("No input provided. Pipe URLs via stdin or pass as arguments.");
        info!("Example: echo 'https://example.com/file.iso' | segfetch");
        return Ok(ExitCode::SUCCESS);
    }
    let headers = parse_headers(&args.headers)?;

    tokio::fs::create_dir_all(&settings.staging_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create staging directory '{}'",
                settings.staging_dir.display()
            )
        })?;

    let client = HttpClient::try_with_connect_timeout(settings.connect_timeout_secs)
        .context("Failed to build HTTP client")?;
    let downloader = Downloader::new(client.clone(), RateLimiter::new(settings.rate_limit));

    let mut pool_config = PoolConfig::new(settings.concurrency);
    if settings.backpressure && settings.output_dir.is_some() {
        let monitor: Arc<dyn CacheMonitor> =
            Arc::new(RcloneVfsMonitor::new(&client, &settings.cache_endpoint));
        pool_config = pool_config.with_gate(BackpressureGate::new(monitor, settings.gate)?);
        debug!(endpoint = %settings.cache_endpoint, "backpressure enabled");
    }
    let pool = Arc::new(WorkerPool::new(downloader, pool_config)?);

    let interrupt = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling downloads");
                pool.shutdown();
            }
        })
    };

    let ledger = Arc::new(FailureLedger::new(settings.max_retries));
    let board =
        ProgressBoard::new(settings.verbosity != VerbositySetting::Quiet && io::stderr().is_terminal());
    let ctx = TaskFactory {
        settings: &settings,
        ledger: &ledger,
        board: &board,
    };

    let mut names = UniqueNames::default();
    let mut invalid = 0usize;
    let mut skipped = 0usize;
    for raw in &urls {
        let url = match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => {
                error!(url = %raw, "not an http(s) URL, skipping");
                invalid += 1;
                continue;
            }
        };

        let file_name = names.claim(&file_name_from_url(&url));
        let task = DownloadTask::new(url.as_str(), &settings.staging_dir, &file_name)
            .with_headers(headers.clone());
        let task = match &settings.output_dir {
            Some(output_dir) => task.with_final_path(output_dir.join(&file_name)),
            None => task,
        };

        if already_present(&client, &task).await {
            skipped += 1;
            continue;
        }
        if pool.submit(ctx.decorate(task)).await.is_err() {
            break;
        }
    }

    loop {
        pool.wait_idle().await;
        if pool.is_shut_down() {
            break;
        }
        let round = ledger.take_retry_round();
        if round.is_empty() {
            break;
        }
        for failed in round {
            info!(url = %failed.url, attempt = failed.retry_count, "retrying download");
            if pool.submit(ctx.decorate(failed.to_task())).await.is_err() {
                break;
            }
        }
    }

    pool.close_and_join().await;
    interrupt.abort();

    let stats = pool.stats();
    let permanent = ledger.permanently_failed();
    info!(
        completed = stats.completed(),
        failed_attempts = stats.failed(),
        permanently_failed = permanent.len(),
        cancelled = stats.cancelled(),
        relocated = stats.relocated(),
        relocation_failed = stats.relocation_failed(),
        skipped,
        invalid,
        "Download complete"
    );
    for failed in &permanent {
        error!(url = %failed.url, retries = failed.retry_count, error = %failed.error, "download failed permanently");
    }

    if pool.is_shut_down() {
        return Ok(ExitCode::from(130));
    }
    if !permanent.is_empty() || stats.relocation_failed() > 0 || invalid > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Applies the per-run settings every submitted task shares.
struct TaskFactory<'a> {
    settings: &'a Settings,
    ledger: &'a Arc<FailureLedger>,
    board: &'a ProgressBoard,
}

impl TaskFactory<'_> {
    fn decorate(&self, task: DownloadTask) -> DownloadTask {
        let mut task = task
            .with_thread_count(self.settings.threads)
            .with_failure_hook(self.ledger.hook());
        if let Some(deadline) = self.settings.task_timeout {
            task = task.with_deadline(deadline);
        }
        if let Some(sink) = self.board.sink(task.file_name()) {
            task = task.with_progress(sink);
        }
        task
    }
}

/// File names handed out during one run, so no two tasks share a staging or final path.
#[derive(Debug, Default)]
struct UniqueNames {
    taken: HashSet<String>,
}

impl UniqueNames {
    /// Claims `name`, or the first free `stem-N.ext` variant when it is taken.
    fn claim(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            return name.to_string();
        }

        let path = Path::new(name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
        let extension = path.extension().and_then(|e| e.to_str());
        let unique = (1u32..)
            .map(|n| match extension {
                Some(extension) => format!("{stem}-{n}.{extension}"),
                None => format!("{stem}-{n}"),
            })
            .find(|candidate| !self.taken.contains(candidate))
            .unwrap_or_else(|| name.to_string());
        warn!(file = %name, renamed = %unique, "file name already used in this run");
        self.taken.insert(unique.clone());
        unique
    }
}

/// Reads URLs from positional arguments, or from stdin when none were given.
fn read_urls(args: &Args) -> Result<Vec<String>> {
    let input = if !args.urls.is_empty() {
        args.urls.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read URLs from stdin")?;
        buffer
    } else {
        String::new()
    };

    Ok(input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Parses `Name: value` header arguments.
fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let Some((name, value)) = entry.split_once(':') else {
            bail!("Invalid header '{entry}': expected 'Name: value'");
        };
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("Invalid header name in '{entry}'"))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("Invalid header value in '{entry}'"))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Returns true when the final file already exists with the remote size.
async fn already_present(client: &HttpClient, task: &DownloadTask) -> bool {
    let Some(final_path) = task.final_path() else {
        return false;
    };
    let Some(local_size) = local_size(final_path).await else {
        return false;
    };

    match client.remote_content_length(task.url(), task.headers()).await {
        Ok(Some(remote_size)) if remote_size == local_size => {
            info!(path = %final_path.display(), size = local_size, "already downloaded, skipping");
            true
        }
        Ok(Some(remote_size)) => {
            warn!(
                path = %final_path.display(),
                local_size,
                remote_size,
                "existing file has a different size, downloading again"
            );
            false
        }
        Ok(None) => {
            info!(path = %final_path.display(), "remote size unknown, keeping existing file");
            true
        }
        Err(e) => {
            warn!(path = %final_path.display(), error = %e, "remote size lookup failed, keeping existing file");
            true
        }
    }
}

async fn local_size(path: &Path) -> Option<u64> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.is_file().then(|| metadata.len())
}
