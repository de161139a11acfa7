//! Concurrent image download stage.

use crate::config::{DownloadConfig, DOWNLOAD_MAX_REDIRECTS};
use crate::corpus::is_plain_component;
use crate::images::normalize_image_filename;
use crate::models::ImageJob;
use crate::stats::ConversionStats;
use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One job per destination filename. A later job replaces the url of an earlier
/// one but keeps its position.
pub fn dedupe_jobs(jobs: Vec<ImageJob>) -> Vec<ImageJob> {
    let mut unique: Vec<ImageJob> = Vec::with_capacity(jobs.len());
    let mut slots: FxHashMap<String, usize> = FxHashMap::default();

    for job in jobs {
        let filename = normalize_image_filename(&job.filename);
        if filename.is_empty() || job.url.is_empty() {
            continue;
        }
        match slots.get(&filename) {
            Some(&slot) => unique[slot].url = job.url,
            None => {
                slots.insert(filename.clone(), unique.len());
                unique.push(ImageJob {
                    url: job.url,
                    filename,
                });
            }
        }
    }
    unique
}

/// Fetches every job into `image_dir`, keeping at most `config.concurrency`
/// transfers in flight. Existing files are never requested again, and a filename
/// that would resolve outside `image_dir` counts as a failure. Individual failures
/// are logged and counted; only setup errors abort the stage.
pub async fn download_images(
    jobs: Vec<ImageJob>,
    image_dir: &Path,
    config: &DownloadConfig,
    stats: &ConversionStats,
) -> Result<()> {
    tokio::fs::create_dir_all(image_dir)
        .await
        .with_context(|| format!("Failed to create image directory: {}", image_dir.display()))?;

    let mut pending = Vec::with_capacity(jobs.len());
    for job in jobs {
        if !is_plain_component(&job.filename) {
            warn!(file = %job.filename, "Image filename is not a plain file name; not downloading");
            stats.inc_download_failed();
            continue;
        }
        let dest = image_dir.join(&job.filename);
        if dest.exists() {
            debug!(file = %job.filename, "Image already present, skipping");
            stats.inc_download_skipped();
        } else {
            pending.push((job, dest));
        }
    }

    if pending.is_empty() {
        info!("No images to download");
        return Ok(());
    }

    let client = Client::builder()
        .timeout(config.timeout())
        .redirect(reqwest::redirect::Policy::limited(DOWNLOAD_MAX_REDIRECTS))
        .build()
        .context("Failed to build download client")?;

    let pb = make_progress_bar(pending.len() as u64);
    let max_parallel = config.concurrency.max(1);
    let mut queue = pending.into_iter();
    let mut in_flight = FuturesUnordered::new();

    for (job, dest) in queue.by_ref().take(max_parallel) {
        in_flight.push(spawn_download(&client, job, dest));
    }

    while let Some(join_result) = in_flight.next().await {
        let (filename, result) = join_result.context("Download task join error")?;
        match result {
            Ok(()) => stats.inc_downloaded(),
            Err(e) => {
                stats.inc_download_failed();
                warn!(file = %filename, "Failed to download or save image {filename}. Error: {e:#}");
            }
        }
        pb.inc(1);

        if let Some((job, dest)) = queue.next() {
            in_flight.push(spawn_download(&client, job, dest));
        }
    }

    pb.finish_with_message(format!(
        "{} downloaded, {} failed",
        stats.downloaded(),
        stats.download_failed()
    ));
    Ok(())
}

fn spawn_download(
    client: &Client,
    job: ImageJob,
    dest: PathBuf,
) -> tokio::task::JoinHandle<(String, Result<()>)> {
    let client = client.clone();
    tokio::spawn(async move {
        let result = fetch_to_file(&client, &job.url, &dest).await;
        (job.filename, result)
    })
}

async fn fetch_to_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request to {url} failed"))?
        .error_for_status()?;
    let bytes = response.bytes().await.context("Failed to read response body")?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(())
}

fn make_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} images [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
