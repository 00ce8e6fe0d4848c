//! Album download pipeline: read the listing, resolve every track page to a
//! media link, then stream the media files to disk.
//!
//! Both stages run the same way: the work list is split by
//! [`planer::plan`], each chunk goes to its own worker task, and the chunk
//! results are merged back in chunk order once every worker has joined.

mod executor;
pub mod planer;
pub mod report;
mod resolver;

use std::future::Future;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

pub use executor::download_all;
pub use planer::{Chunk, plan};
pub use report::{DownloadedFile, ItemFailure, RunReport};
pub use resolver::{resolve_all, select_media_link};

use crate::catalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::page::Page;
use crate::progress::{self, ProgressEvent, Reporter, Stage};
use crate::utils::limited_spawner::LimitedSpawner;

/// What one worker produced for its chunk.
#[derive(Debug)]
pub(crate) struct ChunkOutcome<T> {
    pub done: Vec<T>,
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
}

impl<T> Default for ChunkOutcome<T> {
    fn default() -> Self {
        ChunkOutcome {
            done: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
        }
    }
}

/// Merged result of a whole stage, in work-list order.
#[derive(Debug)]
pub struct StageOutcome<T> {
    pub done: Vec<T>,
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
}

/// Runs `worker` once per planned chunk and merges the outcomes by chunk
/// index, never by completion order.
pub(crate) async fn run_stage<T, F, Fut>(
    stage: Stage,
    items: &[String],
    parallelism: NonZeroUsize,
    sink: &Reporter,
    worker: F,
) -> Result<StageOutcome<T>>
where
    T: Send + 'static,
    F: Fn(Chunk<String>, Reporter) -> Fut,
    Fut: Future<Output = ChunkOutcome<T>> + Send + 'static,
{
    let chunks = plan(items, parallelism.get());
    info!(
        ?stage,
        workers = chunks.len(),
        items = items.len(),
        "using {} workers for {} items",
        chunks.len(),
        items.len()
    );
    sink.emit(ProgressEvent::StageStarted {
        stage,
        total: items.len(),
        workers: chunks.len(),
    });

    let (reporter, relay) = progress::relay(stage, items.len(), sink.clone());
    let spawner = LimitedSpawner::new(parallelism);
    let results = spawner
        .run_ordered(
            chunks
                .iter()
                .cloned()
                .map(|chunk| worker(chunk, reporter.clone())),
        )
        .await?;

    drop(reporter);
    if let Err(err) = relay.await {
        warn!(%err, "progress relay stopped early");
    }

    let mut outcome = StageOutcome {
        done: Vec::new(),
        failures: Vec::new(),
        cancelled: false,
    };
    for (chunk, result) in chunks.into_iter().zip(results) {
        match result {
            Ok(part) => {
                outcome.done.extend(part.done);
                outcome.failures.extend(part.failures);
                outcome.cancelled |= part.cancelled;
            }
            Err(err) => {
                let worker = chunk.index;
                warn!(worker, %err, "worker did not finish");
                for url in chunk.items {
                    outcome.failures.push(ItemFailure::new(
                        stage,
                        url,
                        Error::Worker {
                            worker,
                            reason: err.to_string(),
                        },
                    ));
                }
            }
        }
    }
    Ok(outcome)
}

/// Awaits one network operation, giving up after `timeout` or as soon as
/// the run is cancelled.
pub(crate) async fn guarded<T>(
    cancel: &CancellationToken,
    timeout: Duration,
    url: &str,
    op: impl Future<Output = reqwest::Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(timeout, op) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::network(url, err)),
            Err(_) => Err(Error::Timeout { url: url.to_string() }),
        },
    }
}

pub(crate) fn check_status(url: &str, response: &Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::HttpStatus {
            url: url.to_string(),
            status,
        })
    }
}

pub(crate) async fn fetch_text(
    client: &Client,
    url: &str,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<String> {
    let response = guarded(cancel, config.request_timeout, url, client.get(url).send()).await?;
    check_status(url, &response)?;
    guarded(cancel, config.request_timeout, url, response.text()).await
}

/// Everything the pipeline needs from the album listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub album: String,
    pub formats: Vec<String>,
    pub detail_links: Vec<String>,
}

/// Parses a listing page. With `format` set, an unsupported format is an
/// error carrying the formats the album does offer.
pub fn read_listing(body: &str, origin: &Url, format: Option<&str>) -> Result<Listing> {
    let page = Page::parse(body);
    let album = catalog::album_title(&page)?;
    let table = catalog::song_table(&page.root())?;
    let formats = catalog::available_formats(&table)?;

    if let Some(format) = format {
        if !catalog::is_format_available(&table, format)? {
            return Err(Error::FormatUnavailable {
                requested: format.to_string(),
                available: formats,
            });
        }
    }

    let detail_links = catalog::extract_detail_links(&table, origin);
    Ok(Listing {
        album,
        formats,
        detail_links,
    })
}

fn origin(config: &Config) -> Result<Url> {
    Url::parse(&config.base_origin).map_err(|source| Error::InvalidUrl {
        url: config.base_origin.clone(),
        source,
    })
}

async fn fetch_listing(
    config: &Config,
    album_url: &str,
    format: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Listing> {
    let origin = origin(config)?;
    let client = config
        .build_client()
        .map_err(|err| Error::network(album_url, err))?;
    let body = fetch_text(&client, album_url, config, cancel).await?;
    let listing = read_listing(&body, &origin, format)?;
    info!(album = %listing.album, tracks = listing.detail_links.len(), "{} was loaded", listing.album);
    Ok(listing)
}

/// Title and offered formats of an album, without downloading anything.
pub async fn formats(config: &Config, album_url: &str, cancel: &CancellationToken) -> Result<Listing> {
    fetch_listing(config, album_url, None, cancel).await
}

/// Downloads every track of the album at `album_url` in the configured
/// format into `<output_root>/<album title>`.
///
/// Only problems with the listing page itself, the format, or the album
/// directory are returned as errors. Per-track problems end up in the
/// report, and a cancelled run returns whatever was finished so far.
pub async fn download(
    config: Config,
    album_url: &str,
    sink: Reporter,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let config = Arc::new(config);
    let listing = fetch_listing(&config, album_url, Some(config.format.as_str()), &cancel).await?;

    let mut report = RunReport {
        album: listing.album.clone(),
        detail_links: listing.detail_links.len(),
        ..Default::default()
    };
    if listing.detail_links.is_empty() {
        warn!(album = %listing.album, "listing has no track links");
        return Ok(report);
    }

    let directory = config.output_root.join(&listing.album);
    create_album_dir(&directory).await?;
    report.directory = directory.clone();

    let resolved = resolve_all(&listing.detail_links, Arc::clone(&config), &sink, &cancel).await?;
    report.media_links = resolved.done;
    report.failures.extend(resolved.failures);
    report.cancelled = resolved.cancelled;
    if report.cancelled {
        warn!("cancelled while resolving track pages");
        return Ok(report);
    }
    if report.media_links.is_empty() {
        warn!(format = %config.format, "no track resolved to a downloadable file");
        return Ok(report);
    }

    let downloaded = download_all(&report.media_links, &directory, config, &sink, &cancel).await?;
    report.downloaded = downloaded.done;
    report.failures.extend(downloaded.failures);
    report.cancelled = downloaded.cancelled;

    info!(
        downloaded = report.downloaded.len(),
        failed = report.failures.len(),
        cancelled = report.cancelled,
        "run finished"
    );
    Ok(report)
}

async fn create_album_dir(directory: &Path) -> Result<()> {
    tokio::fs::create_dir_all(directory)
        .await
        .map_err(|err| Error::filesystem(directory, err))
}
