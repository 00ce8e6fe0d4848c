use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::planer::Chunk;
use super::report::ItemFailure;
use super::{ChunkOutcome, StageOutcome, fetch_text, run_stage};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::page::{Page, PageNode};
use crate::progress::{ProgressEvent, Reporter, Stage};

const DOWNLOAD_ENTRY_CLASS: &str = "songDownloadLink";

/// Picks the media link for `format` out of a track detail page.
///
/// Download entries are `span.songDownloadLink` elements inside an anchor;
/// the first entry whose label contains `format` (ignoring case) wins and
/// its anchor's `href` is resolved against `page_url`. `Ok(None)` means the
/// page has entries but none for this format.
pub fn select_media_link(body: &str, page_url: &Url, format: &str) -> Result<Option<String>> {
    let page = Page::parse(body);
    let format = format.trim().to_lowercase();
    let mut entries = 0;

    for anchor in page.root().find_all_by_tag("a") {
        let labels: Vec<String> = anchor
            .find_all_by_tag("span")
            .iter()
            .filter(|span| span.has_class(DOWNLOAD_ENTRY_CLASS))
            .map(|span| span.text().to_lowercase())
            .collect();
        if labels.is_empty() {
            continue;
        }
        entries += labels.len();

        if !labels.iter().any(|label| label.contains(&format)) {
            continue;
        }
        let Some(href) = anchor.attribute("href") else {
            continue;
        };
        return page_url
            .join(href.trim())
            .map(|link| Some(link.to_string()))
            .map_err(|source| Error::InvalidUrl {
                url: href.to_string(),
                source,
            });
    }

    if entries == 0 {
        return Err(Error::Schema(format!("{page_url} has no download entries")));
    }
    Ok(None)
}

async fn resolve_one(
    client: &Client,
    link: &str,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<String> {
    let page_url = Url::parse(link).map_err(|source| Error::InvalidUrl {
        url: link.to_string(),
        source,
    })?;
    let body = fetch_text(client, link, config, cancel).await?;
    select_media_link(&body, &page_url, &config.format)?.ok_or_else(|| Error::Resolution {
        url: link.to_string(),
        format: config.format.clone(),
    })
}

/// Worker body: resolves the links of one chunk strictly one after another
/// with a client owned by this worker alone.
async fn resolve_chunk(
    chunk: Chunk<String>,
    config: Arc<Config>,
    reporter: Reporter,
    cancel: CancellationToken,
) -> ChunkOutcome<String> {
    let mut outcome = ChunkOutcome::default();
    let client = match config.build_client() {
        Ok(client) => client,
        Err(err) => {
            warn!(worker = chunk.index, %err, "cannot build http client");
            let reason = err.to_string();
            for link in chunk.items {
                outcome.failures.push(ItemFailure::new(
                    Stage::Resolve,
                    link,
                    Error::Worker {
                        worker: chunk.index,
                        reason: reason.clone(),
                    },
                ));
            }
            return outcome;
        }
    };

    for (i, link) in chunk.items.into_iter().enumerate() {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        let task = chunk.offset + i;
        let result = resolve_one(&client, &link, &config, &cancel).await;
        let ok = result.is_ok();
        match result {
            Ok(media) => {
                debug!(worker = chunk.index, %link, %media, "resolved");
                outcome.done.push(media);
            }
            Err(Error::Cancelled) => {
                outcome.cancelled = true;
                break;
            }
            Err(err) => {
                warn!(worker = chunk.index, %link, %err, "could not resolve track");
                outcome
                    .failures
                    .push(ItemFailure::new(Stage::Resolve, link, err));
            }
        }
        reporter.emit(ProgressEvent::ItemFinished {
            stage: Stage::Resolve,
            task,
            ok,
        });
    }
    outcome
}

/// Resolves every detail link to a media link. The result keeps the order
/// of `detail_links`; links that failed are left out and listed in
/// `failures` instead.
pub async fn resolve_all(
    detail_links: &[String],
    config: Arc<Config>,
    sink: &Reporter,
    cancel: &CancellationToken,
) -> Result<StageOutcome<String>> {
    let parallelism = config.scrape_parallelism;
    run_stage(
        Stage::Resolve,
        detail_links,
        parallelism,
        sink,
        |chunk, reporter| resolve_chunk(chunk, Arc::clone(&config), reporter, cancel.clone()),
    )
    .await
}
