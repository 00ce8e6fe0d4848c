use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::error::{Error, ErrorKind};
use crate::progress::Stage;

/// One item that did not make it through a stage.
#[derive(Debug, Error)]
#[error("{stage:?} {url}: {error}")]
pub struct ItemFailure {
    pub stage: Stage,
    pub url: String,
    #[source]
    pub error: Error,
}

impl ItemFailure {
    pub fn new(stage: Stage, url: impl Into<String>, error: Error) -> Self {
        ItemFailure {
            stage,
            url: url.into(),
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedFile {
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Outcome of a run, built up stage by stage.
#[derive(Debug, Default)]
pub struct RunReport {
    pub album: String,
    pub directory: PathBuf,
    pub detail_links: usize,
    pub media_links: Vec<String>,
    pub downloaded: Vec<DownloadedFile>,
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct FailureSummary<'a> {
    pub stage: Stage,
    pub url: &'a str,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ReportSummary<'a> {
    pub album: &'a str,
    pub directory: &'a PathBuf,
    pub detail_links: usize,
    pub resolved: usize,
    pub downloaded: &'a [DownloadedFile],
    pub failures: Vec<FailureSummary<'a>>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn failures_in(&self, stage: Stage) -> impl Iterator<Item = &ItemFailure> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn summary(&self) -> ReportSummary<'_> {
        ReportSummary {
            album: &self.album,
            directory: &self.directory,
            detail_links: self.detail_links,
            resolved: self.media_links.len(),
            downloaded: &self.downloaded,
            failures: self
                .failures
                .iter()
                .map(|f| FailureSummary {
                    stage: f.stage,
                    url: &f.url,
                    error: f.error.to_string(),
                })
                .collect(),
            cancelled: self.cancelled,
        }
    }
}
