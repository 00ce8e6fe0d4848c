use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ORIGIN: &str = "https://downloads.khinsider.com";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_USER_AGENT: &str = concat!("trackpull/", env!("CARGO_PKG_VERSION"));

/// Run-wide settings. Built once before the pipeline starts and only ever
/// read afterwards, workers share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Requested format label, e.g. `mp3` or `flac`.
    pub format: String,
    /// Origin that relative detail links are qualified against.
    pub base_origin: String,
    pub scrape_parallelism: NonZeroUsize,
    /// Falls back to `scrape_parallelism` when unset.
    pub download_parallelism: Option<NonZeroUsize>,
    /// Upper bound for every single network operation (headers, one body piece).
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Accept responses without `Content-Length` instead of failing them.
    pub allow_unknown_length: bool,
    /// Directory the album directory is created in.
    pub output_root: PathBuf,
}

impl Config {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            base_origin: DEFAULT_ORIGIN.to_string(),
            scrape_parallelism: default_parallelism(),
            download_parallelism: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            allow_unknown_length: false,
            output_root: PathBuf::from("."),
        }
    }

    pub fn download_parallelism(&self) -> NonZeroUsize {
        self.download_parallelism
            .unwrap_or(self.scrape_parallelism)
    }

    /// Client for a single worker. Clients are never shared between workers.
    pub fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.as_str())
            .build()
    }
}

pub fn default_parallelism() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}
