use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::planer::Chunk;
use super::report::{DownloadedFile, ItemFailure};
use super::{ChunkOutcome, StageOutcome, check_status, guarded, run_stage};
use crate::catalog::file_name_from_url;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, Reporter, Stage, TaskId};

/// State of one file transfer, alive only while it runs.
struct DownloadTask<'a> {
    id: TaskId,
    url: &'a str,
    path: PathBuf,
    expected: Option<u64>,
    transferred: u64,
}

impl<'a> DownloadTask<'a> {
    fn new(id: TaskId, url: &'a str, dir: &Path) -> Self {
        DownloadTask {
            id,
            url,
            path: dir.join(file_name_from_url(url)),
            expected: None,
            transferred: 0,
        }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Streams the response body into `file` piece by piece.
    async fn stream_into(
        &mut self,
        file: &mut File,
        client: &Client,
        config: &Config,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let timeout = config.request_timeout;
        let mut response = guarded(cancel, timeout, self.url, client.get(self.url).send()).await?;
        check_status(self.url, &response)?;

        self.expected = response.content_length();
        if self.expected.is_none() && !config.allow_unknown_length {
            return Err(Error::MissingContentLength {
                url: self.url.to_string(),
            });
        }
        reporter.emit(ProgressEvent::FileStarted {
            task: self.id,
            name: self.file_name(),
            total_bytes: self.expected,
        });

        while let Some(piece) = guarded(cancel, timeout, self.url, response.chunk()).await? {
            file.write_all(&piece)
                .await
                .map_err(|err| Error::filesystem(&self.path, err))?;
            self.transferred += piece.len() as u64;
            reporter.emit(ProgressEvent::FileProgress {
                task: self.id,
                transferred: self.transferred,
                total_bytes: self.expected,
            });
        }

        file.flush()
            .await
            .map_err(|err| Error::filesystem(&self.path, err))
    }

    async fn run(
        mut self,
        client: &Client,
        config: &Config,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<DownloadedFile> {
        // Same-named files from different links overwrite each other.
        let mut file = File::create(&self.path)
            .await
            .map_err(|err| Error::filesystem(&self.path, err))?;

        let result = self
            .stream_into(&mut file, client, config, reporter, cancel)
            .await;
        drop(file);

        match result {
            Ok(()) => Ok(DownloadedFile {
                url: self.url.to_string(),
                path: self.path,
                bytes: self.transferred,
            }),
            Err(err) => {
                if let Err(rm_err) = fs::remove_file(&self.path).await {
                    debug!(path = %self.path.display(), %rm_err, "could not remove partial file");
                }
                Err(err)
            }
        }
    }
}

/// Worker body: downloads the links of one chunk one after another. A failed
/// file is recorded and the worker moves on to the next one.
async fn download_chunk(
    chunk: Chunk<String>,
    directory: Arc<PathBuf>,
    config: Arc<Config>,
    reporter: Reporter,
    cancel: CancellationToken,
) -> ChunkOutcome<DownloadedFile> {
    let mut outcome = ChunkOutcome::default();
    let client = match config.build_client() {
        Ok(client) => client,
        Err(err) => {
            warn!(worker = chunk.index, %err, "cannot build http client");
            let reason = err.to_string();
            for url in chunk.items {
                outcome.failures.push(ItemFailure::new(
                    Stage::Download,
                    url,
                    Error::Worker {
                        worker: chunk.index,
                        reason: reason.clone(),
                    },
                ));
            }
            return outcome;
        }
    };

    for (i, url) in chunk.items.iter().enumerate() {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        let task = DownloadTask::new(chunk.offset + i, url, &directory);
        let id = task.id;
        let result = task.run(&client, &config, &reporter, &cancel).await;
        let ok = result.is_ok();
        match result {
            Ok(file) => {
                debug!(worker = chunk.index, path = %file.path.display(), bytes = file.bytes, "saved");
                outcome.done.push(file);
            }
            Err(Error::Cancelled) => {
                outcome.cancelled = true;
                break;
            }
            Err(err) => {
                warn!(worker = chunk.index, %url, %err, "download failed");
                outcome
                    .failures
                    .push(ItemFailure::new(Stage::Download, url.clone(), err));
            }
        }
        reporter.emit(ProgressEvent::ItemFinished {
            stage: Stage::Download,
            task: id,
            ok,
        });
    }
    outcome
}

/// Downloads every media link into `directory`, which must already exist.
///
/// An unusable directory is the only error; everything that goes wrong for
/// a single file is reported in the outcome's `failures`.
pub async fn download_all(
    media_links: &[String],
    directory: &Path,
    config: Arc<Config>,
    sink: &Reporter,
    cancel: &CancellationToken,
) -> Result<StageOutcome<DownloadedFile>> {
    let metadata = fs::metadata(directory)
        .await
        .map_err(|err| Error::filesystem(directory, err))?;
    if !metadata.is_dir() || metadata.permissions().readonly() {
        return Err(Error::filesystem(
            directory,
            std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "not a writable directory",
            ),
        ));
    }

    info!(
        tracks = media_links.len(),
        directory = %directory.display(),
        "downloading tracks"
    );
    let parallelism = config.download_parallelism();
    let directory = Arc::new(directory.to_path_buf());
    run_stage(
        Stage::Download,
        media_links,
        parallelism,
        sink,
        |chunk, reporter| {
            download_chunk(
                chunk,
                Arc::clone(&directory),
                Arc::clone(&config),
                reporter,
                cancel.clone(),
            )
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Media, Site, cancel_after_started, serve};
    use super::*;
    use crate::error::ErrorKind;
    use axum::http::StatusCode;
    use std::num::NonZeroUsize;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn config(parallelism: usize) -> Config {
        let mut config = Config::new("mp3");
        config.scrape_parallelism = NonZeroUsize::new(parallelism).unwrap();
        config
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let mut site = Site::default();
        for i in 1..=5 {
            let media = if i == 3 {
                Media::Status(StatusCode::INTERNAL_SERVER_ERROR)
            } else {
                Media::Bytes(vec![i as u8; 64])
            };
            site.media.insert(format!("{i}.mp3"), media);
        }
        let origin = serve(site).await;
        let links: Vec<String> = (1..=5).map(|i| format!("{origin}/files/{i}.mp3")).collect();
        let dir = TempDir::new().unwrap();

        let outcome = download_all(
            &links,
            dir.path(),
            Arc::new(config(2)),
            &Reporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.done.len(), 4);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].url, links[2]);
        assert_eq!(outcome.failures[0].kind(), ErrorKind::Network);
        assert!(matches!(
            outcome.failures[0].error,
            Error::HttpStatus { status, .. } if status.as_u16() == 500
        ));
        assert!(!dir.path().join("3.mp3").exists());
        for i in [1, 2, 4, 5] {
            let bytes = std::fs::read(dir.path().join(format!("{i}.mp3"))).unwrap();
            assert_eq!(bytes, vec![i as u8; 64]);
        }
        let names: Vec<String> = outcome
            .done
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1.mp3", "2.mp3", "4.mp3", "5.mp3"]);
    }

    #[tokio::test]
    async fn test_decodes_file_names() {
        let mut site = Site::default();
        site.media
            .insert("My Song.mp3".to_string(), Media::Bytes(b"la la".to_vec()));
        let origin = serve(site).await;
        let dir = TempDir::new().unwrap();

        let outcome = download_all(
            &[format!("{origin}/files/My%20Song.mp3")],
            dir.path(),
            Arc::new(config(1)),
            &Reporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.done[0].path, dir.path().join("My Song.mp3"));
        assert_eq!(outcome.done[0].bytes, 5);
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let mut site = Site::default();
        site.media.insert(
            "stream.mp3".to_string(),
            Media::Chunked(b"0123456789".to_vec()),
        );
        let origin = serve(site).await;
        let links = vec![format!("{origin}/files/stream.mp3")];

        let dir = TempDir::new().unwrap();
        let strict = download_all(
            &links,
            dir.path(),
            Arc::new(config(1)),
            &Reporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(strict.done.is_empty());
        assert!(matches!(
            strict.failures[0].error,
            Error::MissingContentLength { .. }
        ));

        let mut lenient = config(1);
        lenient.allow_unknown_length = true;
        let outcome = download_all(
            &links,
            dir.path(),
            Arc::new(lenient),
            &Reporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.done[0].bytes, 10);
        assert_eq!(
            std::fs::read(dir.path().join("stream.mp3")).unwrap(),
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn test_progress_events_per_file() {
        let mut site = Site::default();
        site.media
            .insert("a.mp3".to_string(), Media::Bytes(vec![0; 1000]));
        site.media
            .insert("b.mp3".to_string(), Media::Bytes(vec![1; 10]));
        let origin = serve(site).await;
        let links = vec![
            format!("{origin}/files/a.mp3"),
            format!("{origin}/files/b.mp3"),
        ];
        let dir = TempDir::new().unwrap();
        let (sink, mut rx) = Reporter::channel();

        download_all(
            &links,
            dir.path(),
            Arc::new(config(2)),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        drop(sink);

        let mut last_transferred = [0u64; 2];
        let mut run = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::FileStarted { task, total_bytes, .. } => {
                    assert_eq!(total_bytes, Some(if task == 0 { 1000 } else { 10 }));
                }
                ProgressEvent::FileProgress {
                    task, transferred, ..
                } => {
                    assert!(transferred >= last_transferred[task]);
                    last_transferred[task] = transferred;
                }
                ProgressEvent::RunProgress {
                    completed, total, ..
                } => run.push((completed, total)),
                _ => {}
            }
        }
        assert_eq!(last_transferred, [1000, 10]);
        assert_eq!(run, vec![(0, 2), (1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn test_unusable_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let not_a_dir = dir.path().join("file");
        std::fs::write(&not_a_dir, b"x").unwrap();

        let err = download_all(
            &["http://127.0.0.1:9/files/a.mp3".to_string()],
            &not_a_dir,
            Arc::new(config(1)),
            &Reporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Filesystem);

        let err = download_all(
            &[],
            &dir.path().join("missing"),
            Arc::new(config(1)),
            &Reporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Filesystem);
    }

    #[tokio::test]
    async fn test_cancel_stops_workers() {
        let mut site = Site::default();
        site.media
            .insert("a.mp3".to_string(), Media::Bytes(vec![0; 10]));
        let origin = serve(site).await;
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = download_all(
            &[format!("{origin}/files/a.mp3")],
            dir.path(),
            Arc::new(config(1)),
            &Reporter::disabled(),
            &cancel,
        )
        .await
        .unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.done.is_empty());
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let mut site = Site::default();
        site.media.insert(
            "a.mp3".to_string(),
            Media::Stall {
                total: 100,
                head: b"ID3\x04".to_vec(),
            },
        );
        site.media
            .insert("b.mp3".to_string(), Media::Bytes(vec![7; 32]));
        let origin = serve(site).await;
        let links = vec![
            format!("{origin}/files/a.mp3"),
            format!("{origin}/files/b.mp3"),
        ];
        let dir = TempDir::new().unwrap();
        let mut config = config(1);
        config.request_timeout = Duration::from_millis(300);

        let started = Instant::now();
        let outcome = download_all(
            &links,
            dir.path(),
            Arc::new(config),
            &Reporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].url, links[0]);
        assert_eq!(outcome.failures[0].kind(), ErrorKind::Network);
        assert!(matches!(outcome.failures[0].error, Error::Timeout { .. }));
        assert!(!dir.path().join("a.mp3").exists());

        assert_eq!(outcome.done.len(), 1);
        assert_eq!(outcome.done[0].url, links[1]);
        assert_eq!(std::fs::read(dir.path().join("b.mp3")).unwrap(), vec![7; 32]);
    }

    #[tokio::test]
    async fn test_cancel_during_transfer() {
        let mut site = Site::default();
        site.media
            .insert("0.mp3".to_string(), Media::Bytes(vec![0; 16]));
        for i in [1, 2] {
            site.media.insert(
                format!("{i}.mp3"),
                Media::Stall {
                    total: 100,
                    head: vec![i as u8; 4],
                },
            );
        }
        site.media
            .insert("3.mp3".to_string(), Media::Bytes(vec![3; 16]));
        let origin = serve(site).await;
        // two chunks: [0, 1] and [2, 3], both workers end up stuck mid-file
        let links: Vec<String> = (0..4).map(|i| format!("{origin}/files/{i}.mp3")).collect();
        let dir = TempDir::new().unwrap();

        let cancel = CancellationToken::new();
        let (sink, rx) = Reporter::channel();
        let watcher = cancel_after_started(rx, 3, cancel.clone());

        let started = Instant::now();
        let outcome = download_all(&links, dir.path(), Arc::new(config(2)), &sink, &cancel)
            .await
            .unwrap();
        drop(sink);
        watcher.await.unwrap();

        assert!(cancel.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(outcome.cancelled);
        assert!(outcome.failures.is_empty());
        let done: Vec<&str> = outcome.done.iter().map(|f| f.url.as_str()).collect();
        assert_eq!(done, vec![links[0].as_str()]);

        assert_eq!(std::fs::read(dir.path().join("0.mp3")).unwrap(), vec![0; 16]);
        for i in 1..4 {
            assert!(!dir.path().join(format!("{i}.mp3")).exists());
        }
    }
}
