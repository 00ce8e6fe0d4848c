//! Progress events and the console sink that renders them.
//!
//! Workers never share counters. Each one sends events about its own items
//! through a [`Reporter`]; a per-stage relay task owns the completed counter
//! and turns finished items into [`ProgressEvent::RunProgress`] events for
//! the outer sink.

use std::collections::HashMap;
use std::io::{self, Write};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

/// Position of an item in the stage's full (unchunked) work list.
pub type TaskId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolve,
    Download,
}

impl Stage {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Stage::Resolve => "resolving",
            Stage::Download => "downloading",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    StageStarted {
        stage: Stage,
        total: usize,
        workers: usize,
    },
    FileStarted {
        task: TaskId,
        name: String,
        total_bytes: Option<u64>,
    },
    FileProgress {
        task: TaskId,
        transferred: u64,
        total_bytes: Option<u64>,
    },
    ItemFinished {
        stage: Stage,
        task: TaskId,
        ok: bool,
    },
    RunProgress {
        stage: Stage,
        completed: usize,
        total: usize,
    },
    StageFinished {
        stage: Stage,
    },
}

/// Sending half handed to workers. A disabled reporter drops every event.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Reporter {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Reporter { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Reporter { tx: None }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Reporter::new(tx), rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // receiver gone means nobody is watching any more
            let _ = tx.send(event);
        }
    }
}

/// Starts the relay for one stage. Returns the reporter workers should use
/// and the relay task, which ends once every clone of that reporter is
/// dropped.
pub(crate) fn relay(stage: Stage, total: usize, sink: Reporter) -> (Reporter, JoinHandle<()>) {
    let (worker_side, mut rx) = Reporter::channel();
    let handle = tokio::spawn(async move {
        let mut completed = 0;
        sink.emit(ProgressEvent::RunProgress {
            stage,
            completed,
            total,
        });
        while let Some(event) = rx.recv().await {
            let finished = matches!(event, ProgressEvent::ItemFinished { .. });
            sink.emit(event);
            if finished {
                completed += 1;
                sink.emit(ProgressEvent::RunProgress {
                    stage,
                    completed,
                    total,
                });
            }
        }
        sink.emit(ProgressEvent::StageFinished { stage });
    });
    (worker_side, handle)
}

/// Renders progress events as terminal bars until the channel closes.
pub struct ConsoleSink {
    mp: MultiProgress,
    stages: HashMap<Stage, ProgressBar>,
    files: HashMap<TaskId, ProgressBar>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(target: ProgressDrawTarget) -> Self {
        ConsoleSink {
            mp: MultiProgress::with_draw_target(target),
            stages: HashMap::new(),
            files: HashMap::new(),
        }
    }

    /// Writer for the log subscriber. Bars and log lines share stderr, so
    /// every line is written with the bars hidden.
    pub fn log_writer(&self) -> LogWriter {
        LogWriter {
            mp: self.mp.clone(),
        }
    }

    pub fn spawn(mut self, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.handle(event);
            }
            self.clear();
        })
    }

    fn stage_style() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:>12} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-")
    }

    fn file_style(known_length: bool) -> ProgressStyle {
        let template = if known_length {
            "{msg:>30!} {wide_bar} {percent:>3}% {bytes}/{total_bytes} {bytes_per_sec} {eta}"
        } else {
            "{msg:>30!} {spinner} {bytes} {bytes_per_sec}"
        };
        ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
    }

    fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage, total, .. } => {
                let bar = self.mp.add(ProgressBar::new(total as u64));
                bar.set_style(Self::stage_style());
                bar.set_prefix(stage.label());
                self.stages.insert(stage, bar);
            }
            ProgressEvent::RunProgress {
                stage,
                completed,
                total,
            } => {
                if let Some(bar) = self.stages.get(&stage) {
                    bar.set_length(total as u64);
                    bar.set_position(completed as u64);
                }
            }
            ProgressEvent::StageFinished { stage } => {
                if let Some(bar) = self.stages.remove(&stage) {
                    bar.finish();
                }
            }
            ProgressEvent::FileStarted {
                task,
                name,
                total_bytes,
            } => {
                let bar = match total_bytes {
                    Some(len) => ProgressBar::new(len),
                    None => {
                        let bar = ProgressBar::new_spinner();
                        bar.enable_steady_tick(Duration::from_millis(120));
                        bar
                    }
                };
                let bar = self.mp.add(bar);
                bar.set_style(Self::file_style(total_bytes.is_some()));
                bar.set_message(name);
                self.files.insert(task, bar);
            }
            ProgressEvent::FileProgress {
                task, transferred, ..
            } => {
                if let Some(bar) = self.files.get(&task) {
                    bar.set_position(transferred);
                }
            }
            ProgressEvent::ItemFinished {
                stage: Stage::Download,
                task,
                ..
            } => {
                if let Some(bar) = self.files.remove(&task) {
                    bar.finish_and_clear();
                }
            }
            ProgressEvent::ItemFinished { .. } => {}
        }
    }

    fn clear(&mut self) {
        for (_, bar) in self.files.drain() {
            bar.finish_and_clear();
        }
        for (_, bar) in self.stages.drain() {
            bar.abandon();
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct LogWriter {
    mp: MultiProgress,
}

pub struct SuspendedStderr {
    mp: MultiProgress,
}

impl Write for SuspendedStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.mp.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.mp.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = SuspendedStderr;

    fn make_writer(&'a self) -> Self::Writer {
        SuspendedStderr {
            mp: self.mp.clone(),
        }
    }
}
