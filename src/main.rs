use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use trackpull::config::{self, Config};
use trackpull::downloader::{self, RunReport};
use trackpull::progress::{ConsoleSink, LogWriter, Reporter};
use trackpull::utils::multierr::MultiError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "trackpull")]
#[command(about = "Download every track of an album in one format")]
#[command(version)]
struct Cli {
    #[arg(short, long, global = true, help = "debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Download {
        #[arg(short, long, help = "format of the tracks, e.g. mp3 or flac")]
        format: String,
        #[arg(short, long, help = "link to the album page")]
        link: String,
        #[arg(short, long, help = "parallel workers, defaults to the number of cores")]
        parallelism: Option<NonZeroUsize>,
        #[arg(long, help = "parallel workers for the download stage")]
        download_parallelism: Option<NonZeroUsize>,
        #[arg(long, help = "seconds before a request is given up", default_value_t = 30)]
        timeout: u64,
        #[arg(short, long, help = "directory the album directory is created in")]
        output: Option<PathBuf>,
        #[arg(long, help = "accept files without a Content-Length")]
        allow_unknown_length: bool,
        #[arg(long, help = "site origin for relative track links", default_value = config::DEFAULT_ORIGIN)]
        origin: String,
        #[arg(long, help = "print the run report as json")]
        json: bool,
    },
    Formats {
        #[arg(short, long, help = "link to the album page")]
        link: String,
        #[arg(long, help = "site origin for relative track links", default_value = config::DEFAULT_ORIGIN)]
        origin: String,
    },
}

fn init_logging(verbose: bool, writer: LogWriter) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},hyper=warn,reqwest=warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .init();
}

fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping workers");
            token.cancel();
        }
    });
    cancel
}

fn print_report(report: &RunReport, json: bool) -> Result<(), BoxError> {
    if json {
        println!("{}", serde_json::to_string_pretty(&report.summary())?);
        return Ok(());
    }

    println!(
        "{}: downloaded {} of {} tracks into {}",
        report.album,
        report.downloaded.len(),
        report.detail_links,
        report.directory.display()
    );
    for failure in &report.failures {
        println!("  failed: {}", failure);
    }
    if report.cancelled {
        println!("  run was cancelled before every track was processed");
    }
    Ok(())
}

async fn run(cli: Cli, console: ConsoleSink) -> Result<(), BoxError> {
    match cli.command {
        Some(Commands::Download {
            format,
            link,
            parallelism,
            download_parallelism,
            timeout,
            output,
            allow_unknown_length,
            origin,
            json,
        }) => {
            let mut config = Config::new(format);
            config.base_origin = origin;
            if let Some(parallelism) = parallelism {
                config.scrape_parallelism = parallelism;
            }
            config.download_parallelism = download_parallelism;
            config.request_timeout = Duration::from_secs(timeout);
            config.allow_unknown_length = allow_unknown_length;
            config.output_root = match output {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };

            let (sink, rx) = Reporter::channel();
            let renderer = console.spawn(rx);
            let result = downloader::download(config, &link, sink, cancel_on_interrupt()).await;
            renderer.await?;

            let report = result?;
            print_report(&report, json)?;
            if !report.failures.is_empty() {
                return Err(Box::new(MultiError::new(report.failures)));
            }
            if report.cancelled {
                return Err("cancelled".into());
            }
        }

        Some(Commands::Formats { link, origin }) => {
            let mut config = Config::new("");
            config.base_origin = origin;
            let listing = downloader::formats(&config, &link, &cancel_on_interrupt()).await?;
            println!("{} ({} tracks)", listing.album, listing.detail_links.len());
            for format in listing.formats {
                println!("  {}", format);
            }
        }

        None => {
            println!("Use --help for available commands");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let console = ConsoleSink::new();
    init_logging(cli.verbose, console.log_writer());

    if let Err(err) = run(cli, console).await {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
