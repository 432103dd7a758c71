use anyhow::Context;
use clap::Parser;
use iiifsync::{Downloader, DownloadConfig, DownloadError, DEFAULT_USER_AGENT};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "iiifsync")]
#[command(about = "Download every image of a IIIF presentation manifest", long_about = None)]
#[command(version)]
struct Args {
    /// URL of the IIIF manifest (e.g., https://example.org/iiif/book/manifest.json)
    manifest_url: String,

    /// Directory the numbered images are written to
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Attempts per image, including the first one
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Wait between two attempts at the same image
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    retry_delay: Duration,

    /// Shortest pause after a successful download
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    min_delay: Duration,

    /// Longest pause after a successful download
    #[arg(long, default_value = "3s", value_parser = humantime::parse_duration)]
    max_delay: Duration,

    /// User-Agent sent with every request
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Extra request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got {:?}", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name is empty in {:?}", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("iiifsync={}", log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("IIIFSync - IIIF manifest image downloader");
    info!("Manifest: {}", args.manifest_url);
    info!("Output directory: {:?}", args.output);

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating output directory {:?}", args.output))?;

    let config = DownloadConfig {
        output_dir: args.output,
        max_attempts: args.retries,
        retry_delay: args.retry_delay,
        pacing_min: args.min_delay,
        pacing_max: args.max_delay,
        user_agent: args.user_agent,
        extra_headers: args.headers,
        show_progress: atty::is(atty::Stream::Stderr) && !args.verbose,
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current request");
            on_ctrl_c.cancel();
        }
    });

    match Downloader::new(config)
        .with_cancellation(cancel)
        .run(&args.manifest_url)
        .await
    {
        Ok(summary) if summary.cancelled => std::process::exit(130),
        Ok(summary) if !summary.failed.is_empty() => {
            error!(
                "{} of {} images could not be downloaded; run again to retry them",
                summary.failed.len(),
                summary.total
            );
            std::process::exit(2);
        }
        Ok(summary) => {
            info!("All {} images are present", summary.total);
            Ok(())
        }
        Err(e @ (DownloadError::InvalidInput(_) | DownloadError::InvalidManifest { .. })) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
