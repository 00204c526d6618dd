use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracelink_core::{HttpSink, MediaContent, TracelinkConfig};
use tracing_subscriber::{fmt, EnvFilter};

use tracelink_runtime::replay;
use tracelink_runtime::{MediaProcessor, MediaUploader, ObservationGraph, UploadOutcome};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay workflow events into traces", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "tracelink.toml")]
    config: String,

    /// JSON-lines file of workflow events
    #[arg(short, long)]
    events: PathBuf,

    /// JSON value used as the trace input
    #[arg(long)]
    input: Option<String>,

    /// File to upload and attach to the first replayed trace (repeatable)
    #[arg(long)]
    attach: Vec<PathBuf>,

    /// How long to wait for attachments before exiting
    #[arg(long, default_value_t = 10)]
    wait_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match TracelinkConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let sink = match config.sink.credentials() {
        Some(_) => match HttpSink::new(&config.sink) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create sink, tracing disabled");
                None
            }
        },
        None => {
            tracing::info!("Sink credentials not configured, tracing disabled");
            None
        }
    };

    let uploader = sink
        .as_ref()
        .map(|sink| Arc::new(MediaUploader::new(sink.clone(), &config.media)));

    let mut graph = match &sink {
        Some(sink) => ObservationGraph::new(sink.clone(), config.hook.clone()),
        None => ObservationGraph::disabled(config.hook.clone()),
    };
    if let Some(uploader) = &uploader {
        graph = graph.with_media(MediaProcessor::new(uploader.clone()));
    }

    if let Some(input) = &args.input {
        let value: serde_json::Value = serde_json::from_str(input)
            .unwrap_or_else(|_| serde_json::Value::String(input.clone()));
        graph.set_initial_input(value);
    }

    let report = replay::replay_file(&args.events, &graph).await?;

    if let Some(uploader) = &uploader {
        let trace_id = report.graphs.first().and_then(|id| graph.trace_id(id));
        match trace_id {
            Some(trace_id) => {
                let timeout = Duration::from_secs(args.wait_seconds);
                for path in &args.attach {
                    attach_file(uploader, path, trace_id, timeout).await;
                }
            }
            None if !args.attach.is_empty() => {
                tracing::warn!("No trace was opened, attachments skipped");
            }
            None => {}
        }
    }

    graph.flush().await;
    if let Some(uploader) = &uploader {
        uploader.shutdown().await;
    }

    println!(
        "Replayed {} events ({} skipped, {} graphs)",
        report.delivered,
        report.skipped,
        report.graphs.len()
    );
    Ok(())
}

async fn attach_file(
    uploader: &MediaUploader,
    path: &Path,
    trace_id: uuid::Uuid,
    timeout: Duration,
) {
    let mut media = match MediaContent::from_file(path) {
        Ok(media) => media,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Skipping attachment");
            return;
        }
    };

    let reference = match uploader.upload(&mut media, trace_id, None) {
        Ok(UploadOutcome::Deduplicated(reference)) => Ok(reference),
        Ok(UploadOutcome::Queued(media_id)) => uploader.wait_for_upload(media_id, timeout).await,
        Err(e) => Err(e),
    };

    match reference {
        Ok(reference) => {
            tracing::info!(path = %path.display(), reference = %reference, "Attachment uploaded")
        }
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Attachment failed"),
    }
}
