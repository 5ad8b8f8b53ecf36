//! Binary entry point for `potato-health`.
//!
//! This module provides the command-line interface for potato-health with options
//! for configuration file paths and logging verbosity. It reads the images,
//! runs the diagnoses, and prints each outcome as JSON.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use potato_health::base::{config::Config, types::ImageSubmission, types::Void};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Potato-health – potato plant diagnosis from field images.
///
/// Configuration can come from `config.toml` or environment variables
/// (`AWS_REGION`, `S3_BUCKET_NAME`, `LEX_BOT_ID`, `LEX_BOT_ALIAS_ID`, ...).
/// Images are stored in S3 and classified by a Lex V2 bot.
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// By default, the tool will look for a config file at `.hidden/config.toml`
    /// in the current directory.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    ///
    /// Use multiple times to increase verbosity:
    /// - No flag: INFO level
    /// - -v: DEBUG level
    /// - -vv or more: TRACE level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Diagnose one or more images concurrently.
    Diagnose {
        /// Image files to diagnose.
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Field location, used as context for the bot.
        #[arg(short, long)]
        location: Option<String>,
        /// Free-form origin tag stored with each image.
        #[arg(short, long)]
        source: Option<String>,
        /// Derive the object key from the image contents, so re-running is idempotent.
        #[arg(long)]
        idempotent: bool,
        /// Follow-up question to ask on each completed diagnosis (repeatable).
        #[arg(long)]
        ask: Vec<String>,
    },
    /// Show the current weather for a field location.
    Weather {
        /// Field location (defaults to the configured location).
        #[arg(short, long)]
        location: Option<String>,
        /// List the known field locations instead.
        #[arg(long)]
        list: bool,
    },
}

/// Main entry point for the potato-health binary.
///
/// Sets up logging based on verbosity, loads configuration, and runs the command.
#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    // Construct the level filter.

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let level_filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    // Prepare the log layer.

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_file(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    // Prepare the otlp layer.

    let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
    let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder().with_simple_exporter(exporter).build().tracer("potato-health");
    let otel = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry().with(otel).with(level_filter).with(stderr).init();

    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Diagnose {
            images,
            location,
            source,
            idempotent,
            ask,
        } => {
            let mut submissions = Vec::with_capacity(images.len());

            for path in &images {
                let bytes = tokio::fs::read(path).await.with_context(|| format!("Failed to read image `{}`.", path.display()))?;
                let mut submission = ImageSubmission::new(bytes);

                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    submission = submission.with_file_name(name);
                }
                if idempotent {
                    submission = submission.with_content_key();
                }
                if let Some(source) = &source {
                    submission = submission.with_source(source);
                }
                if let Some(location) = &location {
                    submission = submission.with_location(location);
                }

                submissions.push(submission);
            }

            // Ctrl-C cancels whatever is still in flight.

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling outstanding diagnoses ...");
                    on_signal.cancel();
                }
            });

            let outcomes = potato_health::diagnose(config, submissions, ask, cancel).await?;

            for (outcome, answers) in outcomes {
                let mut json = serde_json::to_value(&outcome)?;

                if !answers.is_empty() {
                    json["answers"] = serde_json::json!(answers);
                }

                println!("{}", serde_json::to_string_pretty(&json)?);
            }
        }
        Command::Weather { list: true, .. } => {
            for name in potato_health::service::weather::known_locations() {
                println!("{name}");
            }
        }
        Command::Weather { location, .. } => {
            let report = potato_health::weather(config, location.as_deref()).await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
