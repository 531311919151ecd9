//! CLI entry point for the export-tally tool.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use export_tally_core::{ExportPipeline, HttpExportClient, StreamCounter};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr; stdout carries only the report.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    info!(export_id = %args.export_id, base_url = %args.base_url, "export-tally starting");

    let client = HttpExportClient::new(&args.base_url, args.timeouts())
        .context("failed to set up export API client")?;
    let pipeline = ExportPipeline::new(
        StreamCounter::new(args.field_names()),
        usize::from(args.concurrency),
    )?;

    let report = pipeline
        .run(Arc::new(client), &args.export_id)
        .await
        .with_context(|| format!("failed to tally export '{}'", args.export_id))?;

    let json = if args.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{json}")?;
    stdout.flush()?;

    Ok(())
}
