//! Export Tally Core Library
//!
//! Streams every download of a clinical data export, counts how often each
//! patient has each event type, and produces a report with per-patient
//! counts and per-event-type totals.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`transport`] - Download discovery and line streaming (HTTP and in-memory)
//! - [`tally`] - CSV record parsing, counting, merging, totals and the report
//! - [`pipeline`] - Runs an export end to end with bounded concurrency

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod pipeline;
pub mod tally;
pub mod transport;
mod user_agent;

// Re-export commonly used types
pub use pipeline::{DEFAULT_CONCURRENCY, ExportPipeline, MAX_CONCURRENCY, PipelineError};
pub use tally::{
    CountTable, FieldNames, MalformedInput, Report, StreamCounter, TallyError, Totals, aggregate,
};
pub use transport::{
    DownloadId, ExportSource, HttpExportClient, HttpTimeouts, LineStream, TransportError,
};
