//! Export pipeline: discover, count each download, merge, report.
//!
//! # Concurrency Model
//!
//! - Each download is counted in its own Tokio task that owns its table
//! - At most `concurrency` tasks run at once; with the default of 1 the
//!   downloads are processed strictly one after another, in discovery order,
//!   and each stream is released before the next one opens
//! - Tables are merged only after every task has finished
//! - The first failure aborts the remaining tasks; their partial tables are
//!   dropped, never merged
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use export_tally_core::pipeline::ExportPipeline;
//! use export_tally_core::transport::{HttpExportClient, HttpTimeouts};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpExportClient::new("http://localhost:8000", HttpTimeouts::default())?;
//! let report = ExportPipeline::default().run(Arc::new(client), "demo").await?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

use crate::tally::{CountTable, Report, StreamCounter, TallyError, aggregate};
use crate::transport::{DownloadId, ExportSource, TransportError};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 16;

/// Default concurrency: one download at a time.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Errors that abort an export run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The downloads of the export could not be listed.
    #[error("failed to discover downloads for export '{export_id}'")]
    Discovery {
        /// Export being processed.
        export_id: String,
        /// The transport failure.
        #[source]
        source: TransportError,
    },

    /// One download could not be counted.
    #[error("download {position}/{total} ({download_id}) failed")]
    Download {
        /// The failing download.
        download_id: DownloadId,
        /// 1-based position in discovery order.
        position: usize,
        /// Number of downloads in the export.
        total: usize,
        /// Why it failed.
        #[source]
        source: TallyError,
    },

    /// A counting task panicked or was cancelled.
    #[error("download task failed: {reason}")]
    TaskFailed {
        /// Join error description.
        reason: String,
    },

    /// Merging or totalling the counts failed.
    #[error("failed to assemble report")]
    Report(#[source] TallyError),
}

impl PipelineError {
    /// The failing download, for per-download errors.
    #[must_use]
    pub fn download_id(&self) -> Option<&DownloadId> {
        match self {
            Self::Download { download_id, .. } => Some(download_id),
            _ => None,
        }
    }
}

/// Turns an export into a [`Report`].
#[derive(Debug, Clone)]
pub struct ExportPipeline {
    counter: StreamCounter,
    concurrency: usize,
}

impl Default for ExportPipeline {
    fn default() -> Self {
        Self {
            counter: StreamCounter::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

type TaskOutput = (usize, DownloadId, Result<CountTable, TallyError>);

impl ExportPipeline {
    /// Creates a pipeline counting with `counter`, at most `concurrency`
    /// downloads at a time.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-16).
    pub fn new(counter: StreamCounter, concurrency: usize) -> Result<Self, PipelineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(PipelineError::InvalidConcurrency { value: concurrency });
        }
        debug!(
            concurrency,
            entity_field = %counter.fields().entity,
            category_field = %counter.fields().category,
            "creating export pipeline"
        );
        Ok(Self {
            counter,
            concurrency,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Processes every download of `export_id` and returns the verified report.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Discovery`] if listing fails,
    /// [`PipelineError::Download`] for the first download that cannot be
    /// opened, read, or parsed, [`PipelineError::TaskFailed`] if a task
    /// panics, and [`PipelineError::Report`] on overflow while merging or an
    /// inconsistent report.
    #[instrument(skip(self, source), fields(concurrency = self.concurrency))]
    pub async fn run(
        &self,
        source: Arc<dyn ExportSource>,
        export_id: &str,
    ) -> Result<Report, PipelineError> {
        let downloads =
            source
                .list_downloads(export_id)
                .await
                .map_err(|source| PipelineError::Discovery {
                    export_id: export_id.to_string(),
                    source,
                })?;
        info!(downloads = downloads.len(), "found downloads for export");

        let tables = self.count_downloads(source, export_id, downloads).await?;

        info!(tables = tables.len(), "aggregating results");
        let merged = aggregate(&tables).map_err(PipelineError::Report)?;
        drop(tables);

        let report = Report::assemble(merged).map_err(PipelineError::Report)?;
        report.verify().map_err(PipelineError::Report)?;

        info!(
            patients = report.patients().len(),
            categories = report.totals().len(),
            "report ready"
        );
        Ok(report)
    }

    async fn count_downloads(
        &self,
        source: Arc<dyn ExportSource>,
        export_id: &str,
        downloads: Vec<DownloadId>,
    ) -> Result<Vec<CountTable>, PipelineError> {
        let total = downloads.len();
        let mut tables: Vec<Option<CountTable>> = vec![None; total];
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();

        for (index, download_id) in downloads.into_iter().enumerate() {
            while tasks.len() >= self.concurrency {
                collect_next(&mut tasks, &mut tables, total).await?;
            }

            info!(
                position = index + 1,
                total,
                download_id = %download_id,
                "processing download"
            );

            let source = Arc::clone(&source);
            let counter = self.counter.clone();
            let export_id = export_id.to_string();
            tasks.spawn(async move {
                let result =
                    count_download(source.as_ref(), &counter, &export_id, &download_id).await;
                (index, download_id, result)
            });
        }

        while !tasks.is_empty() {
            collect_next(&mut tasks, &mut tables, total).await?;
        }

        Ok(tables.into_iter().flatten().collect())
    }
}

async fn count_download(
    source: &dyn ExportSource,
    counter: &StreamCounter,
    export_id: &str,
    download_id: &DownloadId,
) -> Result<CountTable, TallyError> {
    let lines = source.open_stream(export_id, download_id).await?;
    counter.count_lines(lines).await
}

/// Waits for one task and files its table, aborting the rest on failure.
async fn collect_next(
    tasks: &mut JoinSet<TaskOutput>,
    tables: &mut [Option<CountTable>],
    total: usize,
) -> Result<(), PipelineError> {
    let Some(joined) = tasks.join_next().await else {
        return Ok(());
    };

    match joined {
        Ok((index, download_id, Ok(table))) => {
            info!(
                position = index + 1,
                total,
                download_id = %download_id,
                patients = table.len(),
                pairs = table.pair_count(),
                "download counted"
            );
            tables[index] = Some(table);
            Ok(())
        }
        Ok((index, download_id, Err(source))) => {
            tasks.abort_all();
            Err(PipelineError::Download {
                download_id,
                position: index + 1,
                total,
                source,
            })
        }
        Err(join_error) => {
            tasks.abort_all();
            Err(PipelineError::TaskFailed {
                reason: join_error.to_string(),
            })
        }
    }
}
