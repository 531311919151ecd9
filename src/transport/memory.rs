//! In-memory export source.
//!
//! Serves downloads from fixed line lists, with optional injected failures,
//! and tracks how many streams are open at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{DownloadId, ExportSource, LineStream, TransportError};

/// One download served by [`MemoryExportSource`].
#[derive(Debug, Clone)]
pub struct MemoryDownload {
    id: DownloadId,
    lines: Vec<String>,
    open_status: Option<u16>,
    interrupt_after: Option<usize>,
}

impl MemoryDownload {
    /// A download whose body is `lines`.
    pub fn new<I, L>(id: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        Self {
            id: DownloadId::new(id),
            lines: lines.into_iter().map(Into::into).collect(),
            open_status: None,
            interrupt_after: None,
        }
    }

    /// Makes opening this download fail with `status`.
    #[must_use]
    pub fn failing_with_status(mut self, status: u16) -> Self {
        self.open_status = Some(status);
        self
    }

    /// Makes the stream break after yielding `lines` lines.
    #[must_use]
    pub fn interrupted_after(mut self, lines: usize) -> Self {
        self.interrupt_after = Some(lines);
        self
    }

    /// The download identifier.
    #[must_use]
    pub fn id(&self) -> &DownloadId {
        &self.id
    }
}

#[derive(Debug, Default)]
struct OpenStreams {
    current: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
}

impl OpenStreams {
    fn acquire(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// [`ExportSource`] backed by in-memory downloads.
#[derive(Debug, Default, Clone)]
pub struct MemoryExportSource {
    exports: HashMap<String, Vec<MemoryDownload>>,
    discovery_status: HashMap<String, u16>,
    streams: Arc<OpenStreams>,
}

impl MemoryExportSource {
    /// Creates an empty source; unknown exports answer 404.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an export and its downloads, in listing order.
    #[must_use]
    pub fn with_export(
        mut self,
        export_id: impl Into<String>,
        downloads: impl IntoIterator<Item = MemoryDownload>,
    ) -> Self {
        self.exports
            .insert(export_id.into(), downloads.into_iter().collect());
        self
    }

    /// Makes listing `export_id` fail with `status`.
    #[must_use]
    pub fn with_discovery_status(mut self, export_id: impl Into<String>, status: u16) -> Self {
        self.discovery_status.insert(export_id.into(), status);
        self
    }

    /// Number of streams currently open.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.streams.current.load(Ordering::SeqCst)
    }

    /// Highest number of streams that were open at the same time.
    #[must_use]
    pub fn peak_open_streams(&self) -> usize {
        self.streams.peak.load(Ordering::SeqCst)
    }

    /// Total number of streams opened.
    #[must_use]
    pub fn streams_opened(&self) -> usize {
        self.streams.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExportSource for MemoryExportSource {
    async fn list_downloads(&self, export_id: &str) -> Result<Vec<DownloadId>, TransportError> {
        if let Some(status) = self.discovery_status.get(export_id) {
            return Err(TransportError::discovery(export_id, *status));
        }
        self.exports
            .get(export_id)
            .map(|downloads| downloads.iter().map(|d| d.id.clone()).collect())
            .ok_or_else(|| TransportError::discovery(export_id, 404))
    }

    async fn open_stream(
        &self,
        export_id: &str,
        download_id: &DownloadId,
    ) -> Result<Box<dyn LineStream>, TransportError> {
        let download = self
            .exports
            .get(export_id)
            .and_then(|downloads| downloads.iter().find(|d| &d.id == download_id))
            .ok_or_else(|| TransportError::stream(download_id.clone(), 404))?;

        if let Some(status) = download.open_status {
            return Err(TransportError::stream(download_id.clone(), status));
        }

        let mut stream = MemoryLineStream::new(download_id.clone(), download.lines.clone());
        if let Some(limit) = download.interrupt_after {
            stream = stream.interrupted_after(limit);
        }
        Ok(Box::new(stream.tracked(Arc::clone(&self.streams))))
    }
}

/// [`LineStream`] over an iterator of lines.
///
/// The iterator is pulled lazily, one line per call, so an unbounded
/// generator can stand in for a large download.
pub struct MemoryLineStream {
    download_id: DownloadId,
    lines: Option<Box<dyn Iterator<Item = String> + Send>>,
    lines_read: usize,
    interrupt_after: Option<usize>,
    tracker: Option<Arc<OpenStreams>>,
}

impl MemoryLineStream {
    /// Creates a stream over `lines`.
    pub fn new<I>(download_id: DownloadId, lines: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self {
            download_id,
            lines: Some(Box::new(lines.into_iter())),
            lines_read: 0,
            interrupt_after: None,
            tracker: None,
        }
    }

    /// Makes the stream break after yielding `lines` lines.
    #[must_use]
    pub fn interrupted_after(mut self, lines: usize) -> Self {
        self.interrupt_after = Some(lines);
        self
    }

    fn tracked(mut self, tracker: Arc<OpenStreams>) -> Self {
        tracker.acquire();
        self.tracker = Some(tracker);
        self
    }

    fn close(&mut self) {
        self.lines = None;
        if let Some(tracker) = self.tracker.take() {
            tracker.release();
        }
    }
}

#[async_trait]
impl LineStream for MemoryLineStream {
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        if self.lines.is_none() {
            return Ok(None);
        }
        if self.interrupt_after == Some(self.lines_read) {
            self.close();
            return Err(TransportError::interrupted(
                self.download_id.clone(),
                self.lines_read,
                "connection dropped",
            ));
        }
        match self.lines.as_mut().and_then(Iterator::next) {
            Some(line) => {
                self.lines_read += 1;
                Ok(Some(line))
            }
            None => {
                self.close();
                Ok(None)
            }
        }
    }
}

impl Drop for MemoryLineStream {
    fn drop(&mut self) {
        self.close();
    }
}
