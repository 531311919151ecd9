//! Export transport: discovering downloads and streaming their lines.
//!
//! The pipeline only sees two capabilities:
//!
//! - [`ExportSource`] lists the downloads of an export and opens one of them.
//! - [`LineStream`] is a forward-only, single-consumer cursor over the text
//!   lines of one download.
//!
//! [`HttpExportClient`] implements both against the export HTTP API;
//! [`MemoryExportSource`] serves fixed data from memory.
//!
//! # Example
//!
//! ```no_run
//! use export_tally_core::transport::{ExportSource, HttpExportClient, HttpTimeouts};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpExportClient::new("http://localhost:8000", HttpTimeouts::default())?;
//! for download_id in client.list_downloads("demo").await? {
//!     let mut lines = client.open_stream("demo", &download_id).await?;
//!     while let Some(line) = lines.next_line().await? {
//!         println!("{line}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod client;
mod error;
mod lines;
mod memory;

pub use client::{
    CONNECT_TIMEOUT_SECS, DISCOVERY_TIMEOUT_SECS, HttpExportClient, HttpTimeouts, READ_TIMEOUT_SECS,
};
pub use error::{BoxedStreamError, TransportError};
pub use lines::ChunkedLineStream;
pub use memory::{MemoryDownload, MemoryExportSource, MemoryLineStream};

/// Opaque identifier of one download within an export.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(String);

impl DownloadId {
    /// Wraps a raw identifier token.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DownloadId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Forward-only cursor over the lines of one download.
///
/// Lines are yielded without their terminator. `Ok(None)` marks the end of
/// the stream; after `Ok(None)` or an error the cursor stays exhausted. The
/// underlying connection is released once, on exhaustion, on error, or on drop.
#[async_trait]
pub trait LineStream: Send {
    /// Pulls the next line, suspending until it is available.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::StreamInterrupted`] when the stream breaks
    /// before its logical end.
    async fn next_line(&mut self) -> Result<Option<String>, TransportError>;
}

/// Source of export downloads.
#[async_trait]
pub trait ExportSource: Send + Sync {
    /// Lists the downloads of an export, in server order.
    ///
    /// # Errors
    ///
    /// Returns a discovery variant of [`TransportError`] on a non-success
    /// status, a network fault, or an unreadable payload.
    async fn list_downloads(&self, export_id: &str) -> Result<Vec<DownloadId>, TransportError>;

    /// Opens the line stream of one download.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Stream`] on a non-success status, before any
    /// line is available, or a network variant if the request never completes.
    async fn open_stream(
        &self,
        export_id: &str,
        download_id: &DownloadId,
    ) -> Result<Box<dyn LineStream>, TransportError>;
}
