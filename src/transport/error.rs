//! Error types for the transport module.

use thiserror::Error;

use super::DownloadId;

/// Boxed error raised by the byte source under a line stream.
pub type BoxedStreamError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while discovering or streaming export downloads.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The discovery endpoint answered with a non-success status.
    #[error("HTTP {status} listing downloads for export '{export_id}'")]
    Discovery {
        /// Export being listed.
        export_id: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The discovery request failed before a response arrived.
    #[error("network error listing downloads for export '{export_id}'")]
    DiscoveryNetwork {
        /// Export being listed.
        export_id: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The discovery response body did not have the expected shape.
    #[error("unreadable download listing for export '{export_id}': {reason}")]
    DiscoveryPayload {
        /// Export being listed.
        export_id: String,
        /// What was wrong with the payload.
        reason: String,
    },

    /// The data endpoint answered with a non-success status.
    #[error("HTTP {status} opening download {download_id}")]
    Stream {
        /// Download being opened.
        download_id: DownloadId,
        /// The HTTP status code.
        status: u16,
    },

    /// The data request failed before a response arrived.
    #[error("network error opening download {download_id}")]
    StreamNetwork {
        /// Download being opened.
        download_id: DownloadId,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The stream broke after it started yielding lines.
    #[error("download {download_id} interrupted after {lines_read} lines")]
    StreamInterrupted {
        /// Download being read.
        download_id: DownloadId,
        /// Lines yielded before the failure.
        lines_read: usize,
        /// The underlying read error.
        #[source]
        source: BoxedStreamError,
    },

    /// The configured base URL cannot address export endpoints.
    #[error("invalid export API base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// Creates a discovery status error.
    pub fn discovery(export_id: impl Into<String>, status: u16) -> Self {
        Self::Discovery {
            export_id: export_id.into(),
            status,
        }
    }

    /// Creates a discovery payload error.
    pub fn discovery_payload(export_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DiscoveryPayload {
            export_id: export_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a stream status error.
    #[must_use]
    pub fn stream(download_id: DownloadId, status: u16) -> Self {
        Self::Stream {
            download_id,
            status,
        }
    }

    /// Creates a mid-stream interruption error.
    pub fn interrupted(
        download_id: DownloadId,
        lines_read: usize,
        source: impl Into<BoxedStreamError>,
    ) -> Self {
        Self::StreamInterrupted {
            download_id,
            lines_read,
            source: source.into(),
        }
    }

    /// Creates an invalid base URL error.
    pub fn invalid_base_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBaseUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns the HTTP status carried by discovery or stream status errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Discovery { status, .. } | Self::Stream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// No `From<reqwest::Error>`: every variant needs the export or download
// identifier, which the source error does not carry.
