//! HTTP client for the export API.
//!
//! Endpoints:
//!
//! - `GET {base}/api/export/{export_id}` returns
//!   `{"data": {"download_ids": [...]}}`
//! - `GET {base}/api/export/{export_id}/{download_id}/data` streams the
//!   download's CSV body

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{ChunkedLineStream, DownloadId, ExportSource, LineStream, TransportError};
use crate::user_agent;

/// Default connect timeout for every request (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default total timeout for the discovery request (30 seconds).
pub const DISCOVERY_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout between body reads while streaming (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Timeouts applied by [`HttpExportClient`].
///
/// Streaming requests never get a total timeout: a large download may
/// legitimately take minutes. They only carry the connect timeout and the
/// optional idle read timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// Connect timeout for every request.
    pub connect: Duration,
    /// Total timeout for the discovery request.
    pub discovery: Duration,
    /// Idle timeout between body reads while streaming; `None` disables it.
    pub read: Option<Duration>,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            discovery: Duration::from_secs(DISCOVERY_TIMEOUT_SECS),
            read: Some(Duration::from_secs(READ_TIMEOUT_SECS)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExportListing {
    data: ExportListingData,
}

#[derive(Debug, Deserialize)]
struct ExportListingData {
    download_ids: Vec<DownloadId>,
}

/// Export API client with streaming support.
///
/// Create once and reuse across downloads to benefit from connection pooling.
#[derive(Debug, Clone)]
pub struct HttpExportClient {
    base_url: Url,
    discovery_client: Client,
    stream_client: Client,
}

impl HttpExportClient {
    /// Creates a client for the export API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidBaseUrl`] if the URL does not parse
    /// or cannot carry path segments, and [`TransportError::ClientBuild`] if
    /// the underlying HTTP client cannot be built.
    #[instrument(level = "debug", skip(timeouts))]
    pub fn new(base_url: &str, timeouts: HttpTimeouts) -> Result<Self, TransportError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| TransportError::invalid_base_url(base_url, e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(TransportError::invalid_base_url(
                base_url,
                "URL cannot carry path segments",
            ));
        }
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransportError::invalid_base_url(
                base_url,
                format!("scheme '{}' is not supported", parsed.scheme()),
            ));
        }

        let discovery_client = base_builder(timeouts)
            .timeout(timeouts.discovery)
            .build()
            .map_err(|source| TransportError::ClientBuild { source })?;

        let mut stream_builder = base_builder(timeouts);
        if let Some(read) = timeouts.read {
            stream_builder = stream_builder.read_timeout(read);
        }
        let stream_client = stream_builder
            .build()
            .map_err(|source| TransportError::ClientBuild { source })?;

        debug!(base_url = %parsed, ?timeouts, "created export API client");

        Ok(Self {
            base_url: parsed,
            discovery_client,
            stream_client,
        })
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the download listing for `export_id`.
    #[must_use]
    pub fn export_url(&self, export_id: &str) -> Url {
        self.endpoint(&["api", "export", export_id])
    }

    /// URL of the CSV body of one download.
    #[must_use]
    pub fn data_url(&self, export_id: &str, download_id: &DownloadId) -> Url {
        self.endpoint(&["api", "export", export_id, download_id.as_str(), "data"])
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base URL can carry path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn base_builder(timeouts: HttpTimeouts) -> reqwest::ClientBuilder {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
}

#[async_trait]
impl ExportSource for HttpExportClient {
    #[instrument(skip(self))]
    async fn list_downloads(&self, export_id: &str) -> Result<Vec<DownloadId>, TransportError> {
        let url = self.export_url(export_id);
        debug!(url = %url, "listing downloads");

        let response = self
            .discovery_client
            .get(url)
            .send()
            .await
            .map_err(|source| TransportError::DiscoveryNetwork {
                export_id: export_id.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::discovery(export_id, status.as_u16()));
        }

        let listing: ExportListing = response
            .json()
            .await
            .map_err(|e| TransportError::discovery_payload(export_id, e.to_string()))?;

        debug!(count = listing.data.download_ids.len(), "listed downloads");
        Ok(listing.data.download_ids)
    }

    #[instrument(skip(self), fields(download_id = %download_id))]
    async fn open_stream(
        &self,
        export_id: &str,
        download_id: &DownloadId,
    ) -> Result<Box<dyn LineStream>, TransportError> {
        let url = self.data_url(export_id, download_id);
        debug!(url = %url, "opening download stream");

        let response = self
            .stream_client
            .get(url)
            .send()
            .await
            .map_err(|source| TransportError::StreamNetwork {
                download_id: download_id.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::stream(download_id.clone(), status.as_u16()));
        }

        Ok(Box::new(ChunkedLineStream::new(
            download_id.clone(),
            Box::pin(response.bytes_stream()),
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpExportClient {
        HttpExportClient::new(&server.uri(), HttpTimeouts::default()).unwrap()
    }

    #[test]
    fn test_endpoint_urls_are_built_from_segments() {
        let client =
            HttpExportClient::new("http://localhost:8000", HttpTimeouts::default()).unwrap();
        assert_eq!(
            client.export_url("demo").as_str(),
            "http://localhost:8000/api/export/demo"
        );
        assert_eq!(
            client
                .data_url("demo", &DownloadId::new("f725622a-22ea-4acc-aab8-810ec8b5e2c6"))
                .as_str(),
            "http://localhost:8000/api/export/demo/f725622a-22ea-4acc-aab8-810ec8b5e2c6/data"
        );
    }

    #[test]
    fn test_base_url_with_prefix_path_keeps_prefix() {
        let client =
            HttpExportClient::new("http://example.com/prefix/", HttpTimeouts::default()).unwrap();
        assert_eq!(
            client.export_url("small").as_str(),
            "http://example.com/prefix/api/export/small"
        );
    }

    #[test]
    fn test_segments_are_percent_encoded() {
        let client =
            HttpExportClient::new("http://localhost:8000", HttpTimeouts::default()).unwrap();
        assert_eq!(
            client.export_url("a/b").as_str(),
            "http://localhost:8000/api/export/a%2Fb"
        );
    }

    #[test]
    fn test_invalid_base_urls_rejected() {
        for bad in ["not a url", "mailto:someone@example.com", "ftp://example.com"] {
            let result = HttpExportClient::new(bad, HttpTimeouts::default());
            assert!(
                matches!(result, Err(TransportError::InvalidBaseUrl { .. })),
                "expected InvalidBaseUrl for {bad}"
            );
        }
    }

    #[tokio::test]
    async fn test_list_downloads_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/export/demo"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "download_ids": [
                        "f725622a-22ea-4acc-aab8-810ec8b5e2c6",
                        "591ef21e-8a64-413a-b506-37a41cb6b896"
                    ]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ids = client_for(&server).list_downloads("demo").await.unwrap();
        assert_eq!(
            ids,
            vec![
                DownloadId::new("f725622a-22ea-4acc-aab8-810ec8b5e2c6"),
                DownloadId::new("591ef21e-8a64-413a-b506-37a41cb6b896"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_downloads_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/export/demo"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": {"download_ids": []}})),
            )
            .mount(&server)
            .await;

        let ids = client_for(&server).list_downloads("demo").await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_list_downloads_404_is_discovery_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/export/large"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server).list_downloads("large").await.unwrap_err();
        assert!(
            matches!(err, TransportError::Discovery { status: 404, .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_list_downloads_bad_payload_is_discovery_payload_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/export/demo"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"downloads": []})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).list_downloads("demo").await.unwrap_err();
        assert!(
            matches!(err, TransportError::DiscoveryPayload { .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_open_stream_yields_lines() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/export/demo/d1/data"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/csv")
                    .set_body_string(
                        "patient_id,event_time,event_type,value\n\
                         P001,2025-08-26T00:00:00Z,heart_rate,75\n\
                         P002,2025-08-26T00:00:07Z,spo2,98\n",
                    ),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut lines = client
            .open_stream("demo", &DownloadId::new("d1"))
            .await
            .unwrap();
        let mut collected = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            collected.push(line);
        }
        assert_eq!(
            collected,
            vec![
                "patient_id,event_time,event_type,value",
                "P001,2025-08-26T00:00:00Z,heart_rate,75",
                "P002,2025-08-26T00:00:07Z,spo2,98",
            ]
        );
    }

    #[tokio::test]
    async fn test_open_stream_500_is_stream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/export/demo/d1/data"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .open_stream("demo", &DownloadId::new("d1"))
            .await;
        match result {
            Err(TransportError::Stream {
                download_id,
                status,
            }) => {
                assert_eq!(download_id.as_str(), "d1");
                assert_eq!(status, 500);
            }
            Err(other) => panic!("expected Stream error, got {other:?}"),
            Ok(_) => panic!("expected Stream error, got a stream"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_discovery_network_error() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client =
            HttpExportClient::new(&format!("http://127.0.0.1:{port}"), HttpTimeouts::default())
                .unwrap();

        let err = client.list_downloads("demo").await.unwrap_err();
        assert!(
            matches!(err, TransportError::DiscoveryNetwork { .. }),
            "got {err:?}"
        );
    }
}
