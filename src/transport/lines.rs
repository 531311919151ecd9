//! Line cursor over a chunked byte stream.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use super::error::BoxedStreamError;
use super::{DownloadId, LineStream, TransportError};

/// Splits a stream of byte chunks into text lines.
///
/// Holds at most one undelivered chunk plus one partial line. Lines end at
/// `\n`; a trailing `\r` is dropped and a final unterminated line is still
/// yielded. Invalid UTF-8 is replaced rather than rejected.
///
/// The chunk source is dropped as soon as it is exhausted or fails, which
/// releases the underlying connection.
pub struct ChunkedLineStream<S> {
    download_id: DownloadId,
    chunks: Option<S>,
    buffer: Vec<u8>,
    start: usize,
    // Bytes in `buffer[start..scanned]` are known to hold no `\n`.
    scanned: usize,
    lines_read: usize,
}

impl<S> ChunkedLineStream<S> {
    /// Wraps a chunk source belonging to `download_id`.
    pub fn new(download_id: DownloadId, chunks: S) -> Self {
        Self {
            download_id,
            chunks: Some(chunks),
            buffer: Vec::new(),
            start: 0,
            scanned: 0,
            lines_read: 0,
        }
    }

    /// Number of lines yielded so far.
    #[must_use]
    pub fn lines_read(&self) -> usize {
        self.lines_read
    }

    fn take_line(&mut self) -> Option<String> {
        let from = self.scanned.max(self.start);
        let Some(offset) = self.buffer[from..].iter().position(|&byte| byte == b'\n') else {
            self.scanned = self.buffer.len();
            return None;
        };
        let end = from + offset;
        let line = decode(&self.buffer[self.start..end]);
        self.start = end + 1;
        self.scanned = self.start;
        self.lines_read += 1;
        Some(line)
    }

    fn take_remainder(&mut self) -> Option<String> {
        if self.start >= self.buffer.len() {
            self.reset_buffer();
            return None;
        }
        let line = decode(&self.buffer[self.start..]);
        self.reset_buffer();
        self.lines_read += 1;
        Some(line)
    }

    fn append_chunk(&mut self, chunk: &[u8]) {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.scanned = self.scanned.saturating_sub(self.start);
            self.start = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    fn reset_buffer(&mut self) {
        self.buffer = Vec::new();
        self.start = 0;
        self.scanned = 0;
    }
}

fn decode(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[async_trait]
impl<S, B, E> LineStream for ChunkedLineStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin + Send,
    B: AsRef<[u8]> + Send,
    E: Into<BoxedStreamError> + Send,
{
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            let Some(chunks) = self.chunks.as_mut() else {
                return Ok(self.take_remainder());
            };

            match chunks.next().await {
                Some(Ok(chunk)) => self.append_chunk(chunk.as_ref()),
                Some(Err(error)) => {
                    self.chunks = None;
                    self.reset_buffer();
                    return Err(TransportError::interrupted(
                        self.download_id.clone(),
                        self.lines_read,
                        error,
                    ));
                }
                None => self.chunks = None,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::stream;

    use super::*;

    type Chunks = stream::Iter<std::vec::IntoIter<Result<Vec<u8>, std::io::Error>>>;

    fn chunked(chunks: &[&str]) -> ChunkedLineStream<Chunks> {
        let owned: Vec<Result<Vec<u8>, std::io::Error>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        ChunkedLineStream::new(DownloadId::new("d1"), stream::iter(owned))
    }

    async fn drain(lines: &mut dyn LineStream) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_lines_split_across_chunk_boundaries() {
        let mut lines = chunked(&["patient_id,ev", "ent_type\nP001,heart", "_rate\nP002,spo2\n"]);
        assert_eq!(
            drain(&mut lines).await,
            vec!["patient_id,event_type", "P001,heart_rate", "P002,spo2"]
        );
        assert_eq!(lines.lines_read(), 3);
    }

    #[test]
    fn test_partial_line_bytes_are_scanned_once() {
        let mut lines = chunked(&[]);
        lines.append_chunk(b"abc");
        assert_eq!(lines.take_line(), None);
        assert_eq!(lines.scanned, 3);

        lines.append_chunk(b"def");
        assert_eq!(lines.take_line(), None);
        assert_eq!(lines.scanned, 6);

        lines.append_chunk(b"g\nrest");
        assert_eq!(lines.take_line().as_deref(), Some("abcdefg"));
        assert_eq!(lines.scanned, lines.start);

        assert_eq!(lines.take_line(), None);
        assert_eq!(lines.scanned, lines.buffer.len());

        // Compaction keeps the scan position relative to the new start.
        lines.append_chunk(b"\n");
        assert_eq!(lines.start, 0);
        assert_eq!(lines.scanned, 4);
        assert_eq!(lines.take_line().as_deref(), Some("rest"));
    }

    #[tokio::test]
    async fn test_crlf_terminators_are_stripped() {
        let mut lines = chunked(&["a,b\r\n1,2\r\n"]);
        assert_eq!(drain(&mut lines).await, vec!["a,b", "1,2"]);
    }

    #[tokio::test]
    async fn test_final_line_without_terminator_is_yielded() {
        let mut lines = chunked(&["a,b\n1,2"]);
        assert_eq!(drain(&mut lines).await, vec!["a,b", "1,2"]);
    }

    #[tokio::test]
    async fn test_empty_body_yields_no_lines() {
        let mut lines = chunked(&[]);
        assert!(lines.next_line().await.unwrap().is_none());
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let owned: Vec<Result<Vec<u8>, std::io::Error>> = vec![Ok(b"P\xff1,x\n".to_vec())];
        let mut lines = ChunkedLineStream::new(DownloadId::new("d1"), stream::iter(owned));
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.starts_with('P'));
        assert!(line.ends_with("1,x"));
        assert!(line.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_read_error_surfaces_as_interruption_and_exhausts() {
        let owned: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"a,b\n1,2\n3,".to_vec()),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )),
        ];
        let mut lines = ChunkedLineStream::new(DownloadId::new("d9"), stream::iter(owned));

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("a,b"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("1,2"));

        let err = lines.next_line().await.unwrap_err();
        match err {
            TransportError::StreamInterrupted {
                download_id,
                lines_read,
                ..
            } => {
                assert_eq!(download_id.as_str(), "d9");
                assert_eq!(lines_read, 2);
            }
            other => panic!("expected StreamInterrupted, got {other:?}"),
        }

        // The partial "3," line is discarded, never delivered.
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
