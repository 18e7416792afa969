//! Line-oriented peek buffer with two-phase cursor commit
//!
//! Bytes pulled from the source accumulate here until the sniffer makes its
//! dispatch decision. The commit is two-phase: `discard_to_scan` permanently
//! removes everything already examined (control frames), `rewind` hands
//! every byte ever read back to the front of the stream so the next consumer
//! sees the original input verbatim (ordinary HTTP).

use crate::source::{ByteSource, SourceError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::ops::Range;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// One line yielded by [`PeekBuffer::next_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Byte range within the peek buffer, terminator excluded.
    pub range: Range<usize>,
    /// False only for the final partial line of a completed stream.
    pub terminated: bool,
}

/// Accumulation buffer that segments a chunked byte source into
/// `\n`-terminated lines without consuming the underlying stream.
pub struct PeekBuffer<S> {
    source: S,
    buf: BytesMut,
    /// Offset of the first unexamined byte.
    scan: usize,
    eof: bool,
}

impl<S: ByteSource> PeekBuffer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            buf: BytesMut::new(),
            scan: 0,
            eof: false,
        }
    }

    /// Byte offset of the first unexamined byte.
    pub fn scan_pos(&self) -> usize {
        self.scan
    }

    /// View of a line previously yielded by [`next_line`].
    ///
    /// [`next_line`]: Self::next_line
    pub fn line(&self, line: &Line) -> &[u8] {
        &self.buf[line.range.clone()]
    }

    /// Find the next line boundary, requesting more chunks as needed.
    ///
    /// The search spans the concatenation of all buffered chunks; nothing is
    /// discarded while waiting for a boundary. Once the source completes,
    /// leftover unexamined bytes are yielded once as an unterminated final
    /// line; after that `None`. A fired cancellation token observed at the
    /// read suspension point reads as end-of-stream.
    pub async fn next_line(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Line>, SourceError> {
        loop {
            if let Some(pos) = find_lf(&self.buf[self.scan..]) {
                let start = self.scan;
                let end = start + pos;
                self.scan = end + 1;
                return Ok(Some(Line {
                    range: start..end,
                    terminated: true,
                }));
            }

            if self.eof {
                if self.scan < self.buf.len() {
                    let start = self.scan;
                    let end = self.buf.len();
                    self.scan = end;
                    return Ok(Some(Line {
                        range: start..end,
                        terminated: false,
                    }));
                }
                return Ok(None);
            }

            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    trace!("Read cancelled, treating as end of stream");
                    None
                }
                chunk = self.source.read_chunk() => chunk?,
            };

            match chunk {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => self.eof = true,
            }
        }
    }

    /// Advance-but-retain to byte 0: every byte read so far reappears,
    /// unchanged and in order, at the front of the returned stream.
    pub fn rewind(self) -> ReplayStream<S> {
        ReplayStream {
            lead: self.buf.freeze(),
            source: self.source,
        }
    }

    /// Advance-and-discard through the scan cursor: examined bytes are gone
    /// for good; bytes buffered beyond the cursor stay at the front of the
    /// returned stream.
    pub fn discard_to_scan(mut self) -> ReplayStream<S> {
        let _ = self.buf.split_to(self.scan);
        ReplayStream {
            lead: self.buf.freeze(),
            source: self.source,
        }
    }
}

fn find_lf(haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == b'\n')
}

/// Stream that yields retained bytes first, then the remaining source.
pub struct ReplayStream<S> {
    lead: Bytes,
    source: S,
}

impl<S> ReplayStream<S> {
    /// Bytes still to be replayed before the source resumes.
    pub fn lead(&self) -> &Bytes {
        &self.lead
    }

    pub fn into_parts(self) -> (Bytes, S) {
        (self.lead, self.source)
    }
}

#[async_trait]
impl<S: ByteSource> ByteSource for ReplayStream<S> {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        if !self.lead.is_empty() {
            return Ok(Some(std::mem::take(&mut self.lead)));
        }
        self.source.read_chunk().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn chunked(input: &[u8], size: usize) -> VecDeque<Bytes> {
        input.chunks(size).map(Bytes::copy_from_slice).collect()
    }

    async fn drain<S: ByteSource>(mut source: S) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = source.read_chunk().await.unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_lines_span_one_byte_chunks() {
        let cancel = CancellationToken::new();
        let mut peek = PeekBuffer::new(chunked(b"GET / HTTP/1.1\r\nHost: a\r\n", 1));

        let first = peek.next_line(&cancel).await.unwrap().unwrap();
        assert!(first.terminated);
        assert_eq!(peek.line(&first), b"GET / HTTP/1.1\r");

        let second = peek.next_line(&cancel).await.unwrap().unwrap();
        assert_eq!(peek.line(&second), b"Host: a\r");

        assert!(peek.next_line(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_final_partial_line_is_unterminated() {
        let cancel = CancellationToken::new();
        let mut peek = PeekBuffer::new(chunked(b"abc\ndef", 3));

        let first = peek.next_line(&cancel).await.unwrap().unwrap();
        assert!(first.terminated);
        assert_eq!(peek.line(&first), b"abc");

        let tail = peek.next_line(&cancel).await.unwrap().unwrap();
        assert!(!tail.terminated);
        assert_eq!(peek.line(&tail), b"def");

        // Yielded exactly once
        assert!(peek.next_line(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rewind_replays_every_byte() {
        let cancel = CancellationToken::new();
        let input = b"one\ntwo\nrest";
        let mut peek = PeekBuffer::new(chunked(input, 2));

        peek.next_line(&cancel).await.unwrap().unwrap();
        peek.next_line(&cancel).await.unwrap().unwrap();

        let replayed = drain(peek.rewind()).await;
        assert_eq!(replayed, input);
    }

    #[tokio::test]
    async fn test_discard_keeps_overread_bytes() {
        let cancel = CancellationToken::new();
        // "tail" rides in the same chunk as the last terminator
        let mut peek = PeekBuffer::new(chunked(b"frame\ntail", 64));

        let line = peek.next_line(&cancel).await.unwrap().unwrap();
        assert_eq!(peek.line(&line), b"frame");
        assert_eq!(peek.scan_pos(), 6);

        let replayed = drain(peek.discard_to_scan()).await;
        assert_eq!(replayed, b"tail");
    }

    #[tokio::test]
    async fn test_cancellation_reads_as_end_of_stream() {
        struct PendingSource;

        #[async_trait]
        impl ByteSource for PendingSource {
            async fn read_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
                std::future::pending().await
            }
        }

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut peek = PeekBuffer::new(PendingSource);
        assert!(peek.next_line(&cancel).await.unwrap().is_none());
    }
}
