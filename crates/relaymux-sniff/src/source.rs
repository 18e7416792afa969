//! Buffered byte sources feeding the sniffer

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Byte source errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A readable byte source that yields the next available chunk of bytes.
///
/// `None` means the stream has completed and no more data will arrive.
#[async_trait]
pub trait ByteSource: Send {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, SourceError>;
}

const READ_CHUNK_SIZE: usize = 4096;

/// Byte source over any tokio async stream.
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Hand the underlying stream back once sniffing is done.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[async_trait]
impl<S: AsyncRead + Unpin + Send> ByteSource for StreamSource<S> {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        let mut chunk = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let n = self.stream.read_buf(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(chunk.freeze()))
    }
}

/// Scripted in-memory source: each queued `Bytes` arrives as one chunk.
///
/// Used by tests to exercise arbitrary chunk boundaries, including one byte
/// per chunk.
#[async_trait]
impl ByteSource for VecDeque<Bytes> {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        Ok(self.pop_front())
    }
}
