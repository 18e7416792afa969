//! Sniffing errors

use crate::source::SourceError;
use thiserror::Error;

/// Errors raised while classifying a connection.
///
/// Everything except `Source` is a protocol violation in bytes already
/// received: fatal for the connection and never retried.
#[derive(Debug, Error)]
pub enum SniffError {
    #[error("Request line has no method separator")]
    MalformedRequestLine,

    #[error("Stream ended inside the request line")]
    UnterminatedRequestLine,

    #[error("Malformed control frame: {0}")]
    MalformedControlLine(#[from] relaymux_proto::ProtocolError),

    #[error("Header line has no colon separator: {0:?}")]
    MalformedHeaderLine(String),

    #[error("Duplicate header: {0}")]
    DuplicateHeader(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}
