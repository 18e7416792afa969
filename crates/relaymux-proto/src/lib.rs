//! Wire-level protocol constants for the relaymux front door
//!
//! A tunnel client talks to the relay through the same listening socket that
//! serves ordinary HTTP. Control frames are shaped like an HTTP request line
//! so they survive intermediaries:
//!
//! ```text
//! TUNNEL <messageId> <payload...>\n
//! <ignored header lines>
//! \n
//! ```
//!
//! The message id is the token immediately following the verb, delimited by
//! the next space.

use thiserror::Error;

/// Reserved verb marking a tunnel-control frame.
pub const CONTROL_VERB: &str = "TUNNEL";

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("control line is missing the message id delimiter")]
    MissingMessageIdDelimiter,
}

/// Parsed preamble of a control frame's first line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPreamble {
    pub message_id: String,
}

impl ControlPreamble {
    /// Extract the message id from a control frame's first line.
    ///
    /// The id runs from the byte after `TUNNEL ` to the next space; a frame
    /// without that second space is malformed and cannot self-correct.
    pub fn parse(first_line: &str) -> Result<Self, ProtocolError> {
        let id_start = CONTROL_VERB.len() + 1;
        let rest = first_line
            .get(id_start..)
            .ok_or(ProtocolError::MissingMessageIdDelimiter)?;
        let id_end = rest
            .find(' ')
            .ok_or(ProtocolError::MissingMessageIdDelimiter)?;

        Ok(Self {
            message_id: rest[..id_end].to_string(),
        })
    }
}
