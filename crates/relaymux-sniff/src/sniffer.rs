//! Connection protocol sniffer
//!
//! Drives the peek buffer one line at a time: the first line decides
//! control frame vs. HTTP verb, header lines feed the field map while the
//! `Host` value is watched for a backend match, and the blank terminator
//! line triggers the dispatch decision and the cursor commit.

use crate::dispatch::{ConnectionContext, DispatchResult};
use crate::error::SniffError;
use crate::fields::FieldMap;
use crate::peek::{PeekBuffer, ReplayStream};
use crate::source::ByteSource;
use relaymux_proto::{ControlPreamble, CONTROL_VERB};
use relaymux_router::{normalize_host, BackendRegistry, BackendTarget};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Where the sniffer left the connection.
pub enum SniffOutcome<S> {
    /// Tunnel-control frame: the frame's bytes were consumed; the stream
    /// resumes immediately after the header terminator.
    Control(ReplayStream<S>),
    /// Ordinary HTTP (matched or not): every byte read so far is replayed at
    /// the front of the stream.
    Http(ReplayStream<S>),
    /// Peer closed before completing the header block. Buffered bytes were
    /// discarded and nothing was published.
    Closed,
}

/// Per-connection sniffer. Owns the session state for exactly one accepted
/// connection; consumed by [`sniff`](Self::sniff).
pub struct Sniffer<S> {
    peek: PeekBuffer<S>,
    registry: Arc<BackendRegistry>,
    method: Option<String>,
    control_message_id: Option<String>,
    host: Option<String>,
    matched_target: Option<BackendTarget>,
    fields: FieldMap,
    first_line_seen: bool,
}

impl<S: ByteSource> Sniffer<S> {
    pub fn new(source: S, registry: Arc<BackendRegistry>) -> Self {
        Self {
            peek: PeekBuffer::new(source),
            registry,
            method: None,
            control_message_id: None,
            host: None,
            matched_target: None,
            fields: FieldMap::new(),
            first_line_seen: false,
        }
    }

    /// Drive the state machine to its dispatch decision.
    ///
    /// Lines are processed strictly in arrival order and the decision is
    /// made exactly once, at the header terminator (or at end-of-stream).
    /// On return the dispatch result, if the traffic warranted one, has been
    /// published into `ctx`.
    pub async fn sniff(
        mut self,
        ctx: &ConnectionContext,
        cancel: &CancellationToken,
    ) -> Result<SniffOutcome<S>, SniffError> {
        loop {
            let Some(line) = self.peek.next_line(cancel).await? else {
                trace!("Stream completed before header terminator");
                return Ok(SniffOutcome::Closed);
            };

            if !line.terminated {
                // Leftover bytes of a completed stream. A half-received
                // request line cannot be classified at all; a trailing
                // header fragment is just an abandoned request.
                if !self.first_line_seen {
                    return Err(SniffError::UnterminatedRequestLine);
                }
                trace!("Dropping unterminated trailing header fragment");
                return Ok(SniffOutcome::Closed);
            }

            let text = String::from_utf8_lossy(self.peek.line(&line)).into_owned();
            if self.process_line(&text)? {
                return Ok(self.dispatch(ctx));
            }
        }
    }

    /// Consume one complete line. Returns true once the header-terminator
    /// line has been seen.
    fn process_line(&mut self, line: &str) -> Result<bool, SniffError> {
        if !self.first_line_seen {
            self.parse_request_line(line)?;
            self.first_line_seen = true;
            return Ok(false);
        }

        // Header block terminator, with or without the carriage return
        if line.is_empty() || line == "\r" {
            self.fields.mark_complete();
            return Ok(true);
        }

        if self.method.as_deref() == Some(CONTROL_VERB) {
            // Control frames carry no headers that matter for routing
            return Ok(false);
        }

        self.parse_header_line(line)
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), SniffError> {
        let sep = line.find(' ').ok_or(SniffError::MalformedRequestLine)?;
        let method = line[..sep].to_ascii_uppercase();
        trace!("Request line method: {}", method);

        if method == CONTROL_VERB {
            let preamble = ControlPreamble::parse(line)?;
            debug!("Control frame, message id: {}", preamble.message_id);
            self.control_message_id = Some(preamble.message_id);
        }

        self.method = Some(method);
        Ok(())
    }

    fn parse_header_line(&mut self, line: &str) -> Result<bool, SniffError> {
        let colon = line
            .find(':')
            .ok_or_else(|| SniffError::MalformedHeaderLine(line.to_string()))?;
        let name = &line[..colon];
        let value = &line[colon + 1..];

        if self.host.is_none() && name.eq_ignore_ascii_case("host") {
            // First Host line wins: lookup happens here, immediately
            let host = normalize_host(value.trim());
            trace!("Host header: {}", host);
            self.matched_target = self.registry.lookup(&host);
            if self.matched_target.is_some() {
                debug!("Host {} matched a registered backend", host);
            }
            self.host = Some(host);
        }

        // Every header line still goes through the collector, so a repeated
        // name (Host included) aborts the connection
        self.fields.insert(name, value.trim())?;
        Ok(false)
    }

    /// Evaluate the dispatch decision at the header terminator and commit
    /// the cursor.
    fn dispatch(self, ctx: &ConnectionContext) -> SniffOutcome<S> {
        let Sniffer {
            peek,
            method,
            control_message_id,
            host,
            matched_target,
            ..
        } = self;

        let method = method.unwrap_or_default();
        let is_control_frame = method == CONTROL_VERB;

        if is_control_frame || matched_target.is_some() {
            ctx.publish(DispatchResult {
                method,
                host,
                control_message_id,
                matched_target,
            });
        }

        if is_control_frame {
            // The frame is fully parsed; its bytes are never needed again
            SniffOutcome::Control(peek.discard_to_scan())
        } else {
            // The forwarding stage re-parses the request from byte 0
            SniffOutcome::Http(peek.rewind())
        }
    }
}
