//! Dispatch outcome shared with downstream stages

use relaymux_proto::CONTROL_VERB;
use relaymux_router::BackendTarget;
use std::sync::OnceLock;

/// Immutable record of a sniffing outcome.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    /// Verb from the request line, upper-cased
    pub method: String,
    /// `Host` header value, port stripped and lower-cased
    pub host: Option<String>,
    /// Message id of a control frame; absent for ordinary HTTP
    pub control_message_id: Option<String>,
    /// Backend matched by the host lookup, if any
    pub matched_target: Option<BackendTarget>,
}

impl DispatchResult {
    /// True for control frames and for HTTP requests whose host matched a
    /// registered backend. This is the binary dispatch decision.
    pub fn is_control_traffic(&self) -> bool {
        self.method == CONTROL_VERB || self.matched_target.is_some()
    }
}

/// Per-connection context downstream stages read the dispatch result from.
///
/// The slot is write-once. The sniffer's state machine publishes at most
/// once by construction, so a second write is a programming error rather
/// than a runtime condition to recover from.
#[derive(Debug, Default)]
pub struct ConnectionContext {
    slot: OnceLock<DispatchResult>,
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, result: DispatchResult) {
        if self.slot.set(result).is_err() {
            panic!("dispatch result published twice for one connection");
        }
    }

    pub fn get(&self) -> Option<&DispatchResult> {
        self.slot.get()
    }
}
