//! Connection sniffing for the relaymux front door
//!
//! One listening socket carries two kinds of traffic: tunnel-control frames
//! from connected clients and ordinary HTTP requests to be proxied by their
//! `Host` header. The sniffer inspects the leading bytes of a freshly
//! accepted connection without losing any of them, classifies the traffic,
//! and commits the read cursor: control frames are consumed here, HTTP
//! requests are rewound to byte 0 so the forwarding stage re-reads the
//! original bytes verbatim.

pub mod dispatch;
pub mod error;
pub mod fields;
pub mod peek;
pub mod sniffer;
pub mod source;

pub use dispatch::{ConnectionContext, DispatchResult};
pub use error::SniffError;
pub use fields::FieldMap;
pub use peek::{Line, PeekBuffer, ReplayStream};
pub use sniffer::{SniffOutcome, Sniffer};
pub use source::{ByteSource, SourceError, StreamSource};
