//! Host-based backend routing for the relaymux front door
//!
//! Backends register under a hostname; the sniffer asks which backend, if
//! any, a request's `Host` header maps to. Keys are lower-cased hostnames
//! with any `:port` suffix stripped.

pub mod registry;

pub use registry::{normalize_host, BackendRegistry, BackendTarget, RegistryError};
