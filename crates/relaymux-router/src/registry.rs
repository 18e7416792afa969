//! Backend registry keyed by hostname
//!
//! Read-mostly: populated from configuration at startup, then queried once
//! per sniffed connection. Safe for concurrent readers.

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, trace};

/// A registered routing destination for a hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    /// Tunnel ID of the client serving this host
    pub tunnel_id: String,
    /// Address the request is forwarded to (e.g., "localhost:3000")
    pub target_addr: String,
    /// Additional metadata
    pub metadata: Option<String>,
}

/// Backend registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Backend already registered for host: {0}")]
    AlreadyRegistered(String),

    #[error("No backend registered for host: {0}")]
    NotFound(String),
}

/// Registry of `host -> backend target` routes.
pub struct BackendRegistry {
    backends: DashMap<String, BackendTarget>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: DashMap::new(),
        }
    }

    /// Register a backend for a host. Duplicate hosts are refused.
    pub fn register(&self, host: &str, target: BackendTarget) -> Result<(), RegistryError> {
        let key = normalize_host(host);
        if self.backends.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(key));
        }

        debug!("Registering backend route: {} -> {}", key, target.target_addr);
        self.backends.insert(key, target);
        Ok(())
    }

    /// Lookup the backend for a host header value.
    ///
    /// The queried host is normalized (port stripped, lower-cased) before
    /// the keyed lookup. A miss is not an error: the connection is still
    /// ordinary HTTP traffic for a later stage to reject.
    pub fn lookup(&self, host: &str) -> Option<BackendTarget> {
        let key = normalize_host(host);
        trace!("Looking up backend for host: {}", key);
        self.backends.get(&key).map(|entry| entry.value().clone())
    }

    /// Remove the backend registered for a host.
    pub fn unregister(&self, host: &str) -> Result<BackendTarget, RegistryError> {
        let key = normalize_host(host);
        self.backends
            .remove(&key)
            .map(|(_, target)| target)
            .ok_or(RegistryError::NotFound(key))
    }

    /// Check whether a host has a registered backend.
    pub fn contains(&self, host: &str) -> bool {
        self.backends.contains_key(&normalize_host(host))
    }

    /// Number of registered backends.
    pub fn count(&self) -> usize {
        self.backends.len()
    }

    /// Snapshot of all registered routes.
    pub fn all(&self) -> Vec<(String, BackendTarget)> {
        self.backends
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a host for use as a registry key: strip a trailing `:port`
/// suffix and ASCII-lowercase.
pub fn normalize_host(host: &str) -> String {
    host.split(':').next().unwrap_or(host).to_ascii_lowercase()
}
