//! Per-service endpoint cache.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::types::Endpoint;

/// Concurrent map of service name to its latest endpoint list.
///
/// Lists are stored behind an `Arc` and swapped whole, so a reader either
/// sees the previous list or the new one. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct EndpointCache {
    endpoints: Arc<DashMap<String, Arc<[Endpoint]>>>,
    watching: Arc<DashSet<String>>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached list, `None` if the service was never observed.
    pub fn get(&self, service: &str) -> Option<Vec<Endpoint>> {
        self.endpoints.get(service).map(|eps| eps.to_vec())
    }

    /// Replaces the list for `service`.
    pub fn set(&self, service: &str, endpoints: Vec<Endpoint>) {
        self.endpoints
            .insert(service.to_string(), Arc::from(endpoints));
    }

    /// Returns true for exactly one caller per service name.
    pub fn compare_and_start_watch(&self, service: &str) -> bool {
        if self.watching.contains(service) {
            return false;
        }
        self.watching.insert(service.to_string())
    }

    /// Whether a watch has been started for `service`.
    pub fn is_watched(&self, service: &str) -> bool {
        self.watching.contains(service)
    }

    /// Number of services with a watch started.
    pub fn watched(&self) -> usize {
        self.watching.len()
    }
}
