//! Outbound connection helper that routes logical service names through
//! the discovery cache.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use tokio::net::TcpStream;

use crate::discovery::DiscoveryClient;
use crate::types::Endpoint;

/// Resolves `service:port` style addresses to discovered endpoints.
///
/// Addresses whose host has no usable endpoints are dialed as given.
pub struct ServiceDialer {
    client: DiscoveryClient,
    cursor: AtomicUsize,
}

impl ServiceDialer {
    pub fn new(client: DiscoveryClient) -> Self {
        Self {
            client,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Address to connect to for `addr`.
    pub fn resolve(&self, addr: &str) -> String {
        let Some((host, _port)) = split_host_port(addr) else {
            debug!("Failed to split address {}, dialing as given", addr);
            return addr.to_string();
        };
        match self.client.get_endpoints(host) {
            Ok(endpoints) => match self.select(&endpoints) {
                Some(endpoint) => {
                    debug!("Dialing endpoint {} discovered for {}", endpoint, host);
                    endpoint.to_string()
                }
                None => {
                    debug!("No endpoints for {}, dialing {} as given", host, addr);
                    addr.to_string()
                }
            },
            Err(e) => {
                debug!("{}, dialing {} as given", e, addr);
                addr.to_string()
            }
        }
    }

    pub async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(self.resolve(addr)).await
    }

    /// Round-robin over the current list.
    fn select<'a>(&self, endpoints: &'a [Endpoint]) -> Option<&'a Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        endpoints.get(n % endpoints.len())
    }
}

/// Splits `host:port` or `[v6]:port`.
fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    let (host, port) = addr.rsplit_once(':')?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']')?,
        None if host.contains(':') => return None,
        None => host,
    };
    if host.is_empty() {
        return None;
    }
    Some((host, port))
}
