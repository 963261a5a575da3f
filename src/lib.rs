//! Streaming endpoint discovery with a local cache.
//!
//! A [`DiscoveryClient`] watches services on a discovery server over a
//! long-lived stream and keeps their endpoint lists in memory, so
//! connection setup can resolve a logical service name without waiting
//! on the network.  [`ServiceDialer`] and the DNS front end in
//! [`dns_server`] are the two consumers shipped with the daemon.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod dialer;
pub mod discovery;
pub mod dns_server;
pub mod error;
pub mod transport;
pub mod types;

pub use cache::EndpointCache;
pub use dialer::ServiceDialer;
pub use discovery::{ClientOptions, DiscoveryClient};
pub use error::{Error, Result};
pub use types::Endpoint;
