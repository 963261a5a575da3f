//! Error types for the discovery client.

use thiserror::Error;

/// Errors produced by the discovery client.
///
/// Only [`Error::NotYetDiscovered`] ever reaches callers of
/// [`DiscoveryClient::get_endpoints`](crate::DiscoveryClient::get_endpoints).
/// Everything else is absorbed by the per-service watch loop.
#[derive(Debug, Error)]
pub enum Error {
    /// No response has been accepted for this service yet.
    #[error("endpoints not yet discovered for {service}")]
    NotYetDiscovered { service: String },

    /// Dialing, sending on, or receiving from the discovery stream failed.
    #[error("discovery connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A resource payload could not be interpreted.
    #[error("failed to decode {type_url} resource: {reason}")]
    Decode { type_url: String, reason: String },

    /// The server closed the stream cleanly.
    #[error("discovery stream ended")]
    StreamEnded,

    /// The client was constructed outside a Tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn not_yet_discovered(service: impl Into<String>) -> Self {
        Error::NotYetDiscovered {
            service: service.into(),
        }
    }

    pub(crate) fn decode(type_url: impl Into<String>, reason: impl ToString) -> Self {
        Error::Decode {
            type_url: type_url.into(),
            reason: reason.to_string(),
        }
    }
}
