use crate::error::Result;
use crate::types::{DiscoveryRequest, DiscoveryResponse};
use async_trait::async_trait;

pub mod tcp;
pub use tcp::TcpTransport;

#[cfg(test)]
pub(crate) mod memory;

/// Opens streams to the discovery server.
///
/// The transport owns addressing and any channel security; the discovery
/// client only sees the resulting message stream.
#[async_trait]
pub trait DiscoveryTransport: Send + Sync {
    /// Open a new bidirectional stream.
    async fn connect(&self) -> Result<Box<dyn DiscoveryStream>>;
}

/// One open discovery stream.
///
/// Both methods must be cancel safe: the watch loop races them against
/// shutdown and drops the future if shutdown wins.
#[async_trait]
pub trait DiscoveryStream: Send {
    async fn send(&mut self, request: DiscoveryRequest) -> Result<()>;

    /// Receive the next response. `Ok(None)` means the server closed the
    /// stream cleanly.
    async fn recv(&mut self) -> Result<Option<DiscoveryResponse>>;

    /// Half-close the sending side. Errors are ignored by callers.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
