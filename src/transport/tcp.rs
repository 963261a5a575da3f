use super::{DiscoveryStream, DiscoveryTransport};
use crate::error::Result;
use crate::types::{DiscoveryRequest, DiscoveryResponse};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::debug;
use std::io;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

/// Upper bound for a single JSON frame.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Newline-delimited JSON over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    server_addr: String,
}

impl TcpTransport {
    /// `server_uri` is `host:port`, optionally prefixed with `tcp://`.
    pub fn new(server_uri: &str) -> Self {
        let server_addr = server_uri
            .strip_prefix("tcp://")
            .unwrap_or(server_uri)
            .trim_end_matches('/')
            .to_string();
        Self { server_addr }
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }
}

#[async_trait]
impl DiscoveryTransport for TcpTransport {
    async fn connect(&self) -> Result<Box<dyn DiscoveryStream>> {
        let socket = TcpStream::connect(&self.server_addr).await?;
        socket.set_nodelay(true)?;
        debug!("Connected to discovery server at {}", self.server_addr);
        Ok(Box::new(JsonLinesStream {
            framed: Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH)),
        }))
    }
}

struct JsonLinesStream {
    framed: Framed<TcpStream, LinesCodec>,
}

#[async_trait]
impl DiscoveryStream for JsonLinesStream {
    async fn send(&mut self, request: DiscoveryRequest) -> Result<()> {
        let line = serde_json::to_string(&request).map_err(invalid_data)?;
        self.framed.send(line).await.map_err(codec_error)?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<DiscoveryResponse>> {
        match self.framed.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(codec_error(e).into()),
            Some(Ok(line)) => {
                let response = serde_json::from_str(&line).map_err(invalid_data)?;
                Ok(Some(response))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        SinkExt::<String>::close(&mut self.framed)
            .await
            .map_err(codec_error)?;
        Ok(())
    }
}

fn invalid_data(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn codec_error(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
