//! A single connection attempt for one watched service.

use std::sync::Arc;

use log::{debug, error, warn};
use tokio_util::sync::CancellationToken;

use crate::cache::EndpointCache;
use crate::error::Error;
use crate::transport::{DiscoveryStream, DiscoveryTransport};
use crate::types::{resource_name, DiscoveryRequest, DiscoveryResponse, ENDPOINT_TYPE_URL};

/// Acknowledgement state carried from one request to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Ack {
    version_info: String,
    response_nonce: String,
    error_detail: Option<String>,
}

impl Ack {
    /// ACK: the response was applied.
    fn accept(response: &DiscoveryResponse) -> Self {
        Self {
            version_info: response.version_info.clone(),
            response_nonce: response.nonce.clone(),
            error_detail: None,
        }
    }

    /// NACK: keep the last accepted version, answer the rejected nonce.
    ///
    /// Deliberate deviation from "always echo the last accepted values":
    /// the nonce is the rejected response's, as in xDS, so the server can
    /// pair the NACK with what it sent. `version_info` still names the last
    /// list applied to the cache.
    fn reject(&self, response: &DiscoveryResponse, err: &Error) -> Self {
        Self {
            version_info: self.version_info.clone(),
            response_nonce: response.nonce.clone(),
            error_detail: Some(err.to_string()),
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Shutdown was requested.
    Cancelled,
    /// The stream is gone. `cause` is [`Error::StreamEnded`] when the
    /// server closed it cleanly.
    Ended { cause: Error, responses: usize },
}

impl Outcome {
    /// Whether the next delay should start from scratch.
    pub(crate) fn resets_backoff(&self) -> bool {
        match self {
            Outcome::Cancelled => false,
            Outcome::Ended { cause, responses } => {
                matches!(cause, Error::StreamEnded) || *responses > 0
            }
        }
    }
}

/// Drives the request/response exchange for one service over one stream.
pub(crate) struct WatchSession {
    service: String,
    resource: String,
    node_id: Arc<str>,
    transport: Arc<dyn DiscoveryTransport>,
    cache: EndpointCache,
}

impl WatchSession {
    pub(crate) fn new(
        service: &str,
        node_id: Arc<str>,
        transport: Arc<dyn DiscoveryTransport>,
        cache: EndpointCache,
    ) -> Self {
        Self {
            service: service.to_string(),
            resource: resource_name(service),
            node_id,
            transport,
            cache,
        }
    }

    pub(crate) fn service(&self) -> &str {
        &self.service
    }

    fn request(&self, ack: &Ack) -> DiscoveryRequest {
        DiscoveryRequest {
            client_identity: self.node_id.to_string(),
            resource_type: ENDPOINT_TYPE_URL.to_string(),
            resource_names: vec![self.resource.clone()],
            version_info: ack.version_info.clone(),
            response_nonce: ack.response_nonce.clone(),
            error_detail: ack.error_detail.clone(),
        }
    }

    /// Connect and exchange messages until the stream ends, fails, or
    /// `cancel` fires.
    pub(crate) async fn run(&self, cancel: &CancellationToken) -> Outcome {
        debug!(
            "Connecting to discovery server for {} ({}, node {})",
            self.service, self.resource, self.node_id
        );
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Cancelled,
            res = self.transport.connect() => res,
        };
        let mut stream = match connected {
            Ok(stream) => stream,
            Err(error) => {
                error!("Failed to open discovery stream for {}: {}", self.service, error);
                return Outcome::Ended { cause: error, responses: 0 };
            }
        };

        let outcome = self.exchange(stream.as_mut(), cancel).await;
        if let Err(e) = stream.close().await {
            debug!("Error closing discovery stream for {}: {}", self.service, e);
        }
        outcome
    }

    async fn exchange(
        &self,
        stream: &mut dyn DiscoveryStream,
        cancel: &CancellationToken,
    ) -> Outcome {
        let mut ack = Ack::default();
        let mut responses = 0;

        loop {
            let request = self.request(&ack);
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                res = stream.send(request) => res,
            };
            if let Err(error) = sent {
                error!("Failed to send discovery request for {}: {}", self.resource, error);
                return Outcome::Ended { cause: error, responses };
            }
            debug!("Sent discovery request for {}", self.resource);

            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Discovery watch for {} cancelled", self.service);
                    return Outcome::Cancelled;
                }
                res = stream.recv() => res,
            };
            let response = match received {
                Ok(Some(response)) => response,
                Ok(None) => {
                    debug!("Discovery stream for {} ended", self.service);
                    return Outcome::Ended {
                        cause: Error::StreamEnded,
                        responses,
                    };
                }
                Err(error) => {
                    error!(
                        "Failed to receive discovery response for {}: {}",
                        self.resource, error
                    );
                    return Outcome::Ended { cause: error, responses };
                }
            };
            responses += 1;

            ack = match response.endpoints() {
                Ok(endpoints) => {
                    if endpoints.is_empty() {
                        debug!(
                            "No endpoints for {} (version {:?})",
                            self.service, response.version_info
                        );
                    } else {
                        debug!("Endpoints for {} updated: {:?}", self.service, endpoints);
                    }
                    self.cache.set(&self.service, endpoints);
                    Ack::accept(&response)
                }
                Err(e) => {
                    warn!(
                        "Rejecting discovery response for {} (nonce {:?}): {}",
                        self.resource, response.nonce, e
                    );
                    ack.reject(&response, &e)
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;
    use crate::types::{ClusterLoadAssignment, Endpoint, Resource};
    use serde_json::json;

    fn response(version: &str, nonce: &str, endpoints: &[Endpoint]) -> DiscoveryResponse {
        let cla = ClusterLoadAssignment::from_endpoints("svc_cluster", endpoints);
        DiscoveryResponse {
            version_info: version.to_string(),
            nonce: nonce.to_string(),
            resources: vec![Resource::endpoints(&cla).unwrap()],
        }
    }

    fn session(transport: memory::MemoryTransport, cache: &EndpointCache) -> WatchSession {
        WatchSession::new("svc", Arc::from("test-client"), Arc::new(transport), cache.clone())
    }

    #[tokio::test]
    async fn first_request_is_unacked_and_later_requests_echo_the_response() {
        let (transport, server) = memory::pair();
        let cache = EndpointCache::new();
        let session = session(transport, &cache);
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { session.run(&cancel).await }
        });

        server
            .respond(response("1", "n1", &[Endpoint::new("1.2.3.4", 4321, 42)]))
            .await;
        server.end_stream().await;

        let outcome = run.await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::Ended { cause: Error::StreamEnded, responses: 1 }
        ));
        assert_eq!(cache.get("svc"), Some(vec![Endpoint::new("1.2.3.4", 4321, 42)]));

        let reqs = server.requests();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].client_identity, "test-client");
        assert_eq!(reqs[0].resource_type, ENDPOINT_TYPE_URL);
        assert_eq!(reqs[0].resource_names, vec!["svc_cluster".to_string()]);
        assert_eq!(reqs[0].version_info, "");
        assert_eq!(reqs[0].response_nonce, "");
        assert_eq!(reqs[1].version_info, "1");
        assert_eq!(reqs[1].response_nonce, "n1");
        assert_eq!(reqs[1].error_detail, None);
    }

    #[tokio::test]
    async fn malformed_response_is_nacked_and_keeps_the_cache() {
        let (transport, server) = memory::pair();
        let cache = EndpointCache::new();
        let session = session(transport, &cache);
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { session.run(&cancel).await }
        });

        let good = vec![Endpoint::new("1.2.3.4", 4321, 42)];
        server.respond(response("1", "n1", &good)).await;
        server
            .respond(DiscoveryResponse {
                version_info: "2".to_string(),
                nonce: "n2".to_string(),
                resources: vec![Resource {
                    type_url: ENDPOINT_TYPE_URL.to_string(),
                    value: json!({ "endpoints": 7 }),
                }],
            })
            .await;
        server.end_stream().await;

        run.await.unwrap();
        assert_eq!(cache.get("svc"), Some(good));

        let reqs = server.requests();
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[2].version_info, "1");
        assert_eq!(reqs[2].response_nonce, "n2");
        assert!(reqs[2].error_detail.is_some());
    }

    #[tokio::test]
    async fn receive_error_fails_the_session() {
        let (transport, server) = memory::pair();
        let cache = EndpointCache::new();
        let session = session(transport, &cache);
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { session.run(&cancel).await }
        });
        server.fail("boom").await;

        let outcome = run.await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::Ended { cause: Error::Connection(_), responses: 0 }
        ));
        assert!(!outcome.resets_backoff());
        assert_eq!(cache.get("svc"), None);
    }

    #[tokio::test]
    async fn connect_error_fails_the_session() {
        let (transport, server) = memory::pair();
        server.refuse_connects(1);
        let cache = EndpointCache::new();
        let session = session(transport, &cache);

        let outcome = session.run(&CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            Outcome::Ended { cause: Error::Connection(_), responses: 0 }
        ));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_receive() {
        let (transport, server) = memory::pair();
        let cache = EndpointCache::new();
        cache.set("svc", vec![Endpoint::new("10.0.0.1", 80, 1)]);
        let session = session(transport, &cache);
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { session.run(&cancel).await }
        });

        // Wait until the session is blocked on its first receive.
        while server.requests().is_empty() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let outcome = run.await.unwrap();
        assert!(matches!(outcome, Outcome::Cancelled));
        assert_eq!(cache.get("svc"), Some(vec![Endpoint::new("10.0.0.1", 80, 1)]));
    }

    #[tokio::test]
    async fn send_error_fails_the_session() {
        let (transport, server) = memory::pair();
        server.fail_sends(1);
        let cache = EndpointCache::new();
        let session = session(transport, &cache);

        let outcome = session.run(&CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            Outcome::Ended { cause: Error::Connection(_), responses: 0 }
        ));
        assert!(!outcome.resets_backoff());
        assert_eq!(server.connects(), 1);
        assert!(server.requests().is_empty());
        assert_eq!(cache.get("svc"), None);
    }

    #[tokio::test]
    async fn pre_cancelled_session_never_connects() {
        let (transport, server) = memory::pair();
        let cache = EndpointCache::new();
        let session = session(transport, &cache);
        let cancel = CancellationToken::new();
        cancel.cancel();

        for _ in 0..50 {
            assert!(matches!(session.run(&cancel).await, Outcome::Cancelled));
        }
        assert_eq!(server.connects(), 0);
        assert!(server.requests().is_empty());
    }

    #[test]
    fn backoff_reset_rules() {
        let refused = || Error::Connection(std::io::ErrorKind::ConnectionRefused.into());
        assert!(Outcome::Ended { cause: Error::StreamEnded, responses: 0 }.resets_backoff());
        assert!(Outcome::Ended { cause: refused(), responses: 3 }.resets_backoff());
        assert!(!Outcome::Ended { cause: refused(), responses: 0 }.resets_backoff());
        assert!(!Outcome::Cancelled.resets_backoff());
    }
}
