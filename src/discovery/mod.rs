//! Discovery client: lazily started per-service watches feeding the
//! endpoint cache.
//!
//! [`DiscoveryClient::get_endpoints`] never waits on the network.  The
//! first query for a service starts a background watch and reports
//! [`Error::NotYetDiscovered`]; callers poll until the watch has accepted
//! its first response.  Each watch reconnects forever with exponential
//! backoff until the client is shut down.

mod session;

use std::sync::Arc;

use log::{debug, info};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backoff::{Backoff, BackoffConfig};
use crate::cache::EndpointCache;
use crate::error::{Error, Result};
use crate::transport::DiscoveryTransport;
use crate::types::Endpoint;

use session::{Outcome, WatchSession};

/// Client-side discovery settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Identity sent with every request.
    pub node_id: String,
    pub backoff: BackoffConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            node_id: "meshglue".to_string(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Query entry point. Cheap to clone; clones share the cache and watches.
#[derive(Clone)]
pub struct DiscoveryClient {
    transport: Arc<dyn DiscoveryTransport>,
    node_id: Arc<str>,
    backoff: BackoffConfig,
    cache: EndpointCache,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    runtime: Handle,
}

impl DiscoveryClient {
    /// Must be called from within a Tokio runtime; watches are spawned on it.
    pub fn new(transport: Arc<dyn DiscoveryTransport>, options: ClientOptions) -> Result<Self> {
        Self::with_shutdown(transport, options, CancellationToken::new())
    }

    /// Like [`new`](Self::new), with watches stopping when `shutdown` fires.
    pub fn with_shutdown(
        transport: Arc<dyn DiscoveryTransport>,
        options: ClientOptions,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let runtime = Handle::try_current()?;
        Ok(Self {
            transport,
            node_id: Arc::from(options.node_id),
            backoff: options.backoff,
            cache: EndpointCache::new(),
            shutdown,
            tasks: TaskTracker::new(),
            runtime,
        })
    }

    /// Endpoints of `service`, or [`Error::NotYetDiscovered`] if no
    /// response has been accepted for it yet. Starts the watch on first use.
    pub fn get_endpoints(&self, service: &str) -> Result<Vec<Endpoint>> {
        if let Some(endpoints) = self.cache.get(service) {
            return Ok(endpoints);
        }
        self.watch(service);
        Err(Error::not_yet_discovered(service))
    }

    /// Start watching `service` if nobody has yet. Returns whether this
    /// call started it.
    pub fn watch(&self, service: &str) -> bool {
        if self.shutdown.is_cancelled() || !self.cache.compare_and_start_watch(service) {
            return false;
        }
        info!("Starting discovery watch for {}", service);
        let session = WatchSession::new(
            service,
            Arc::clone(&self.node_id),
            Arc::clone(&self.transport),
            self.cache.clone(),
        );
        self.tasks.spawn_on(
            watch_with_retry(session, Backoff::new(self.backoff), self.shutdown.clone()),
            &self.runtime,
        );
        true
    }

    pub fn cache(&self) -> &EndpointCache {
        &self.cache
    }

    /// Stop every watch and wait for them to exit. Cached endpoints stay
    /// readable afterwards.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        debug!("All discovery watches stopped");
    }
}

/// Supervising loop for one service: run sessions back to back, sleeping
/// between them.
async fn watch_with_retry(
    session: WatchSession,
    mut backoff: Backoff,
    shutdown: CancellationToken,
) {
    loop {
        let outcome = session.run(&shutdown).await;
        if let Outcome::Cancelled = outcome {
            break;
        }
        if outcome.resets_backoff() {
            backoff.reset();
        }
        let delay = backoff.next_delay();
        if let Outcome::Ended { cause, .. } = &outcome {
            debug!(
                "Discovery watch for {} reconnecting in {:?} ({})",
                session.service(),
                delay,
                cause
            );
        }
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("Discovery watch for {} stopped", session.service());
}
