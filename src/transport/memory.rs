//! Scripted in-process transport for tests.
//!
//! Every stream records the requests it is sent. A response is only
//! released after a request has arrived, so the client observes the same
//! strict request/response alternation a real server imposes.

use super::{DiscoveryStream, DiscoveryTransport};
use crate::error::{Error, Result};
use crate::types::{DiscoveryRequest, DiscoveryResponse};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// What the server does after the next request.
#[derive(Debug)]
pub(crate) enum Step {
    Respond(DiscoveryResponse),
    Fail(String),
    End,
}

#[derive(Clone)]
pub(crate) struct MemoryTransport {
    steps: Arc<tokio::sync::Mutex<mpsc::Receiver<Step>>>,
    requests: Arc<Mutex<Vec<DiscoveryRequest>>>,
    connects: Arc<AtomicUsize>,
    refuse_connects: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicUsize>,
}

/// Test-side handle that feeds the transport.
pub(crate) struct MockServer {
    steps: mpsc::Sender<Step>,
    requests: Arc<Mutex<Vec<DiscoveryRequest>>>,
    connects: Arc<AtomicUsize>,
    refuse_connects: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicUsize>,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub(crate) fn pair() -> (MemoryTransport, MockServer) {
    let (tx, rx) = mpsc::channel(1);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let connects = Arc::new(AtomicUsize::new(0));
    let refuse_connects = Arc::new(AtomicUsize::new(0));
    let fail_sends = Arc::new(AtomicUsize::new(0));
    let transport = MemoryTransport {
        steps: Arc::new(tokio::sync::Mutex::new(rx)),
        requests: Arc::clone(&requests),
        connects: Arc::clone(&connects),
        refuse_connects: Arc::clone(&refuse_connects),
        fail_sends: Arc::clone(&fail_sends),
    };
    let server = MockServer {
        steps: tx,
        requests,
        connects,
        refuse_connects,
        fail_sends,
    };
    (transport, server)
}

impl MockServer {
    async fn push(&self, step: Step) {
        tokio::time::timeout(Duration::from_secs(5), self.steps.send(step))
            .await
            .expect("timed out handing a step to the client")
            .expect("transport dropped");
    }

    pub(crate) async fn respond(&self, response: DiscoveryResponse) {
        self.push(Step::Respond(response)).await;
    }

    pub(crate) async fn fail(&self, reason: &str) {
        self.push(Step::Fail(reason.to_string())).await;
    }

    pub(crate) async fn end_stream(&self) {
        self.push(Step::End).await;
    }

    /// Make the next `n` connection attempts fail.
    pub(crate) fn refuse_connects(&self, n: usize) {
        self.refuse_connects.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` requests fail to send. Failed requests are not
    /// recorded.
    pub(crate) fn fail_sends(&self, n: usize) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    pub(crate) fn requests(&self) -> Vec<DiscoveryRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryTransport for MemoryTransport {
    async fn connect(&self) -> Result<Box<dyn DiscoveryStream>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.refuse_connects) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
        }
        Ok(Box::new(MemoryStream {
            transport: self.clone(),
            pending_request: false,
        }))
    }
}

struct MemoryStream {
    transport: MemoryTransport,
    pending_request: bool,
}

#[async_trait]
impl DiscoveryStream for MemoryStream {
    async fn send(&mut self, request: DiscoveryRequest) -> Result<()> {
        if take_one(&self.transport.fail_sends) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "send failed").into());
        }
        self.transport.requests.lock().unwrap().push(request);
        self.pending_request = true;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<DiscoveryResponse>> {
        if !self.pending_request {
            return Err(Error::Connection(io::Error::new(
                io::ErrorKind::Other,
                "recv without an outstanding request",
            )));
        }
        let step = self.transport.steps.lock().await.recv().await;
        self.pending_request = false;
        match step {
            Some(Step::Respond(response)) => Ok(Some(response)),
            Some(Step::Fail(reason)) => Err(Error::Connection(io::Error::new(
                io::ErrorKind::ConnectionReset,
                reason,
            ))),
            Some(Step::End) | None => Ok(None),
        }
    }
}
