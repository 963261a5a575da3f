//! DNS front end for the discovery cache.
//!
//! This module implements a lightweight DNS server using the
//! [hickory-dns](https://crates.io/crates/hickory-dns-server) library.
//! The server listens on a configurable UDP/TCP socket and
//! processes DNS queries as follows:
//!
//! * **Single‑label names** (no dots): treated as service names and
//!   answered from the endpoint cache only.  Every endpoint whose host is
//!   an IP address becomes an A or AAAA record.  A service that is watched
//!   but not discovered yet answers SERVFAIL so resolvers retry; a name
//!   nobody watches answers NXDOMAIN.  Queries never start watches, so the
//!   set of services is the configured `watch` list plus whatever other
//!   callers of the client have asked for.
//! * **FQDNs** (names containing a dot): forwarded to upstream
//!   resolvers using the `hickory-resolver` crate.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::{Header, ResponseCode};
use hickory_server::proto::rr::rdata::{A, AAAA};
use hickory_server::proto::rr::{Name, RData, Record, RecordType};
use hickory_server::server::{
    Request, RequestHandler, ResponseHandler, ResponseInfo, ServerFuture,
};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::Duration;

use crate::cache::EndpointCache;
use crate::discovery::DiscoveryClient;

/// Timeout for idle TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(10);
/// TTL for answers built from the discovery cache.
const SERVICE_TTL: u32 = 5;
/// TTL for forwarded answers.
const FORWARD_TTL: u32 = 60;

/// Start the DNS server. Runs until the listeners fail.
pub async fn run_dns_server(bind_addr: SocketAddr, client: DiscoveryClient) -> anyhow::Result<()> {
    info!("DNS server starting on {}", bind_addr);

    // Create a system resolver for forwarding FQDNs.
    let resolver = TokioAsyncResolver::tokio_from_system_conf()
        .map_err(|e| anyhow::anyhow!("Failed to load system resolv.conf: {}", e))?;

    let handler = ServiceDns { client, resolver };
    let mut server = ServerFuture::new(handler);

    // Register UDP listener.
    let udp = UdpSocket::bind(bind_addr).await?;
    server.register_socket(udp);

    // Register TCP listener.
    let tcp = TcpListener::bind(bind_addr).await?;
    server.register_listener(tcp, TCP_TIMEOUT);

    // Run the server until future resolves.
    server.block_until_done().await?;
    Ok(())
}

/// What the cache says about a single-label name.
#[derive(Debug, PartialEq, Eq)]
enum ServiceAnswer {
    /// Addresses matching the query type.
    Addresses(Vec<IpAddr>),
    /// Known service, nothing of the requested type.
    Empty,
    /// Watched, not discovered yet.
    Pending,
    /// Not watched.
    Unknown,
}

/// Answer `service` for `qtype` from the cache without starting a watch.
/// Endpoints with hostnames instead of IPs cannot be expressed as address
/// records and are skipped.
fn service_answer(cache: &EndpointCache, service: &str, qtype: RecordType) -> ServiceAnswer {
    let Some(endpoints) = cache.get(service) else {
        return if cache.is_watched(service) {
            ServiceAnswer::Pending
        } else {
            ServiceAnswer::Unknown
        };
    };
    let addrs: Vec<IpAddr> = endpoints
        .iter()
        .filter_map(|ep| ep.host.parse::<IpAddr>().ok())
        .filter(|ip| match ip {
            IpAddr::V4(_) => qtype == RecordType::A || qtype == RecordType::ANY,
            IpAddr::V6(_) => qtype == RecordType::AAAA || qtype == RecordType::ANY,
        })
        .collect();
    if addrs.is_empty() {
        ServiceAnswer::Empty
    } else {
        ServiceAnswer::Addresses(addrs)
    }
}

fn address_record(name: Name, ttl: u32, ip: IpAddr) -> Record {
    match ip {
        IpAddr::V4(ipv4) => Record::from_rdata(name, ttl, RData::A(A(ipv4))),
        IpAddr::V6(ipv6) => Record::from_rdata(name, ttl, RData::AAAA(AAAA(ipv6))),
    }
}

struct ServiceDns {
    client: DiscoveryClient,
    resolver: TokioAsyncResolver,
}

impl ServiceDns {
    async fn respond<R>(
        request: &Request,
        mut response_handle: R,
        header: Header,
        records: &[Record],
    ) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(
            header,
            records.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );
        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to send DNS response: {}", e);
                let mut header = header;
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }

    async fn forward(
        &self,
        qname: &str,
        qtype: RecordType,
        name: Name,
    ) -> Result<Vec<Record>, String> {
        let lookup = self
            .resolver
            .lookup_ip(qname)
            .await
            .map_err(|e| e.to_string())?;
        Ok(lookup
            .iter()
            .filter(|addr| match addr {
                IpAddr::V4(_) => qtype == RecordType::A || qtype == RecordType::ANY,
                IpAddr::V6(_) => qtype == RecordType::AAAA || qtype == RecordType::ANY,
            })
            .map(|addr| address_record(name.clone(), FORWARD_TTL, addr))
            .collect())
    }
}

#[async_trait]
impl RequestHandler for ServiceDns {
    async fn handle_request<R>(&self, request: &Request, response_handle: R) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        let query = request.query();
        let qname = query.name().to_string().trim_end_matches('.').to_string();
        let qtype = query.query_type();
        let name: Name = query.name().clone().into();

        // Build response header
        let mut header = Header::response_from_request(request.header());
        header.set_recursion_available(true);

        // Single-label check
        if !qname.contains('.') {
            let answer = service_answer(self.client.cache(), &qname, qtype);
            debug!("Service lookup {} {:?}: {:?}", qname, qtype, answer);
            let records: Vec<Record> = match answer {
                ServiceAnswer::Addresses(addrs) => addrs
                    .into_iter()
                    .map(|ip| address_record(name.clone(), SERVICE_TTL, ip))
                    .collect(),
                ServiceAnswer::Empty => Vec::new(),
                ServiceAnswer::Pending => {
                    header.set_response_code(ResponseCode::ServFail);
                    Vec::new()
                }
                ServiceAnswer::Unknown => {
                    header.set_response_code(ResponseCode::NXDomain);
                    Vec::new()
                }
            };
            return Self::respond(request, response_handle, header, &records).await;
        }

        // Forward FQDN
        match self.forward(&qname, qtype, name).await {
            Ok(records) => {
                header.set_response_code(ResponseCode::NoError);
                Self::respond(request, response_handle, header, &records).await
            }
            Err(e) => {
                warn!("Resolver lookup failed for {}: {}", qname, e);
                header.set_response_code(ResponseCode::ServFail);
                Self::respond(request, response_handle, header, &[]).await
            }
        }
    }
}
